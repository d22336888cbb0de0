//! The device facade that instrument drivers compose.

use std::path::Path;

use chrono::Local;
use log::debug;
use serde::Deserialize;

use crate::{
    AnyTransport, CommandTable, ConfigError, ConnectionConfig, DeviceError, StatusSnapshot,
    Transport, open_transport,
};

/// A named instrument with a command table, talking through a transport.
///
/// Reads, writes, and queries are passed through to the transport unchanged. The commands that
/// are flagged for monitoring can be polled all at once with [`Device::get_status`].
///
/// ```
/// use devicers::{CommandTable, ConnectionConfig, Device, LoopbackPort, Protocol, VisaTransport};
///
/// let port = LoopbackPort::new(vec!["SYST:ERR?"], vec!["0,\"No error\""], "\n");
/// let config = ConnectionConfig::new(Protocol::SerialVisa, "ASRL5::INSTR").with_terminator("\n");
/// let transport = VisaTransport::from_port(&config, port).unwrap();
/// let commands = CommandTable::new().with("Error", "SYST:ERR?", true);
///
/// let mut device = Device::new("PSU", transport, commands);
/// let status = device.get_status();
/// assert_eq!(status.get("Error"), Some("0,\"No error\""));
/// ```
pub struct Device<T: Transport> {
    name: String,
    transport: T,
    commands: CommandTable,
    status: StatusSnapshot,
}

impl<T: Transport> Device<T> {
    /// Create a new device.
    ///
    /// # Arguments
    /// * `name` - A human readable name of the device, used in logs.
    /// * `transport` - The transport to talk to the instrument.
    /// * `commands` - The command table of the instrument.
    pub fn new(name: &str, transport: T, commands: CommandTable) -> Self {
        let status = StatusSnapshot::new(commands.status_commands());
        Device {
            name: name.to_string(),
            transport,
            commands,
            status,
        }
    }

    /// The name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command table of the device.
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Names of the status commands in table order.
    pub fn status_commands(&self) -> impl Iterator<Item = &str> {
        self.commands.status_commands()
    }

    /// The status commands with their wire strings, printable as a `| name | wire |` table.
    pub fn status_table(&self) -> CommandTable {
        self.commands.status_table()
    }

    /// The snapshot of the last status poll.
    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// The transport of the device.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport, e.g., to attach a stream to a custom transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send a command to the instrument.
    pub fn write(&mut self, message: &str) -> Result<(), DeviceError> {
        self.transport.write(message)
    }

    /// Read a reply from the instrument. Returns an empty string on failure.
    pub fn read(&mut self) -> String {
        self.transport.read()
    }

    /// Query the instrument. Returns an empty string on failure.
    pub fn query(&mut self, message: &str) -> String {
        self.transport.query(message)
    }

    /// Get the wire string of a command by name.
    pub fn command(&self, name: &str) -> Result<&str, DeviceError> {
        self.commands
            .wire(name)
            .ok_or_else(|| DeviceError::UnknownCommand(name.to_string()))
    }

    /// Get the wire string of a command with its placeholders substituted, see
    /// [`CommandTable::format`].
    pub fn format_command(
        &self,
        name: &str,
        channel: Option<usize>,
        argument: Option<&str>,
    ) -> Result<String, DeviceError> {
        self.commands.format(name, channel, argument)
    }

    /// Query all status commands in table order and store the replies.
    ///
    /// All replies share the timestamp that is taken before the first query. Status commands with
    /// a channel placeholder are sent as they are.
    pub fn get_status(&mut self) -> &StatusSnapshot {
        self.status.begin_poll(Local::now());
        for (cmd_name, cmd) in self.commands.iter().filter(|(_, cmd)| cmd.monitor) {
            let reply = self.transport.query(&cmd.wire);
            debug!("Status of {}: {cmd_name} = {reply:?}", self.name);
            self.status.record(cmd_name, reply);
        }
        &self.status
    }

    /// Close the transport.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        debug!("Closing {}", self.name);
        self.transport.close()
    }
}

impl Device<AnyTransport> {
    /// Create a device with the transport that the protocol of the configuration selects.
    ///
    /// Fails if the configuration is invalid or the transport cannot be opened.
    pub fn from_config(
        name: &str,
        config: &ConnectionConfig,
        commands: CommandTable,
    ) -> Result<Self, DeviceError> {
        let transport = open_transport(config)?;
        Ok(Device::new(name, transport, commands))
    }

    /// Create a device from a definition.
    pub fn from_definition(definition: &DeviceDefinition) -> Result<Self, DeviceError> {
        Self::from_config(
            &definition.name,
            &definition.connection,
            definition.commands.clone(),
        )
    }

    /// Read a definition from a TOML file and create the device.
    pub fn from_definition_file<P: AsRef<Path>>(path: P) -> Result<Self, DeviceError> {
        let definition = DeviceDefinition::from_file(path)?;
        Self::from_definition(&definition)
    }
}

/// Everything needed to create a device without writing code: name, connection, and commands.
///
/// ```
/// use devicers::{DeviceDefinition, Protocol};
///
/// let definition = DeviceDefinition::from_toml_str(
///     r#"
///     name = "RP100"
///
///     [connection]
///     protocol = "Serial_VISA"
///     address = "ASRL5::INSTR"
///     baud = 9600
///     terminator = "\n"
///
///     [commands]
///     "Reset" = "*RST"
///     "Error" = { command = "SYST:ERR?", monitor = true }
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(definition.connection.protocol, Protocol::SerialVisa);
/// assert_eq!(definition.commands.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceDefinition {
    /// Name of the device.
    pub name: String,
    /// How to connect to the device.
    pub connection: ConnectionConfig,
    /// The command table.
    #[serde(default)]
    pub commands: CommandTable,
}

impl DeviceDefinition {
    /// Parse a definition from a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    /// Read a definition from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
