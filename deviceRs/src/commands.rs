//! Command tables map human readable command names to the strings sent over the wire.

use std::fmt;

use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, Visitor},
};

use crate::DeviceError;

/// Placeholder for the channel number in a command.
const CHANNEL_PLACEHOLDER: char = '#';

/// One command of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Command {
    /// The string sent over the wire, without terminator. It may contain a `#` placeholder for
    /// a channel number and a `<...>` placeholder for an argument.
    #[serde(rename = "command")]
    pub wire: String,
    /// If `true`, the command is polled by [`crate::Device::get_status`].
    #[serde(default)]
    pub monitor: bool,
}

/// An ordered table of the commands of an instrument.
///
/// The order in which commands are added is kept. Status commands are polled in this order. In
/// TOML, a command is either a plain string or a table with `command` and `monitor` keys:
///
/// ```
/// use devicers::CommandTable;
///
/// let table: CommandTable = toml::from_str(
///     r#"
///     "Clear" = "*CLS"
///     "Output voltage" = { command = "SOUR#:VOLT:NOW?", monitor = true }
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(table.wire("Clear"), Some("*CLS"));
/// assert_eq!(table.status_commands().collect::<Vec<_>>(), vec!["Output voltage"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
    entries: Vec<(String, Command)>,
}

impl CommandTable {
    /// Create an empty command table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command and return the table, for building tables in one expression.
    pub fn with(mut self, name: &str, wire: &str, monitor: bool) -> Self {
        self.insert(name, wire, monitor);
        self
    }

    /// Add a command. A command with the same name is replaced in place.
    pub fn insert(&mut self, name: &str, wire: &str, monitor: bool) {
        let command = Command {
            wire: wire.to_string(),
            monitor,
        };
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = command,
            None => self.entries.push((name.to_string(), command)),
        }
    }

    /// Get a command by name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cmd)| cmd)
    }

    /// Get the wire string of a command by name.
    pub fn wire(&self, name: &str) -> Option<&str> {
        self.get(name).map(|cmd| cmd.wire.as_str())
    }

    /// Iterate over all commands in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Command)> {
        self.entries.iter().map(|(n, cmd)| (n.as_str(), cmd))
    }

    /// Iterate over the names of all status commands in table order.
    pub fn status_commands(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, cmd)| cmd.monitor)
            .map(|(name, _)| name)
    }

    /// A table with only the status commands, in table order.
    ///
    /// Its [`Display`](fmt::Display) lists what [`crate::Device::get_status`] polls.
    pub fn status_table(&self) -> CommandTable {
        self.iter()
            .filter(|(_, cmd)| cmd.monitor)
            .map(|(name, cmd)| (name, cmd.wire.as_str(), true))
            .collect()
    }

    /// Number of commands in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no commands.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the wire string of a command with its placeholders substituted.
    ///
    /// The `#` placeholder is replaced by the channel number and a `<...>` placeholder by the
    /// argument. Both must be given if and only if the command contains the placeholder.
    ///
    /// # Arguments
    /// * `name` - Name of the command in the table.
    /// * `channel` - The channel number as it is sent over the wire.
    /// * `argument` - The argument, already formatted.
    pub fn format(
        &self,
        name: &str,
        channel: Option<usize>,
        argument: Option<&str>,
    ) -> Result<String, DeviceError> {
        let wire = self
            .wire(name)
            .ok_or_else(|| DeviceError::UnknownCommand(name.to_string()))?;

        let mut formatted = match (wire.contains(CHANNEL_PLACEHOLDER), channel) {
            (true, Some(ch)) => wire.replace(CHANNEL_PLACEHOLDER, &ch.to_string()),
            (true, None) => {
                return Err(DeviceError::MissingArgument {
                    command: name.to_string(),
                    placeholder: CHANNEL_PLACEHOLDER.to_string(),
                });
            }
            (false, Some(_)) => {
                return Err(DeviceError::InvalidArgument(format!(
                    "Command \"{name}\" does not take a channel"
                )));
            }
            (false, None) => wire.to_string(),
        };

        match (find_placeholder(&formatted), argument) {
            (Some((start, end)), Some(arg)) => formatted.replace_range(start..end, arg),
            (Some((start, end)), None) => {
                return Err(DeviceError::MissingArgument {
                    command: name.to_string(),
                    placeholder: formatted[start..end].to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(DeviceError::InvalidArgument(format!(
                    "Command \"{name}\" does not take an argument"
                )));
            }
            (None, None) => {}
        }
        Ok(formatted)
    }
}

/// Find the byte range of the first `<...>` placeholder.
fn find_placeholder(wire: &str) -> Option<(usize, usize)> {
    let start = wire.find('<')?;
    let end = wire[start..].find('>')? + start + 1;
    Some((start, end))
}

impl<'a> FromIterator<(&'a str, &'a str, bool)> for CommandTable {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str, bool)>>(iter: I) -> Self {
        let mut table = CommandTable::new();
        for (name, wire, monitor) in iter {
            table.insert(name, wire, monitor);
        }
        table
    }
}

impl fmt::Display for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, cmd) in self.iter() {
            writeln!(f, "| {name} | {} |", cmd.wire)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Wire(String),
    Full(Command),
}

impl From<RawCommand> for Command {
    fn from(raw: RawCommand) -> Self {
        match raw {
            RawCommand::Wire(wire) => Command {
                wire,
                monitor: false,
            },
            RawCommand::Full(cmd) => cmd,
        }
    }
}

struct CommandTableVisitor;

impl<'de> Visitor<'de> for CommandTableVisitor {
    type Value = CommandTable;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a table of command names to commands")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut table = CommandTable::new();
        while let Some((name, raw)) = map.next_entry::<String, RawCommand>()? {
            let cmd = Command::from(raw);
            table.insert(&name, &cmd.wire, cmd.monitor);
        }
        Ok(table)
    }
}

impl<'de> Deserialize<'de> for CommandTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(CommandTableVisitor)
    }
}
