//! A rust driver for the Razorbill RP100 piezo power supply.
//!
//! The RP100 has two output channels that can each drive a piezo stack. This driver allows to
//! switch the output relays, set and read back voltages and slew rates, measure output voltages
//! and currents, and read the error queue. Voltages are limited to the safe range of the piezo
//! stacks, which depends on their temperature, see [`VoltageLimits`].
//!
//! # Example
//!
//! This example shows the usage via the VISA serial interface.
//! ```no_run
//! use measurements::Voltage;
//! use razorbill_rp100::Rp100;
//!
//! // The VISA resource the RP100 is connected to
//! let address = "ASRL5::INSTR";
//!
//! let mut inst = Rp100::open(address).expect("Failed to open the RP100");
//!
//! // Query the name of the instrument
//! println!("{}", inst.get_name().unwrap());
//!
//! // Ramp channel 1 to 12.5 V
//! let mut ch1 = inst.get_channel(0).unwrap();
//! ch1.set_slew_rate(1.0).unwrap();
//! ch1.set_voltage(Voltage::from_volts(12.5)).unwrap();
//! ch1.set_output(true).unwrap();
//! println!("Channel 1 voltage: {:?}", ch1.get_voltage());
//! ```

#![deny(warnings, missing_docs)]

use std::sync::{Arc, Mutex, MutexGuard};

use devicers::{
    AnyTransport, ByteSize, CommandTable, ConnectionConfig, Device, DeviceError, Protocol,
    StatusSnapshot, StopBits, Transport, open_transport,
};
use log::info;
use measurements::{Current, Voltage};

/// Number of output channels of the RP100.
const NUM_CHANNELS: usize = 2;

/// Baud rate of the RP100 serial link.
const BAUD: u32 = 9600;

/// Line terminator of the RP100.
const TERMINATOR: &str = "\n";

/// Range of allowed slew rates in V/s.
const SLEW_RATE_RANGE: (f64, f64) = (0.0, 10.0);

/// The command table of the RP100.
///
/// `#` is the channel number (1 or 2) and `<...>` the argument of a command. The error queue is
/// polled by [`Rp100::get_status`].
pub fn rp100_commands() -> CommandTable {
    CommandTable::new()
        .with("Identify", "*IDN?", false)
        .with("System clear", "*CLS", false)
        .with("Reset device", "*RST", false)
        .with("Set output relay", "OUTP# <state>", false)
        .with("Query output relay", "OUTP#?", false)
        .with("Set output voltage", "SOUR#:VOLT <voltage>", false)
        .with("Query output voltage", "SOUR#:VOLT:NOW?", false)
        .with("Query output setpoint", "SOUR#:VOLT?", false)
        .with("Set voltage slew rate", "SOUR#:VOLT:SLEW <rate>", false)
        .with("Query voltage slew rate", "SOUR#:VOLT:SLEW?", false)
        .with("Measure output voltage", "MEAS#:VOLT?", false)
        .with("Measure output current", "MEAS#:CURR?", false)
        .with("Get last error", "SYST:ERR?", true)
        .with("Get number of errors", "SYST:ERR:COUN?", true)
}

/// Voltage limits of the piezo stacks driven by the RP100.
///
/// Piezo stacks tolerate a larger voltage range when they are cold.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VoltageLimits {
    /// Limits at room temperature: -20 V to 120 V.
    #[default]
    RoomTemperature,
    /// Limits at 4 K: -200 V to 200 V.
    Cryogenic,
}

impl VoltageLimits {
    /// Lowest allowed voltage.
    pub fn min(&self) -> Voltage {
        match self {
            VoltageLimits::RoomTemperature => Voltage::from_volts(-20.0),
            VoltageLimits::Cryogenic => Voltage::from_volts(-200.0),
        }
    }

    /// Highest allowed voltage.
    pub fn max(&self) -> Voltage {
        match self {
            VoltageLimits::RoomTemperature => Voltage::from_volts(120.0),
            VoltageLimits::Cryogenic => Voltage::from_volts(200.0),
        }
    }

    /// Check that a voltage is within the limits.
    fn check(&self, voltage: Voltage) -> Result<(), DeviceError> {
        check_range(voltage.as_volts(), self.min().as_volts(), self.max().as_volts())
    }
}

/// A rust driver for the Razorbill RP100.
///
/// See the top-level documentation for an example on how to use this driver.
pub struct Rp100<T: Transport> {
    device: Arc<Mutex<Device<T>>>,
    limits: Arc<Mutex<VoltageLimits>>,
    num_channels: usize,
}

impl Rp100<AnyTransport> {
    /// The connection configuration of an RP100 at the given VISA serial resource.
    ///
    /// The RP100 talks at 9600 baud and terminates lines with `\n`.
    pub fn connection_config(address: &str) -> ConnectionConfig {
        ConnectionConfig::new(Protocol::SerialVisa, address)
            .with_baud(BAUD)
            .with_terminator(TERMINATOR)
    }

    /// Open an RP100 at the given VISA serial resource, e.g., `"ASRL5::INSTR"`.
    ///
    /// This requires the `visa` feature.
    pub fn open(address: &str) -> Result<Self, DeviceError> {
        let transport = open_transport(&Self::connection_config(address))?;
        Ok(Self::new(transport))
    }

    /// Open an RP100 directly at a serial port, e.g., `"/dev/ttyUSB0"` or `"COM3"`.
    ///
    /// The port is configured with 9600 baud, 8 data bits, one stop bit, and no parity.
    pub fn open_serial(port: &str) -> Result<Self, DeviceError> {
        let config = ConnectionConfig::new(Protocol::Rs232, port)
            .with_baud(BAUD)
            .with_byte_size(ByteSize::Eight)
            .with_stop_bits(StopBits::One)
            .with_terminator(TERMINATOR);
        let transport = open_transport(&config)?;
        Ok(Self::new(transport))
    }
}

impl<T: Transport> Rp100<T> {
    /// Create a new RP100 instance with the given transport.
    ///
    /// The voltage limits are set to [`VoltageLimits::RoomTemperature`].
    ///
    /// # Arguments
    /// * `transport` - A transport that implements the [`Transport`] trait.
    pub fn new(transport: T) -> Self {
        let device = Device::new("RP100", transport, rp100_commands());
        Rp100 {
            device: Arc::new(Mutex::new(device)),
            limits: Arc::new(Mutex::new(VoltageLimits::default())),
            num_channels: NUM_CHANNELS,
        }
    }

    /// Get a new channel with a given index for the Channel.
    ///
    /// Please note that channels are zero indexed, i.e., index 0 is channel 1 of the instrument.
    pub fn get_channel(&mut self, idx: usize) -> Result<Channel<T>, DeviceError> {
        if idx >= self.num_channels {
            return Err(DeviceError::ChannelIndexOutOfRange {
                idx,
                nof_channels: self.num_channels,
            });
        }
        Ok(Channel::new(
            idx,
            Arc::clone(&self.device),
            Arc::clone(&self.limits),
        ))
    }

    /// Query the name of the instrument.
    ///
    /// Returns a comma-separated string of manufacturer, model, serial number, and firmware
    /// version.
    pub fn get_name(&mut self) -> Result<String, DeviceError> {
        self.query("Identify")
    }

    /// Clear the status and error queue of the instrument.
    pub fn clear(&mut self) -> Result<(), DeviceError> {
        self.sendcmd("System clear")
    }

    /// Reset the instrument to its power-on state.
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        self.sendcmd("Reset device")
    }

    /// Get the oldest error from the error queue of the instrument.
    pub fn get_last_error(&mut self) -> Result<String, DeviceError> {
        self.query("Get last error")
    }

    /// Get the number of errors in the error queue of the instrument.
    pub fn get_error_count(&mut self) -> Result<u32, DeviceError> {
        let resp = self.query("Get number of errors")?;
        resp.parse::<u32>()
            .map_err(|_| DeviceError::ResponseParseError(resp))
    }

    /// Poll the status commands of the instrument and return the snapshot.
    pub fn get_status(&mut self) -> StatusSnapshot {
        lock(&self.device).get_status().clone()
    }

    /// Get the voltage limits that are applied when setting a voltage.
    pub fn get_voltage_limits(&self) -> VoltageLimits {
        *self.limits.lock().expect("Mutex should not be poisoned")
    }

    /// Set the voltage limits that are applied when setting a voltage.
    ///
    /// Only switch to [`VoltageLimits::Cryogenic`] when the piezo stacks are cold.
    pub fn set_voltage_limits(&mut self, limits: VoltageLimits) {
        info!("RP100 voltage limits set to {limits:?}");
        *self.limits.lock().expect("Mutex should not be poisoned") = limits;
    }

    /// Send a command without channel to the instrument.
    fn sendcmd(&mut self, name: &str) -> Result<(), DeviceError> {
        let mut device = lock(&self.device);
        let cmd = device.command(name)?.to_string();
        device.write(&cmd)
    }

    /// Query the instrument with a command without channel. Empty replies are errors.
    fn query(&mut self, name: &str) -> Result<String, DeviceError> {
        let mut device = lock(&self.device);
        let cmd = device.command(name)?.to_string();
        non_empty(device.query(&cmd))
    }
}

impl<T: Transport> Clone for Rp100<T> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            limits: self.limits.clone(),
            num_channels: self.num_channels,
        }
    }
}

/// Channel structure representing a single output channel of the RP100.
///
/// **This structure can only be created through the [`Rp100`] struct.**
pub struct Channel<T: Transport> {
    idx: usize,
    device: Arc<Mutex<Device<T>>>,
    limits: Arc<Mutex<VoltageLimits>>,
}

impl<T: Transport> Channel<T> {
    /// Get a new channel for the given device.
    ///
    /// This function can only be called from inside of the [`Rp100`] struct.
    fn new(idx: usize, device: Arc<Mutex<Device<T>>>, limits: Arc<Mutex<VoltageLimits>>) -> Self {
        Channel {
            idx,
            device,
            limits,
        }
    }

    /// Switch the output relay of this channel on or off.
    pub fn set_output(&mut self, on: bool) -> Result<(), DeviceError> {
        self.sendcmd("Set output relay", if on { "1" } else { "0" })
    }

    /// Get the state of the output relay of this channel.
    pub fn get_output(&mut self) -> Result<bool, DeviceError> {
        let resp = self.query("Query output relay")?;
        match resp.to_ascii_uppercase().as_str() {
            "1" | "ON" => Ok(true),
            "0" | "OFF" => Ok(false),
            _ => Err(DeviceError::ResponseParseError(resp)),
        }
    }

    /// Set the output voltage of this channel.
    ///
    /// The instrument ramps to the new voltage with the slew rate of the channel. The voltage
    /// must be within the active [`VoltageLimits`], otherwise nothing is sent.
    pub fn set_voltage(&mut self, voltage: Voltage) -> Result<(), DeviceError> {
        let limits = *self.limits.lock().expect("Mutex should not be poisoned");
        limits.check(voltage)?;
        self.sendcmd("Set output voltage", &voltage.as_volts().to_string())
    }

    /// Get the present output voltage of this channel, which may still be ramping.
    pub fn get_voltage(&mut self) -> Result<Voltage, DeviceError> {
        Ok(Voltage::from_volts(self.query_f64("Query output voltage")?))
    }

    /// Get the voltage setpoint of this channel.
    pub fn get_setpoint(&mut self) -> Result<Voltage, DeviceError> {
        Ok(Voltage::from_volts(self.query_f64("Query output setpoint")?))
    }

    /// Set the voltage slew rate of this channel in V/s.
    ///
    /// The slew rate must be between 0 and 10 V/s, otherwise nothing is sent.
    pub fn set_slew_rate(&mut self, rate: f64) -> Result<(), DeviceError> {
        check_range(rate, SLEW_RATE_RANGE.0, SLEW_RATE_RANGE.1)?;
        self.sendcmd("Set voltage slew rate", &rate.to_string())
    }

    /// Get the voltage slew rate of this channel in V/s.
    pub fn get_slew_rate(&mut self) -> Result<f64, DeviceError> {
        self.query_f64("Query voltage slew rate")
    }

    /// Measure the output voltage of this channel.
    pub fn measure_voltage(&mut self) -> Result<Voltage, DeviceError> {
        Ok(Voltage::from_volts(
            self.query_f64("Measure output voltage")?,
        ))
    }

    /// Measure the output current of this channel.
    pub fn measure_current(&mut self) -> Result<Current, DeviceError> {
        Ok(Current::from_amperes(
            self.query_f64("Measure output current")?,
        ))
    }

    /// The channel number as it is sent to the instrument.
    fn channel_number(&self) -> usize {
        self.idx + 1
    }

    /// Send a command with an argument for this channel.
    fn sendcmd(&mut self, name: &str, argument: &str) -> Result<(), DeviceError> {
        let mut device = lock(&self.device);
        let cmd = device.format_command(name, Some(self.channel_number()), Some(argument))?;
        device.write(&cmd)
    }

    /// Query the instrument with a command for this channel. Empty replies are errors.
    fn query(&mut self, name: &str) -> Result<String, DeviceError> {
        let mut device = lock(&self.device);
        let cmd = device.format_command(name, Some(self.channel_number()), None)?;
        non_empty(device.query(&cmd))
    }

    /// Query the instrument and parse the reply as float.
    fn query_f64(&mut self, name: &str) -> Result<f64, DeviceError> {
        let resp = self.query(name)?;
        resp.parse::<f64>()
            .map_err(|_| DeviceError::ResponseParseError(resp))
    }
}

impl<T: Transport> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            idx: self.idx,
            device: self.device.clone(),
            limits: self.limits.clone(),
        }
    }
}

fn lock<T: Transport>(device: &Mutex<Device<T>>) -> MutexGuard<'_, Device<T>> {
    device.lock().expect("Mutex should not be poisoned")
}

/// An empty reply means the instrument did not answer.
fn non_empty(resp: String) -> Result<String, DeviceError> {
    if resp.is_empty() {
        Err(DeviceError::ResponseParseError(resp))
    } else {
        Ok(resp)
    }
}

fn check_range(value: f64, min: f64, max: f64) -> Result<(), DeviceError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(DeviceError::FloatValueOutOfRange { value, min, max })
    }
}
