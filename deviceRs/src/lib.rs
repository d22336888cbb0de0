//! DeviceRs: Talk to command-table driven laboratory instruments from Rust
//!
//! DeviceRs provides a small framework for instruments such as power supplies that are controlled
//! by sending plain text commands over RS-232, GPIB, or a VISA serial session. It is made up of
//! three layers:
//!
//! - A [`ConnectionConfig`] that describes how to reach an instrument: protocol, address, serial
//!   parameters, error detection scheme, timeout, terminator, and text encoding. It can be built in
//!   code or read from TOML.
//! - The [`Transport`] trait and its implementations that move bytes to and from the instrument.
//!   The [`SerialTransport`] masks transient failures with a bounded retry loop and optional
//!   handshake verification.
//! - A [`Device`] that holds the command table of an instrument, passes reads, writes, and queries
//!   through to its transport, and polls status commands.
//!
//! Instrument drivers compose a [`Device`] and add their own convenience methods with validated
//! ranges. Have a look at the `razorbill_rp100` crate in this repository for an example.
//!
//! # Soft failures
//!
//! Reading and querying never fail. If the instrument is absent, the bus is disconnected, a
//! timeout occurs, or all retries are exhausted, the reply is an empty string. Callers must treat
//! an empty reply as "unknown". Writing and configuration errors, on the other hand, are returned
//! as [`DeviceError`].
//!
//! # Example
//!
//! ```no_run
//! use devicers::{ByteSize, CommandTable, ConnectionConfig, Device, Protocol, StopBits};
//!
//! let config = ConnectionConfig::new(Protocol::Rs232, "/dev/ttyUSB0")
//!     .with_baud(9600)
//!     .with_byte_size(ByteSize::Eight)
//!     .with_stop_bits(StopBits::One);
//! let commands = CommandTable::new()
//!     .with("Identify", "*IDN?", false)
//!     .with("Output voltage", "SOUR1:VOLT:NOW?", true);
//!
//! let mut device = Device::from_config("PSU", &config, commands).unwrap();
//! println!("{}", device.query("*IDN?"));
//! println!("{}", device.get_status());
//! ```
//!
//! # License
//!
//! Licensed under either of
//!
//! - Apache License, Version 2.0 ([LICENSE-APACHE](http://www.apache.org/licenses/LICENSE-2.0))
//! - MIT license ([LICENSE-MIT](http://opensource.org/licenses/MIT))
//!
//! at your option.

#![warn(missing_docs)]

mod commands;
mod config;
mod custom;
mod device;
mod line;
mod loopback;
mod serial;
mod status;
mod transport;
mod visa;

pub use commands::{Command, CommandTable};
pub use config::{
    ByteSize, ConfigError, ConnectionConfig, DEFAULT_TERMINATOR, DEFAULT_TIMEOUT, Encoding,
    ErrorScheme, Parity, Protocol, StopBits,
};
pub use custom::CustomTransport;
pub use device::{Device, DeviceDefinition};
pub use line::{LineInterface, Port};
pub use loopback::LoopbackPort;
#[cfg(feature = "serial")]
pub use serial::SerialPortOpener;
pub use serial::{MAX_ATTEMPTS, PortOpener, SerialTransport};
pub use status::StatusSnapshot;
pub use transport::{AnyTransport, Transport, open_transport};
pub use visa::{VisaKind, VisaTransport};

use thiserror::Error;

/// The error enum for all devices and transports.
///
/// Note that reading from and querying a transport never return this error. These failures are
/// turned into empty replies. Everything else, i.e., writing, configuring, formatting commands,
/// and parsing replies in instrument drivers, returns a `DeviceError` such that errors propagate
/// nicely with the `?` operator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// The channel index requested is out of range.
    #[error(
        "Channel with index {idx} is out of range. Number of channels available: {nof_channels}"
    )]
    ChannelIndexOutOfRange {
        /// Index of the channel that is out of range.
        idx: usize,
        /// Total number of channels.
        nof_channels: usize,
    },
    /// The connection configuration is incomplete or invalid. See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A given float value is out of the specified range.
    #[error("Float value {value} is out of range. Allowed range is [{min}, {max}]")]
    FloatValueOutOfRange {
        /// The value that is out of range.
        value: f64,
        /// The minimum value that is allowed.
        min: f64,
        /// The maximum value that is allowed.
        max: f64,
    },
    /// The requested interface is not available in this build, e.g., because a cargo feature is
    /// disabled.
    #[error("Interface not supported: {0}")]
    InterfaceNotSupported(String),
    /// An argument was passed that the command cannot take. Contains a message for the user.
    #[error("{0}")]
    InvalidArgument(String),
    /// Error when reading from/writing to an interface. See [`std::io::Error`] for more details.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A command contains a placeholder but no value was given to substitute it.
    #[error("Command \"{command}\" requires a value for the placeholder {placeholder}")]
    MissingArgument {
        /// Name of the command in the command table.
        command: String,
        /// The placeholder that could not be substituted.
        placeholder: String,
    },
    /// The transport has no open connection, e.g., it was closed or never attached.
    #[error("Transport is not connected: {0}")]
    NotConnected(String),
    /// Instrument response could not be parsed because it was unexpected by the driver. This
    /// includes empty replies. The error contains the response that was received.
    #[error("Response from instrument could not be parsed. Response was: {0:?}")]
    ResponseParseError(String),
    /// Serial port errors can occur when opening a serial interface. See the [`serialport::Error`]
    /// documentation for more information.
    #[cfg(feature = "serial")]
    #[error(transparent)]
    Serialport(#[from] serialport::Error),
    /// The command name is not part of the command table of the device.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    /// The VISA library reported an error. Contains the message of the library.
    #[error("VISA error: {0}")]
    Visa(String),
}
