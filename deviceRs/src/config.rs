//! Connection configuration for devices.
//!
//! A [`ConnectionConfig`] is a flat record of all communication parameters of one instrument. It
//! can be built in code with the `with_*` setters or read from a TOML document. Optional keys have
//! explicit defaults: a timeout of [`DEFAULT_TIMEOUT`], the terminator [`DEFAULT_TERMINATOR`],
//! UTF-8 encoding, and parity checking with [`Parity::None`].
//!
//! ```
//! use std::time::Duration;
//! use devicers::{ConnectionConfig, ErrorScheme, Protocol};
//!
//! let config = ConnectionConfig::from_toml_str(
//!     r#"
//!     protocol = "RS232"
//!     address = "/dev/ttyUSB0"
//!     baud = 9600
//!     byte_size = 8
//!     stop_bits = 1
//!     timeout = 0.5
//!     error_scheme = { scheme = "handshake", expected = "OK", confirm = "GO" }
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.protocol, Protocol::Rs232);
//! assert_eq!(config.timeout, Duration::from_millis(500));
//! assert_eq!(config.terminator, "\r\n");
//! assert_eq!(
//!     config.error_scheme,
//!     ErrorScheme::Handshake {
//!         expected: "OK".to_string(),
//!         confirm: "GO".to_string()
//!     }
//! );
//! ```

use std::{fmt, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Timeout for every read and write if none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Line terminator that is appended to every command if none is configured.
pub const DEFAULT_TERMINATOR: &str = "\r\n";

/// Errors that occur while reading or validating a connection configuration.
///
/// All of these are raised when a transport is constructed, never when it is used.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required key is missing. Contains the name of the key.
    #[error("Missing \"{0}\" key in the connection configuration.")]
    MissingKey(&'static str),
    /// A key holds a value that is not allowed.
    #[error("Invalid value for \"{key}\": {reason}")]
    InvalidValue {
        /// Name of the offending key.
        key: &'static str,
        /// Description of what is wrong with the value.
        reason: String,
    },
    /// The value is valid in general but cannot be expressed by the selected backend.
    #[error("{0} is not supported by this backend.")]
    Unsupported(String),
    /// The TOML document could not be parsed into a configuration.
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    /// The configuration file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The protocol tag that selects the transport of a device.
///
/// Parsing is case-insensitive. Any tag that is not recognized becomes [`Protocol::Custom`], which
/// falls back to a [`crate::CustomTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Protocol {
    /// RS-232 serial communication via the `serialport` crate. Tags: `RS232`, `serial`.
    Rs232,
    /// GPIB communication via VISA. Tag: `GPIB`.
    Gpib,
    /// Serial communication through a VISA session. Tags: `Serial_VISA`, `visa`.
    SerialVisa,
    /// Any other protocol. Contains the tag as given.
    Custom(String),
}

impl From<&str> for Protocol {
    fn from(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "rs232" | "serial" => Protocol::Rs232,
            "gpib" => Protocol::Gpib,
            "serial_visa" | "visa" => Protocol::SerialVisa,
            _ => Protocol::Custom(tag.to_string()),
        }
    }
}

impl From<String> for Protocol {
    fn from(tag: String) -> Self {
        Protocol::from(tag.as_str())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Rs232 => write!(f, "RS232"),
            Protocol::Gpib => write!(f, "GPIB"),
            Protocol::SerialVisa => write!(f, "Serial_VISA"),
            Protocol::Custom(tag) => write!(f, "{tag}"),
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum ByteSize {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    Eight,
}

impl TryFrom<u8> for ByteSize {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(ByteSize::Five),
            6 => Ok(ByteSize::Six),
            7 => Ok(ByteSize::Seven),
            8 => Ok(ByteSize::Eight),
            _ => Err(ConfigError::InvalidValue {
                key: "byte_size",
                reason: format!("{value} is not in the range 5-8"),
            }),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "f64")]
pub enum StopBits {
    /// One stop bit.
    One,
    /// One and a half stop bits.
    OnePointFive,
    /// Two stop bits.
    Two,
}

impl TryFrom<f64> for StopBits {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(StopBits::One)
        } else if value == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if value == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(ConfigError::InvalidValue {
                key: "stop_bits",
                reason: format!("{value} must be 1, 1.5, or 2"),
            })
        }
    }
}

/// Parity mode of a serial link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
    /// Parity bit always set.
    Mark,
    /// Parity bit always cleared.
    Space,
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "even" => Ok(Parity::Even),
            "odd" => Ok(Parity::Odd),
            "mark" => Ok(Parity::Mark),
            "space" => Ok(Parity::Space),
            _ => Err(ConfigError::InvalidValue {
                key: "parity",
                reason: format!("{s:?} must be one of none, even, odd, mark, space"),
            }),
        }
    }
}

impl TryFrom<String> for Parity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Text encoding used to turn commands into bytes and replies back into strings.
///
/// Characters that cannot be represented in the selected encoding are sent as `?`. Replies are
/// decoded lossily.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Encoding {
    /// UTF-8. Labels: `utf-8`, `utf8`.
    #[default]
    Utf8,
    /// 7-bit ASCII. Labels: `ascii`, `us-ascii`.
    Ascii,
    /// ISO 8859-1. Labels: `latin-1`, `latin1`, `iso-8859-1`.
    Latin1,
}

impl Encoding {
    /// Encode a string into bytes.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Decode bytes into a string, replacing invalid data with `U+FFFD`.
    pub fn decode(&self, data: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Encoding::Ascii => data
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Encoding::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "ascii" | "us-ascii" => Ok(Encoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            _ => Err(ConfigError::InvalidValue {
                key: "encoding",
                reason: format!("{s:?} is not a supported encoding"),
            }),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The error detection scheme that is used to verify a transmission.
///
/// In TOML, the scheme is given as an inline table, e.g.,
/// `{ scheme = "parity", parity = "even" }` or
/// `{ scheme = "handshake", expected = "OK", confirm = "GO" }`. An empty scheme tag selects
/// parity checking without a parity bit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawErrorScheme")]
pub enum ErrorScheme {
    /// The parity bit of the serial link detects errors, no extra round trip is needed.
    Parity(Parity),
    /// After each transmission, the instrument replies with `expected`, which the host confirms
    /// by sending `confirm`.
    Handshake {
        /// The acknowledgement line the instrument sends after receiving a command.
        expected: String,
        /// The confirmation command that is sent after a matching acknowledgement.
        confirm: String,
    },
    /// A scheme that is not known. Verification with this scheme always fails.
    Unsupported(String),
}

impl Default for ErrorScheme {
    fn default() -> Self {
        ErrorScheme::Parity(Parity::None)
    }
}

#[derive(Deserialize)]
struct RawErrorScheme {
    #[serde(default)]
    scheme: String,
    parity: Option<String>,
    expected: Option<String>,
    confirm: Option<String>,
}

impl TryFrom<RawErrorScheme> for ErrorScheme {
    type Error = ConfigError;

    fn try_from(raw: RawErrorScheme) -> Result<Self, Self::Error> {
        match raw.scheme.to_ascii_lowercase().as_str() {
            "" => Ok(ErrorScheme::default()),
            "parity" => {
                let parity = raw.parity.ok_or(ConfigError::MissingKey("parity"))?;
                Ok(ErrorScheme::Parity(parity.parse()?))
            }
            "handshake" => Ok(ErrorScheme::Handshake {
                expected: raw.expected.ok_or(ConfigError::MissingKey("expected"))?,
                confirm: raw.confirm.ok_or(ConfigError::MissingKey("confirm"))?,
            }),
            _ => Ok(ErrorScheme::Unsupported(raw.scheme)),
        }
    }
}

/// The connection configuration of a device.
///
/// `protocol` and `address` are always required. The RS-232 transport additionally requires
/// `baud`, `byte_size`, and `stop_bits`. All other keys have defaults. Validation happens when a
/// transport is constructed from the configuration, see [`ConnectionConfig::validate`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    /// Protocol tag that selects the transport.
    pub protocol: Protocol,
    /// Port name, e.g., `"/dev/ttyUSB0"` or `"COM3"`, or VISA resource name.
    pub address: String,
    /// Baud rate of a serial link.
    pub baud: Option<u32>,
    /// Data bits of a serial link.
    pub byte_size: Option<ByteSize>,
    /// Stop bits of a serial link.
    pub stop_bits: Option<StopBits>,
    /// Error detection scheme used by the serial transport.
    #[serde(default)]
    pub error_scheme: ErrorScheme,
    /// Timeout of every read and write operation. In TOML given in seconds.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_seconds")]
    pub timeout: Duration,
    /// Terminator that is appended to every command.
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Text encoding of commands and replies.
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_terminator() -> String {
    DEFAULT_TERMINATOR.to_string()
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| serde::de::Error::custom(format!("invalid timeout of {secs} seconds")))
}

impl ConnectionConfig {
    /// Create a new configuration with the given protocol and address and all defaults set.
    ///
    /// Serial parameters are not set and must be added with the `with_*` setters if the RS-232
    /// transport is used.
    pub fn new(protocol: impl Into<Protocol>, address: &str) -> Self {
        ConnectionConfig {
            protocol: protocol.into(),
            address: address.to_string(),
            baud: None,
            byte_size: None,
            stop_bits: None,
            error_scheme: ErrorScheme::default(),
            timeout: DEFAULT_TIMEOUT,
            terminator: DEFAULT_TERMINATOR.to_string(),
            encoding: Encoding::default(),
        }
    }

    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    /// Read a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Set the baud rate.
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    /// Set the number of data bits.
    pub fn with_byte_size(mut self, byte_size: ByteSize) -> Self {
        self.byte_size = Some(byte_size);
        self
    }

    /// Set the number of stop bits.
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = Some(stop_bits);
        self
    }

    /// Set the error detection scheme.
    pub fn with_error_scheme(mut self, error_scheme: ErrorScheme) -> Self {
        self.error_scheme = error_scheme;
        self
    }

    /// Set the timeout of each read and write operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the terminator that is appended to each command.
    pub fn with_terminator(mut self, terminator: &str) -> Self {
        self.terminator = terminator.to_string();
        self
    }

    /// Set the text encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Return the serial parameters baud rate, byte size, and stop bits, or fail with the first
    /// one that is missing.
    pub fn serial_parameters(&self) -> Result<(u32, ByteSize, StopBits), ConfigError> {
        Ok((
            self.baud.ok_or(ConfigError::MissingKey("baud"))?,
            self.byte_size.ok_or(ConfigError::MissingKey("byte_size"))?,
            self.stop_bits.ok_or(ConfigError::MissingKey("stop_bits"))?,
        ))
    }

    /// Validate the configuration for its protocol.
    ///
    /// The address must not be empty and the timeout must be larger than zero. RS-232 requires
    /// the serial parameters and, like VISA serial sessions, a non-empty terminator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::MissingKey("address"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "timeout",
                reason: "must be larger than zero".to_string(),
            });
        }
        if self.protocol == Protocol::Rs232 {
            self.serial_parameters()?;
        }
        if matches!(self.protocol, Protocol::Rs232 | Protocol::SerialVisa)
            && self.terminator.is_empty()
        {
            return Err(ConfigError::InvalidValue {
                key: "terminator",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_substitutes_unrepresentable() {
        assert_eq!(Encoding::Ascii.encode("5µA"), b"5?A");
        assert_eq!(Encoding::Latin1.encode("5µA"), vec![b'5', 0xb5, b'A']);
        assert_eq!(Encoding::Latin1.encode("€"), b"?");
    }

    #[test]
    fn test_encoding_decode_lossy() {
        assert_eq!(Encoding::Latin1.decode(&[b'5', 0xb5, b'A']), "5µA");
        assert_eq!(Encoding::Ascii.decode(&[b'5', 0xb5]), "5\u{FFFD}");
        assert_eq!(Encoding::Utf8.decode(&[b'5', 0xff]), "5\u{FFFD}");
    }

    #[test]
    fn test_protocol_tags() {
        assert_eq!(Protocol::from("rs232"), Protocol::Rs232);
        assert_eq!(Protocol::from("Serial_VISA"), Protocol::SerialVisa);
        assert_eq!(Protocol::from("GPIB"), Protocol::Gpib);
        assert_eq!(
            Protocol::from("LabJack"),
            Protocol::Custom("LabJack".to_string())
        );
        assert_eq!(Protocol::SerialVisa.to_string(), "Serial_VISA");
    }

    #[test]
    fn test_stop_bits_from_float() {
        assert_eq!(StopBits::try_from(1.5).unwrap(), StopBits::OnePointFive);
        assert!(StopBits::try_from(3.0).is_err());
    }
}
