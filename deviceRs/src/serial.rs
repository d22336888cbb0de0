//! This module provides the transport for instruments controlled via an RS-232 serial port.
//!
//! Every call opens the port through a [`PortOpener`], uses it, and drops it again. The port is
//! therefore never left open across calls, also not if a call fails. With the `serial` feature,
//! [`SerialPortOpener`] opens real ports using the `serialport` crate.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::{
    ConnectionConfig, DeviceError, ErrorScheme, LineInterface, Port, Transport, config::Encoding,
};

/// Number of attempts the serial transport makes to get a reply to a query.
pub const MAX_ATTEMPTS: usize = 3;

/// Opens a fresh connection to a port for the duration of one transport call.
pub trait PortOpener {
    /// Open the port.
    fn open(&self) -> Result<Box<dyn Port>, DeviceError>;
}

/// Opens serial ports with the `serialport` crate.
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    builder: serialport::SerialPortBuilder,
}

#[cfg(feature = "serial")]
impl SerialPortOpener {
    /// Create an opener from the serial parameters of a configuration.
    ///
    /// This fails if a serial parameter is missing or if it cannot be expressed by the
    /// `serialport` crate, which does not support 1.5 stop bits and mark or space parity.
    pub fn try_new(config: &ConnectionConfig) -> Result<Self, DeviceError> {
        use crate::{ConfigError, Parity};

        let (baud, byte_size, stop_bits) = config.serial_parameters()?;
        let data_bits = match byte_size {
            crate::ByteSize::Five => serialport::DataBits::Five,
            crate::ByteSize::Six => serialport::DataBits::Six,
            crate::ByteSize::Seven => serialport::DataBits::Seven,
            crate::ByteSize::Eight => serialport::DataBits::Eight,
        };
        let stop_bits = match stop_bits {
            crate::StopBits::One => serialport::StopBits::One,
            crate::StopBits::Two => serialport::StopBits::Two,
            crate::StopBits::OnePointFive => {
                return Err(ConfigError::Unsupported("1.5 stop bits".to_string()).into());
            }
        };
        // Only a parity scheme sets a parity bit on the link.
        let parity = match config.error_scheme {
            ErrorScheme::Parity(Parity::Even) => serialport::Parity::Even,
            ErrorScheme::Parity(Parity::Odd) => serialport::Parity::Odd,
            ErrorScheme::Parity(mode @ (Parity::Mark | Parity::Space)) => {
                return Err(ConfigError::Unsupported(format!("{mode:?} parity")).into());
            }
            _ => serialport::Parity::None,
        };

        let builder = serialport::new(config.address.as_str(), baud)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(config.timeout);
        Ok(SerialPortOpener { builder })
    }
}

#[cfg(feature = "serial")]
impl PortOpener for SerialPortOpener {
    fn open(&self) -> Result<Box<dyn Port>, DeviceError> {
        let port = self.builder.clone().open()?;
        Ok(Box::new(port))
    }
}

/// A blocking RS-232 transport with error detection and retries.
///
/// Queries are transmitted up to [`MAX_ATTEMPTS`] times. Each attempt sends the command, verifies
/// the transmission according to the [`ErrorScheme`], and reads one line:
///
/// - With a parity scheme, the parity bit of the link already detects errors and verification
///   always succeeds.
/// - With a handshake scheme, one line is read and compared to the expected acknowledgement. If
///   it matches, the confirmation command is sent and verification succeeds.
/// - Any other scheme fails verification.
///
/// The first non-empty line that is read after a successful verification is returned. A failed
/// verification, an empty line, or an I/O error consumes the attempt. After the last attempt, an
/// empty string is returned.
pub struct SerialTransport {
    address: String,
    terminator: String,
    encoding: Encoding,
    timeout: Duration,
    error_scheme: ErrorScheme,
    opener: Box<dyn PortOpener>,
}

impl SerialTransport {
    /// Try to create a new serial transport for the port given in the configuration.
    ///
    /// The configuration is validated but the port is not opened yet.
    #[cfg(feature = "serial")]
    pub fn try_new(config: &ConnectionConfig) -> Result<Self, DeviceError> {
        let opener = SerialPortOpener::try_new(config)?;
        Self::with_opener(config, opener)
    }

    /// Try to create a new serial transport that opens its port with the given opener.
    ///
    /// The configuration must contain the serial parameters even though they are only used by
    /// the opener, such that a configuration that works here also works with a real port.
    pub fn with_opener<O: PortOpener + 'static>(
        config: &ConnectionConfig,
        opener: O,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        config.serial_parameters()?;
        Ok(SerialTransport {
            address: config.address.clone(),
            terminator: config.terminator.clone(),
            encoding: config.encoding,
            timeout: config.timeout,
            error_scheme: config.error_scheme.clone(),
            opener: Box::new(opener),
        })
    }

    /// The error detection scheme of this transport.
    pub fn error_scheme(&self) -> &ErrorScheme {
        &self.error_scheme
    }

    /// Open a scoped connection. It is closed when the returned interface is dropped.
    fn connect(&self) -> Result<LineInterface<Box<dyn Port>>, DeviceError> {
        let port = self.opener.open()?;
        Ok(LineInterface::new(
            port,
            &self.terminator,
            self.encoding,
            self.timeout,
        ))
    }

    /// Verify the last transmission according to the error scheme.
    fn verify(&self, line: &mut LineInterface<Box<dyn Port>>) -> Result<bool, DeviceError> {
        match &self.error_scheme {
            ErrorScheme::Parity(_) => Ok(true),
            ErrorScheme::Handshake { expected, confirm } => {
                let ack = line.read_line()?;
                if &ack == expected {
                    line.send(confirm)?;
                    Ok(true)
                } else {
                    debug!(
                        "Handshake with {} failed, expected {expected:?} got {ack:?}",
                        self.address
                    );
                    Ok(false)
                }
            }
            ErrorScheme::Unsupported(scheme) => {
                debug!("Error scheme {scheme:?} is not supported, rejecting transmission");
                Ok(false)
            }
        }
    }

    /// One attempt of a query: transmit, verify, and read a line.
    ///
    /// Returns `None` if the verification failed or the line was empty.
    fn attempt(
        &self,
        line: &mut LineInterface<Box<dyn Port>>,
        message: &[u8],
    ) -> Result<Option<String>, DeviceError> {
        line.write_raw(message)?;
        if !self.verify(line)? {
            return Ok(None);
        }
        let reply = line.read_line()?;
        Ok((!reply.is_empty()).then_some(reply))
    }
}

impl Transport for SerialTransport {
    fn terminator(&self) -> &str {
        &self.terminator
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn write(&mut self, message: &str) -> Result<(), DeviceError> {
        let mut line = self.connect()?;
        line.send(message)
    }

    fn read(&mut self) -> String {
        let result = self.connect().and_then(|mut line| line.read_line());
        result.unwrap_or_else(|err| {
            warn!("Reading from {} failed: {err}", self.address);
            String::new()
        })
    }

    fn query(&mut self, message: &str) -> String {
        let data = self.build(message);
        let mut line = match self.connect() {
            Ok(line) => line,
            Err(err) => {
                warn!("Could not open {} to query {message:?}: {err}", self.address);
                return String::new();
            }
        };

        for attempt in 1..=MAX_ATTEMPTS {
            trace!("Query {message:?} on {}, attempt {attempt}", self.address);
            match self.attempt(&mut line, &data) {
                Ok(Some(reply)) => return reply,
                Ok(None) => debug!(
                    "Attempt {attempt}/{MAX_ATTEMPTS} of query {message:?} on {} failed",
                    self.address
                ),
                Err(err) => warn!(
                    "Attempt {attempt}/{MAX_ATTEMPTS} of query {message:?} on {} failed: {err}",
                    self.address
                ),
            }
        }

        warn!(
            "No reply to {message:?} from {} after {MAX_ATTEMPTS} attempts",
            self.address
        );
        String::new()
    }
}
