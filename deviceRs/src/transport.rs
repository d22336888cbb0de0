//! The transport abstraction and the selection of a transport from a configuration.

use log::warn;

use crate::{
    ConnectionConfig, CustomTransport, DeviceError, Protocol, SerialTransport, VisaTransport,
    config::Encoding,
};

/// The `Transport` trait defines how a [`crate::Device`] talks to its instrument.
///
/// Reading and querying are best effort: failures of the underlying connection are logged and
/// result in an empty string. An empty reply can therefore mean that the instrument is absent,
/// that a timeout occurred, or that the instrument legitimately replied with an empty line.
pub trait Transport {
    /// The terminator that is appended to each command.
    fn terminator(&self) -> &str;

    /// The text encoding of commands and replies. Defaults to UTF-8.
    fn encoding(&self) -> Encoding {
        Encoding::Utf8
    }

    /// Append the terminator to a message and encode it into the bytes sent over the wire.
    fn build(&self, message: &str) -> Vec<u8> {
        self.encoding().encode(&format!("{message}{}", self.terminator()))
    }

    /// Send a message to the instrument without waiting for a reply.
    ///
    /// # Arguments
    /// * `message` - The command, without terminator.
    fn write(&mut self, message: &str) -> Result<(), DeviceError>;

    /// Read one reply from the instrument. Returns an empty string on failure.
    fn read(&mut self) -> String;

    /// Send a message to the instrument and return its reply. Returns an empty string on
    /// failure.
    ///
    /// # Arguments
    /// * `message` - The command, without terminator.
    fn query(&mut self, message: &str) -> String;

    /// Close the connection to the instrument, if the transport keeps one open.
    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// A transport that was selected from a [`ConnectionConfig`] by its protocol tag.
pub enum AnyTransport {
    /// RS-232 with scoped connections and retries.
    Serial(SerialTransport),
    /// GPIB via VISA.
    Gpib(VisaTransport),
    /// Serial via VISA.
    SerialVisa(VisaTransport),
    /// A user supplied stream for any other protocol.
    Custom(CustomTransport),
}

impl AnyTransport {
    /// Get the custom transport, e.g., in order to attach a stream to it.
    pub fn as_custom_mut(&mut self) -> Option<&mut CustomTransport> {
        match self {
            AnyTransport::Custom(custom) => Some(custom),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn Transport {
        match self {
            AnyTransport::Serial(t) => t,
            AnyTransport::Gpib(t) | AnyTransport::SerialVisa(t) => t,
            AnyTransport::Custom(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Transport {
        match self {
            AnyTransport::Serial(t) => t,
            AnyTransport::Gpib(t) | AnyTransport::SerialVisa(t) => t,
            AnyTransport::Custom(t) => t,
        }
    }
}

impl Transport for AnyTransport {
    fn terminator(&self) -> &str {
        self.inner().terminator()
    }

    fn encoding(&self) -> Encoding {
        self.inner().encoding()
    }

    fn build(&self, message: &str) -> Vec<u8> {
        self.inner().build(message)
    }

    fn write(&mut self, message: &str) -> Result<(), DeviceError> {
        self.inner_mut().write(message)
    }

    fn read(&mut self) -> String {
        self.inner_mut().read()
    }

    fn query(&mut self, message: &str) -> String {
        self.inner_mut().query(message)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.inner_mut().close()
    }
}

/// Open the transport that the protocol tag of the configuration selects.
///
/// The configuration is validated first, such that missing keys and invalid values fail here and
/// not on the first query. Unknown protocols fall back to a detached [`CustomTransport`] and a
/// warning is logged.
pub fn open_transport(config: &ConnectionConfig) -> Result<AnyTransport, DeviceError> {
    match &config.protocol {
        Protocol::Rs232 => open_serial(config),
        Protocol::Gpib => Ok(AnyTransport::Gpib(VisaTransport::try_new(config)?)),
        Protocol::SerialVisa => Ok(AnyTransport::SerialVisa(VisaTransport::try_new(config)?)),
        Protocol::Custom(tag) => {
            warn!(
                "Protocol {tag:?} is not known, falling back to a custom transport. Attach a stream to it before use."
            );
            Ok(AnyTransport::Custom(CustomTransport::new(config)?))
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(config: &ConnectionConfig) -> Result<AnyTransport, DeviceError> {
    Ok(AnyTransport::Serial(SerialTransport::try_new(config)?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(config: &ConnectionConfig) -> Result<AnyTransport, DeviceError> {
    config.validate()?;
    Err(DeviceError::InterfaceNotSupported(
        "RS232 requires the `serial` feature of devicers".to_string(),
    ))
}
