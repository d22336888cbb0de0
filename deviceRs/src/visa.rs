//! Transports for GPIB and serial instruments reached through a VISA library.
//!
//! Sessions are opened with the `visa-rs` crate if the `visa` feature is enabled. Without it,
//! [`VisaTransport::try_new`] fails with [`DeviceError::InterfaceNotSupported`], however, a
//! transport can still be built around any [`Port`] with [`VisaTransport::from_port`].

use log::{debug, warn};

use crate::{
    ConnectionConfig, DeviceError, LineInterface, Port, Protocol, Transport, config::Encoding,
};

/// The kind of VISA session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisaKind {
    /// A GPIB instrument. The end of a message is signalled by the bus, no terminator is sent.
    Gpib,
    /// A serial instrument. The configured terminator is sent with each command.
    Serial,
}

/// A transport that keeps a VISA session open until it is closed.
///
/// Writes append the terminator of the session kind. Reads and queries return the reply stripped
/// of surrounding whitespace, or an empty string if anything goes wrong. There are no retries.
pub struct VisaTransport {
    kind: VisaKind,
    address: String,
    terminator: String,
    encoding: Encoding,
    session: Option<LineInterface<Box<dyn Port>>>,
}

impl VisaTransport {
    /// Try to open a VISA session for the resource given as address in the configuration.
    ///
    /// A `GPIB` protocol results in a GPIB session, everything else in a serial session.
    pub fn try_new(config: &ConnectionConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let port = open_session(config)?;
        Self::from_port(config, port)
    }

    /// Create a VISA transport around an already opened port.
    ///
    /// # Arguments
    /// * `config` - The connection configuration, `protocol` selects the [`VisaKind`].
    /// * `port` - The port to talk through.
    pub fn from_port<P: Port + 'static>(
        config: &ConnectionConfig,
        port: P,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        let (kind, terminator) = match config.protocol {
            Protocol::Gpib => (VisaKind::Gpib, String::new()),
            _ => (VisaKind::Serial, config.terminator.clone()),
        };
        let port: Box<dyn Port> = Box::new(port);
        let session = LineInterface::new(port, &terminator, config.encoding, config.timeout);
        Ok(VisaTransport {
            kind,
            address: config.address.clone(),
            terminator,
            encoding: config.encoding,
            session: Some(session),
        })
    }

    /// The kind of this session.
    pub fn kind(&self) -> VisaKind {
        self.kind
    }

    /// Returns `true` until the transport is closed.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut LineInterface<Box<dyn Port>>, DeviceError> {
        self.session
            .as_mut()
            .ok_or_else(|| DeviceError::NotConnected(self.address.clone()))
    }
}

impl Transport for VisaTransport {
    fn terminator(&self) -> &str {
        &self.terminator
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn write(&mut self, message: &str) -> Result<(), DeviceError> {
        self.session()?.send(message)
    }

    fn read(&mut self) -> String {
        let result = self.session().and_then(|session| session.read_message());
        result.unwrap_or_else(|err| {
            warn!("Reading from {} failed: {err}", self.address);
            String::new()
        })
    }

    fn query(&mut self, message: &str) -> String {
        let result = self.session().and_then(|session| {
            session.send(message)?;
            session.read_message()
        });
        result.unwrap_or_else(|err| {
            warn!("Query {message:?} on {} failed: {err}", self.address);
            String::new()
        })
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.session.take().is_some() {
            debug!("VISA session {} closed", self.address);
        }
        Ok(())
    }
}

/// An open VISA session. The resource manager must outlive the instrument, closing it closes all
/// of its sessions.
#[cfg(feature = "visa")]
struct VisaSession {
    instr: visa_rs::Instrument,
    _rm: visa_rs::DefaultRM,
}

#[cfg(feature = "visa")]
impl std::io::Read for VisaSession {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.instr, buf)
    }
}

#[cfg(feature = "visa")]
impl std::io::Write for VisaSession {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(&mut self.instr, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut self.instr)
    }
}

#[cfg(feature = "visa")]
fn open_session(config: &ConnectionConfig) -> Result<Box<dyn Port>, DeviceError> {
    use std::ffi::CString;

    use visa_rs::prelude::*;

    let rm = DefaultRM::new().map_err(|e| DeviceError::Visa(e.to_string()))?;
    let resource = CString::new(config.address.as_str()).map_err(|_| {
        crate::ConfigError::InvalidValue {
            key: "address",
            reason: "must not contain a NUL byte".to_string(),
        }
    })?;
    let resource = visa_rs::VisaString::from(resource);
    let instr = rm
        .open(&resource, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
        .map_err(|e| DeviceError::Visa(e.to_string()))?;
    debug!("VISA resource {} opened", config.address);
    Ok(Box::new(VisaSession { instr, _rm: rm }))
}

#[cfg(not(feature = "visa"))]
fn open_session(config: &ConnectionConfig) -> Result<Box<dyn Port>, DeviceError> {
    Err(DeviceError::InterfaceNotSupported(format!(
        "{} requires the `visa` feature of devicers",
        config.protocol
    )))
}
