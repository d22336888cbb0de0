//! A transport for protocols that this crate does not know.
//!
//! The stream is supplied by the user, for example a [`std::net::TcpStream`] to a serial to
//! ethernet bridge.

use std::{
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::warn;

use crate::{ConnectionConfig, DeviceError, LineInterface, Port, Transport, config::Encoding};

/// A line based transport around a user supplied stream.
///
/// The transport is created detached. Until a stream is attached, writes fail with
/// [`DeviceError::NotConnected`] and reads and queries return an empty string.
///
/// ```no_run
/// use devicers::{ConnectionConfig, CustomTransport, Transport};
///
/// let config = ConnectionConfig::new("bridge", "192.168.1.20:4001").with_terminator("\n");
/// let mut transport = CustomTransport::new(&config).unwrap();
/// transport.connect_tcp("192.168.1.20:4001").unwrap();
/// println!("{}", transport.query("*IDN?"));
/// ```
pub struct CustomTransport {
    protocol: String,
    terminator: String,
    encoding: Encoding,
    timeout: Duration,
    stream: Option<LineInterface<Box<dyn Port>>>,
}

impl CustomTransport {
    /// Create a new, detached custom transport.
    pub fn new(config: &ConnectionConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        Ok(CustomTransport {
            protocol: config.protocol.to_string(),
            terminator: config.terminator.clone(),
            encoding: config.encoding,
            timeout: config.timeout,
            stream: None,
        })
    }

    /// Attach a stream. A previously attached stream is dropped.
    pub fn attach<P: Port + 'static>(&mut self, port: P) {
        let port: Box<dyn Port> = Box::new(port);
        self.stream = Some(LineInterface::new(
            port,
            &self.terminator,
            self.encoding,
            self.timeout,
        ));
    }

    /// Connect to a TCP socket and attach it.
    ///
    /// Read and write timeouts of the socket are set to the configured timeout, such that reads
    /// never block forever.
    pub fn connect_tcp<A: ToSocketAddrs>(&mut self, sock_addr: A) -> Result<(), DeviceError> {
        let stream = TcpStream::connect(sock_addr)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_read_timeout(Some(self.timeout))?;
        self.attach(stream);
        Ok(())
    }

    /// Returns `true` if a stream is attached.
    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    /// The protocol tag this transport was created for.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    fn stream(&mut self) -> Result<&mut LineInterface<Box<dyn Port>>, DeviceError> {
        self.stream.as_mut().ok_or_else(|| {
            DeviceError::NotConnected(format!("no stream attached for {}", self.protocol))
        })
    }
}

impl Transport for CustomTransport {
    fn terminator(&self) -> &str {
        &self.terminator
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn write(&mut self, message: &str) -> Result<(), DeviceError> {
        self.stream()?.send(message)
    }

    fn read(&mut self) -> String {
        let result = self.stream().and_then(|stream| stream.read_line());
        result.unwrap_or_else(|err| {
            warn!("Reading via {} failed: {err}", self.protocol);
            String::new()
        })
    }

    fn query(&mut self, message: &str) -> String {
        let result = self.stream().and_then(|stream| {
            stream.send(message)?;
            stream.read_line()
        });
        result.unwrap_or_else(|err| {
            warn!("Query {message:?} via {} failed: {err}", self.protocol);
            String::new()
        })
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.stream = None;
        Ok(())
    }
}
