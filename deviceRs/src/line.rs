//! Line framing on top of any byte port.
//!
//! [`LineInterface`] can be built with any type that implements [`std::io::Read`] and
//! [`std::io::Write`], such as [`std::net::TcpStream`] or a boxed `serialport::SerialPort`. All
//! transports of this crate use it to append terminators, encode commands, and read replies.

use std::{
    io::{ErrorKind, Read, Write},
    time::{Duration, Instant},
};

use log::trace;

use crate::{DeviceError, config::Encoding};

/// A byte port that transports can talk through.
///
/// This is implemented for everything that implements [`Read`] and [`Write`].
pub trait Port: Read + Write {}

impl<P: Read + Write> Port for P {}

/// Size of the buffer used by [`LineInterface::read_message`].
const MESSAGE_CHUNK: usize = 1024;

/// A line oriented interface around a byte port.
///
/// Commands are sent with the terminator appended and encoded with the configured encoding.
/// Replies are read until a newline, the end of the stream, or the timeout, and are returned with
/// surrounding whitespace stripped. A timeout never raises an error, it simply results in a short
/// or empty reply.
///
/// # Example
///
/// ```
/// use std::{collections::VecDeque, time::Duration};
/// use devicers::{Encoding, LineInterface};
///
/// let port = VecDeque::<u8>::new();
/// let mut line = LineInterface::new(port, "\n", Encoding::Utf8, Duration::from_secs(1));
/// line.send("12.50").unwrap();
/// assert_eq!(line.read_line().unwrap(), "12.50");
/// ```
#[derive(Debug)]
pub struct LineInterface<P: Read + Write> {
    port: P,
    terminator: String,
    encoding: Encoding,
    timeout: Duration,
}

impl<P: Read + Write> LineInterface<P> {
    /// Create a new line interface around a port.
    pub fn new(port: P, terminator: &str, encoding: Encoding, timeout: Duration) -> Self {
        Self {
            port,
            terminator: terminator.to_string(),
            encoding,
            timeout,
        }
    }

    /// The terminator that is appended to every command.
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// The timeout for reading a reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append the terminator to the message and encode it.
    pub fn build(&self, message: &str) -> Vec<u8> {
        self.encoding.encode(&format!("{message}{}", self.terminator))
    }

    /// Write raw bytes to the port and flush it.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Build the message and write it to the port.
    pub fn send(&mut self, message: &str) -> Result<(), DeviceError> {
        let data = self.build(message);
        trace!("Sending {:?}", self.encoding.decode(&data));
        self.write_raw(&data)
    }

    /// Read one line byte by byte until a newline is found.
    ///
    /// Reading stops early at the end of the stream, when the port times out, or when the timeout
    /// of this interface has elapsed. Whatever has been received until then is returned. Reading
    /// byte by byte ensures that nothing after the newline is consumed from the port.
    pub fn read_line(&mut self) -> Result<String, DeviceError> {
        let mut raw = Vec::new();
        let mut single_buf = [0u8];

        let tic = Instant::now();
        while tic.elapsed() < self.timeout {
            match self.port.read(&mut single_buf) {
                Ok(0) => break,
                Ok(_) => {
                    raw.push(single_buf[0]);
                    if single_buf[0] == b'\n' {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let line = self.encoding.decode(&raw);
        trace!("Received {line:?}");
        Ok(line.trim().to_string())
    }

    /// Read one message in chunks.
    ///
    /// This is meant for message based sessions such as VISA, where one read returns at most one
    /// message. Reading stops when a chunk ends with a newline or is not completely filled.
    pub fn read_message(&mut self) -> Result<String, DeviceError> {
        let mut raw = Vec::new();
        let mut chunk = [0u8; MESSAGE_CHUNK];

        let tic = Instant::now();
        while tic.elapsed() < self.timeout {
            match self.port.read(&mut chunk) {
                Ok(n) => {
                    raw.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() || raw.ends_with(b"\n") {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let message = self.encoding.decode(&raw);
        trace!("Received {message:?}");
        Ok(message.trim().to_string())
    }

    /// Consume the interface and return the port.
    pub fn into_inner(self) -> P {
        self.port
    }
}
