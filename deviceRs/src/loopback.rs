//! The loopback module provides an instrument simulator for testing purposes.
//!
//! The [`LoopbackPort`] allows to test transports and instrument drivers that communicate using
//! strings (which are then encoded as bytes of course) and have a fixed terminator to declare the
//! end of a line.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{DeviceError, Port, PortOpener};

/// A self-incrementing index structure that by default starts at 0 and increments whenever `next`
/// is called.
#[derive(Debug, Default)]
struct IncrIndex {
    index: usize,
}

impl IncrIndex {
    fn next(&mut self) -> usize {
        let current = self.index;
        self.index += 1;
        current
    }

    fn current(&self) -> usize {
        self.index
    }
}

/// The shared script of a loopback port.
#[derive(Debug)]
struct Script {
    from_host: Vec<String>,
    from_inst: Vec<String>,
    terminator_exp: String,
    from_host_index: IncrIndex,
    from_inst_index: IncrIndex,
    curr_bytes: VecDeque<u8>,
    opens: usize,
    writes: usize,
}

impl Script {
    /// Get the next command from host to instrument including the terminator, or panic.
    fn next_from_host_with_terminator(&mut self) -> String {
        let cmd = self
            .from_host
            .get(self.from_host_index.next())
            .expect("No more commands were expected from host to instrument.");
        format!("{cmd}{}", self.terminator_exp)
    }

    /// Get the next reply from instrument to host including the terminator, or panic.
    fn next_from_inst_with_terminator(&mut self) -> String {
        let reply = self
            .from_inst
            .get(self.from_inst_index.next())
            .expect("No more replies were expected from instrument to host.");
        format!("{reply}{}", self.terminator_exp)
    }
}

/// A scripted port that allows you to simply write tests for transports and instrument drivers.
///
/// You provide the commands that are expected to go from the host to the instrument and the
/// replies that the instrument sends back, both without terminator. The expected terminator is
/// appended to each of them. Whenever something is written that is not expected, or more is read
/// than was scripted, the port panics. When the last handle of a port is dropped, it checks that
/// the whole script was used up and panics otherwise, see [`LoopbackPort::finalize`]. An empty
/// reply models an instrument that only sends the terminator, e.g., after a timeout.
///
/// Clones of a port share the same script. The port also implements [`PortOpener`], which hands
/// out clones and counts how often a connection was opened. This way, a test can keep a handle to
/// inspect the port while a transport owns another one.
///
/// # Example
///
/// ```
/// use devicers::{ConnectionConfig, LoopbackPort, Protocol, Transport, VisaTransport};
///
/// let port = LoopbackPort::new(vec!["*IDN?"], vec!["RAZORBILL,RP100,123,1.0"], "\n");
/// let config = ConnectionConfig::new(Protocol::SerialVisa, "ASRL5::INSTR").with_terminator("\n");
/// let mut transport = VisaTransport::from_port(&config, port.clone()).unwrap();
///
/// assert_eq!(transport.query("*IDN?"), "RAZORBILL,RP100,123,1.0");
/// assert_eq!(port.writes(), 1);
/// ```
#[derive(Debug)]
pub struct LoopbackPort {
    script: Arc<Mutex<Script>>,
}

impl LoopbackPort {
    /// Create a new loopback port with given commands to and from instrument.
    ///
    /// # Arguments:
    /// * `from_host` - Commands from host to instrument.
    /// * `from_inst` - Replies from instrument to host.
    /// * `terminator_exp` - The expected terminator, appended to all of the above.
    pub fn new<S: Into<String>>(from_host: Vec<S>, from_inst: Vec<S>, terminator_exp: &str) -> Self {
        let script = Script {
            from_host: from_host.into_iter().map(Into::into).collect(),
            from_inst: from_inst.into_iter().map(Into::into).collect(),
            terminator_exp: terminator_exp.to_string(),
            from_host_index: IncrIndex::default(),
            from_inst_index: IncrIndex::default(),
            curr_bytes: VecDeque::new(),
            opens: 0,
            writes: 0,
        };
        LoopbackPort {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Number of connections opened through the [`PortOpener`] implementation.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Number of writes that were received from the host.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// This command panics if not all commands in the [`LoopbackPort`] have been used.
    ///
    /// It is automatically called when the last handle of the port is dropped, but you can also
    /// call it manually to ensure that all commands have been used.
    pub fn finalize(&self) {
        let script = self.lock();
        if let Some(fil) = script.from_host.get(script.from_host_index.current()) {
            panic!("Leftover expected commands found from host to instrument: {fil}");
        }
        if let Some(fil) = script.from_inst.get(script.from_inst_index.current()) {
            panic!("Leftover expected replies found from instrument to host: {fil}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .expect("Loopback script mutex should not be poisoned")
    }
}

impl Clone for LoopbackPort {
    fn clone(&self) -> Self {
        LoopbackPort {
            script: Arc::clone(&self.script),
        }
    }
}

impl Read for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut script = self.lock();
        if script.curr_bytes.is_empty() {
            let next = script.next_from_inst_with_terminator();
            script.curr_bytes = next.into_bytes().into();
        }
        let n = buf.len().min(script.curr_bytes.len());
        for (slot, byte) in buf.iter_mut().zip(script.curr_bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut script = self.lock();
        let exp = script.next_from_host_with_terminator();
        script.writes += 1;
        assert_eq!(
            exp.as_bytes(),
            buf,
            "Expected sendcmd '{0:?}', got '{1:?}'",
            exp,
            String::from_utf8_lossy(buf)
        );
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PortOpener for LoopbackPort {
    fn open(&self) -> Result<Box<dyn Port>, DeviceError> {
        self.lock().opens += 1;
        Ok(Box::new(self.clone()))
    }
}

impl Drop for LoopbackPort {
    fn drop(&mut self) {
        if Arc::strong_count(&self.script) == 1 && !std::thread::panicking() {
            self.finalize();
        }
    }
}
