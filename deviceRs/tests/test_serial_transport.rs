//! Tests for the query and retry procedure of the serial transport.

use std::{
    cell::Cell,
    collections::VecDeque,
    io::{self, Read, Write},
    rc::Rc,
    time::Duration,
};

use rstest::*;

use devicers::{
    ByteSize, ConfigError, ConnectionConfig, DeviceError, Encoding, ErrorScheme, LoopbackPort,
    MAX_ATTEMPTS, Parity, Port, PortOpener, Protocol, SerialTransport, StopBits, Transport,
};

/// A serial configuration with `\n` as terminator and the given error scheme.
fn crt_config(error_scheme: ErrorScheme) -> ConnectionConfig {
    ConnectionConfig::new(Protocol::Rs232, "/dev/ttyUSB0")
        .with_baud(9600)
        .with_byte_size(ByteSize::Eight)
        .with_stop_bits(StopBits::One)
        .with_terminator("\n")
        .with_timeout(Duration::from_millis(100))
        .with_error_scheme(error_scheme)
}

/// Create a transport around a loopback port and return both.
fn crt_transport(
    error_scheme: ErrorScheme,
    from_host: Vec<&str>,
    from_inst: Vec<&str>,
) -> (SerialTransport, LoopbackPort) {
    let port = LoopbackPort::new(from_host, from_inst, "\n");
    let transport = SerialTransport::with_opener(&crt_config(error_scheme), port.clone()).unwrap();
    (transport, port)
}

#[fixture]
fn handshake() -> ErrorScheme {
    ErrorScheme::Handshake {
        expected: "OK".to_string(),
        confirm: "GO".to_string(),
    }
}

#[rstest]
fn parity_replies_after_one_attempt() {
    let (mut transport, port) = crt_transport(
        ErrorScheme::Parity(Parity::None),
        vec!["MEAS1:VOLT?"],
        vec!["12.50"],
    );
    assert_eq!(transport.query("MEAS1:VOLT?"), "12.50");
    assert_eq!(port.writes(), 1);
    assert_eq!(port.opens(), 1);
}

/// With parity checking, nothing but the command itself is ever transmitted.
#[rstest]
fn parity_never_confirms() {
    let (mut transport, port) = crt_transport(
        ErrorScheme::Parity(Parity::Even),
        vec!["MEAS1:VOLT?", "MEAS1:VOLT?"],
        vec!["", "12.50"],
    );
    assert_eq!(transport.query("MEAS1:VOLT?"), "12.50");
    assert_eq!(port.writes(), 2);
}

#[rstest]
fn parity_empty_replies_exhaust_attempts() {
    let (mut transport, port) = crt_transport(
        ErrorScheme::default(),
        vec!["SYST:ERR?"; 3],
        vec![""; 3],
    );
    assert_eq!(transport.query("SYST:ERR?"), "");
    assert_eq!(port.writes(), 3);
    assert_eq!(port.opens(), 1);
}

#[rstest]
fn handshake_match_confirms_once(handshake: ErrorScheme) {
    let (mut transport, port) = crt_transport(
        handshake,
        vec!["SOUR1:VOLT?", "GO"],
        vec!["OK", "12.50"],
    );
    assert_eq!(transport.query("SOUR1:VOLT?"), "12.50");
    assert_eq!(port.writes(), 2);
}

#[rstest]
fn handshake_never_matching_returns_empty(handshake: ErrorScheme) {
    let (mut transport, port) = crt_transport(
        handshake,
        vec!["SOUR1:VOLT?"; 3],
        vec!["FAIL"; 3],
    );
    assert_eq!(transport.query("SOUR1:VOLT?"), "");
    assert_eq!(port.writes(), 3);
}

#[rstest]
fn handshake_matching_on_last_attempt(handshake: ErrorScheme) {
    let (mut transport, port) = crt_transport(
        handshake,
        vec!["SOUR1:VOLT?", "SOUR1:VOLT?", "SOUR1:VOLT?", "GO"],
        vec!["FAIL", "FAIL", "OK", "5.000"],
    );
    assert_eq!(transport.query("SOUR1:VOLT?"), "5.000");
    assert_eq!(port.writes(), 4);
}

/// An empty reply after a confirmed handshake consumes the attempt.
#[rstest]
fn handshake_empty_reply_retries(handshake: ErrorScheme) {
    let (mut transport, _port) = crt_transport(
        handshake,
        vec!["OUTP1?", "GO", "OUTP1?", "GO"],
        vec!["OK", "", "OK", "1"],
    );
    assert_eq!(transport.query("OUTP1?"), "1");
}

#[rstest]
fn unsupported_scheme_rejects_every_attempt() {
    let (mut transport, port) = crt_transport(
        ErrorScheme::Unsupported("crc".to_string()),
        vec!["*IDN?"; 3],
        vec![],
    );
    assert_eq!(transport.query("*IDN?"), "");
    assert_eq!(port.writes(), 3);
}

#[rstest]
fn write_and_read_open_the_port_each_time() {
    let (mut transport, port) =
        crt_transport(ErrorScheme::default(), vec!["*RST", "*CLS"], vec!["0"]);
    transport.write("*RST").unwrap();
    transport.write("*CLS").unwrap();
    assert_eq!(transport.read(), "0");
    assert_eq!(port.opens(), 3);
}

#[rstest]
#[case("SOUR1:VOLT 5", "\n")]
#[case("*IDN?", "\r\n")]
fn build_decodes_to_message_and_terminator(#[case] msg: &str, #[case] term: &str) {
    let config = crt_config(ErrorScheme::default())
        .with_terminator(term)
        .with_encoding(Encoding::Latin1);
    let port = LoopbackPort::new(Vec::<&str>::new(), vec![], term);
    let transport = SerialTransport::with_opener(&config, port).unwrap();
    assert_eq!(
        Encoding::Latin1.decode(&transport.build(msg)),
        format!("{msg}{term}")
    );
}

/// An opener for a port that is not plugged in.
struct Unplugged;

impl PortOpener for Unplugged {
    fn open(&self) -> Result<Box<dyn Port>, DeviceError> {
        Err(io::Error::new(io::ErrorKind::NotFound, "unplugged").into())
    }
}

#[rstest]
fn unplugged_port_soft_fails() {
    let mut transport =
        SerialTransport::with_opener(&crt_config(ErrorScheme::default()), Unplugged).unwrap();
    assert_eq!(transport.query("*IDN?"), "");
    assert_eq!(transport.read(), "");
    assert!(matches!(transport.write("*RST"), Err(DeviceError::Io(_))));
}

/// A port whose writes always fail, counting the attempts.
struct BrokenPort(Rc<Cell<usize>>);

impl Read for BrokenPort {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for BrokenPort {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.0.set(self.0.get() + 1);
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct BrokenOpener(Rc<Cell<usize>>);

impl PortOpener for BrokenOpener {
    fn open(&self) -> Result<Box<dyn Port>, DeviceError> {
        Ok(Box::new(BrokenPort(Rc::clone(&self.0))))
    }
}

#[rstest]
fn io_errors_consume_attempts() {
    let attempts = Rc::new(Cell::new(0));
    let mut transport = SerialTransport::with_opener(
        &crt_config(ErrorScheme::default()),
        BrokenOpener(Rc::clone(&attempts)),
    )
    .unwrap();
    assert_eq!(transport.query("*IDN?"), "");
    assert_eq!(attempts.get(), 3);
}

/// A port that sends some bytes without newline and then times out like a serial port does.
struct StallingPort {
    pending: VecDeque<u8>,
    writes: Rc<Cell<usize>>,
}

impl Read for StallingPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match (self.pending.pop_front(), buf.first_mut()) {
            (Some(byte), Some(slot)) => {
                *slot = byte;
                Ok(1)
            }
            _ => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
        }
    }
}

impl Write for StallingPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.set(self.writes.get() + 1);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens a fresh [`StallingPort`] with the same pending bytes on every call.
struct StallingOpener {
    pending: &'static [u8],
    writes: Rc<Cell<usize>>,
}

impl PortOpener for StallingOpener {
    fn open(&self) -> Result<Box<dyn Port>, DeviceError> {
        Ok(Box::new(StallingPort {
            pending: self.pending.iter().copied().collect(),
            writes: Rc::clone(&self.writes),
        }))
    }
}

/// Create a transport around a stalling port and return the shared write counter.
fn crt_stalling(
    error_scheme: ErrorScheme,
    pending: &'static [u8],
) -> (SerialTransport, Rc<Cell<usize>>) {
    let writes = Rc::new(Cell::new(0));
    let opener = StallingOpener {
        pending,
        writes: Rc::clone(&writes),
    };
    let transport = SerialTransport::with_opener(&crt_config(error_scheme), opener).unwrap();
    (transport, writes)
}

/// A read timeout never raises, it is a failed attempt.
#[rstest]
#[case(ErrorScheme::Parity(Parity::None))]
#[case(ErrorScheme::Handshake { expected: "OK".to_string(), confirm: "GO".to_string() })]
fn timeouts_consume_attempts(#[case] error_scheme: ErrorScheme) {
    let (mut transport, writes) = crt_stalling(error_scheme, b"");
    assert_eq!(transport.query("MEAS1:VOLT?"), "");
    assert_eq!(writes.get(), MAX_ATTEMPTS);
}

/// Whatever arrived before the timeout is the reply, even without terminator.
#[rstest]
fn partial_line_before_timeout_is_returned() {
    let (mut transport, writes) = crt_stalling(ErrorScheme::default(), b"12.5");
    assert_eq!(transport.query("MEAS1:VOLT?"), "12.5");
    assert_eq!(writes.get(), 1);
}

#[rstest]
fn error_scheme_is_kept(handshake: ErrorScheme) {
    let (transport, _port) = crt_transport(handshake.clone(), vec![], vec![]);
    assert_eq!(transport.error_scheme(), &handshake);
}

#[rstest]
#[case(ConnectionConfig::new(Protocol::Rs232, "COM3").with_byte_size(ByteSize::Eight).with_stop_bits(StopBits::One), "baud")]
#[case(ConnectionConfig::new(Protocol::Rs232, "COM3").with_baud(9600).with_stop_bits(StopBits::One), "byte_size")]
#[case(ConnectionConfig::new(Protocol::Rs232, "COM3").with_baud(9600).with_byte_size(ByteSize::Eight), "stop_bits")]
fn missing_serial_parameter(#[case] config: ConnectionConfig, #[case] key: &str) {
    let port = LoopbackPort::new(Vec::<&str>::new(), vec![], "\n");
    match SerialTransport::with_opener(&config, port) {
        Err(DeviceError::Config(ConfigError::MissingKey(missing))) => assert_eq!(missing, key),
        _ => panic!("Expected a missing key error for {key}"),
    }
}

#[rstest]
fn empty_terminator_is_rejected() {
    let config = crt_config(ErrorScheme::default()).with_terminator("");
    let port = LoopbackPort::new(Vec::<&str>::new(), vec![], "");
    assert!(matches!(
        SerialTransport::with_opener(&config, port),
        Err(DeviceError::Config(ConfigError::InvalidValue {
            key: "terminator",
            ..
        }))
    ));
}

#[cfg(feature = "serial")]
#[rstest]
#[case(crt_config(ErrorScheme::default()).with_stop_bits(StopBits::OnePointFive))]
#[case(crt_config(ErrorScheme::Parity(Parity::Mark)))]
#[case(crt_config(ErrorScheme::Parity(Parity::Space)))]
fn serialport_cannot_express(#[case] config: ConnectionConfig) {
    assert!(matches!(
        SerialTransport::try_new(&config),
        Err(DeviceError::Config(ConfigError::Unsupported(_)))
    ));
}
