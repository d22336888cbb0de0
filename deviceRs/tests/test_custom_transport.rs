//! Tests for the transport selection and the custom transport fallback.

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    thread,
    time::Duration,
};

use rstest::*;

use devicers::{
    AnyTransport, ConnectionConfig, DeviceError, LoopbackPort, Transport, open_transport,
};

#[fixture]
fn bridge_config() -> ConnectionConfig {
    ConnectionConfig::new("ethernet-bridge", "192.168.1.20:4001").with_terminator("\n")
}

#[rstest]
fn unknown_protocol_falls_back_to_custom(bridge_config: ConnectionConfig) {
    let transport = open_transport(&bridge_config).unwrap();
    match transport {
        AnyTransport::Custom(custom) => {
            assert_eq!(custom.protocol(), "ethernet-bridge");
            assert!(!custom.is_attached());
        }
        _ => panic!("Expected a custom transport"),
    }
}

#[rstest]
fn detached_custom_transport_soft_fails(bridge_config: ConnectionConfig) {
    let mut transport = open_transport(&bridge_config).unwrap();
    assert_eq!(transport.query("*IDN?"), "");
    assert_eq!(transport.read(), "");
    assert!(matches!(
        transport.write("*RST"),
        Err(DeviceError::NotConnected(_))
    ));
}

#[rstest]
fn attached_stream_is_used(bridge_config: ConnectionConfig) {
    let mut transport = open_transport(&bridge_config).unwrap();
    let port = LoopbackPort::new(vec!["*RST", "SOUR2:VOLT?"], vec!["-5.0"], "\n");
    transport.as_custom_mut().unwrap().attach(port.clone());

    transport.write("*RST").unwrap();
    assert_eq!(transport.query("SOUR2:VOLT?"), "-5.0");
    assert_eq!(port.writes(), 2);

    transport.close().unwrap();
    assert!(!transport.as_custom_mut().unwrap().is_attached());
}

#[rstest]
fn connect_tcp_attaches_a_socket(bridge_config: ConnectionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let instrument = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut cmd = String::new();
        reader.read_line(&mut cmd).unwrap();
        (&stream).write_all(b"RAZORBILL,RP100\n").unwrap();
        cmd
    });

    let config = bridge_config.with_timeout(Duration::from_secs(2));
    let mut transport = open_transport(&config).unwrap();
    transport.as_custom_mut().unwrap().connect_tcp(addr).unwrap();
    assert_eq!(transport.query("*IDN?"), "RAZORBILL,RP100");
    assert_eq!(instrument.join().unwrap(), "*IDN?\n");
}

#[rstest]
fn invalid_config_fails_at_selection() {
    let config = ConnectionConfig::new("ethernet-bridge", "");
    assert!(matches!(
        open_transport(&config),
        Err(DeviceError::Config(_))
    ));
}

#[cfg(feature = "serial")]
#[rstest]
fn rs232_selects_serial_transport() {
    use devicers::{ByteSize, StopBits};

    let config = ConnectionConfig::new("RS232", "/dev/ttyUSB0")
        .with_baud(9600)
        .with_byte_size(ByteSize::Eight)
        .with_stop_bits(StopBits::One);
    assert!(matches!(
        open_transport(&config),
        Ok(AnyTransport::Serial(_))
    ));
}
