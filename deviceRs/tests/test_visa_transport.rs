//! Tests for the VISA transports, using loopback ports in place of VISA sessions.

use rstest::*;

use devicers::{
    ConnectionConfig, DeviceError, LoopbackPort, Protocol, Transport, VisaKind, VisaTransport,
};

#[fixture]
fn serial_config() -> ConnectionConfig {
    ConnectionConfig::new(Protocol::SerialVisa, "ASRL5::INSTR").with_terminator("\n")
}

#[rstest]
fn gpib_sends_no_terminator() {
    let config = ConnectionConfig::new(Protocol::Gpib, "GPIB0::5::INSTR");
    let port = LoopbackPort::new(vec!["*IDN?"], vec!["RAZORBILL,RP100"], "");
    let mut transport = VisaTransport::from_port(&config, port).unwrap();
    assert_eq!(transport.kind(), VisaKind::Gpib);
    assert_eq!(transport.terminator(), "");
    assert_eq!(transport.query("*IDN?"), "RAZORBILL,RP100");
}

#[rstest]
fn serial_visa_sends_configured_terminator(serial_config: ConnectionConfig) {
    let port = LoopbackPort::new(vec!["OUTP1 1", "OUTP1?"], vec!["1"], "\n");
    let mut transport = VisaTransport::from_port(&serial_config, port).unwrap();
    assert_eq!(transport.kind(), VisaKind::Serial);
    transport.write("OUTP1 1").unwrap();
    assert_eq!(transport.query("OUTP1?"), "1");
}

#[rstest]
fn read_strips_whitespace(serial_config: ConnectionConfig) {
    let port = LoopbackPort::new(vec![], vec!["  +1.2000E+01\r"], "\n");
    let mut transport = VisaTransport::from_port(&serial_config, port).unwrap();
    assert_eq!(transport.read(), "+1.2000E+01");
}

#[rstest]
fn closed_session_soft_fails(serial_config: ConnectionConfig) {
    let port = LoopbackPort::new(Vec::<&str>::new(), vec![], "\n");
    let mut transport = VisaTransport::from_port(&serial_config, port.clone()).unwrap();
    transport.close().unwrap();
    assert!(!transport.is_open());
    assert_eq!(transport.query("*IDN?"), "");
    assert_eq!(transport.read(), "");
    assert!(matches!(
        transport.write("*RST"),
        Err(DeviceError::NotConnected(_))
    ));
    assert_eq!(port.writes(), 0);
}

#[cfg(not(feature = "visa"))]
#[rstest]
fn visa_requires_feature(serial_config: ConnectionConfig) {
    assert!(matches!(
        VisaTransport::try_new(&serial_config),
        Err(DeviceError::InterfaceNotSupported(_))
    ));
}
