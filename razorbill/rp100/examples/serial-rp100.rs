use measurements::Voltage;
use razorbill_rp100::Rp100;

fn main() {
    env_logger::init();

    let port = "/dev/ttyUSB0";

    // Open the RP100 directly at the serial port.
    let mut inst = Rp100::open_serial(port).expect("Failed to open serial port");
    println!("Instrument ID: {}", inst.get_name().unwrap());

    // Ramp channel 1 slowly to 10 V and switch the output on
    let mut ch1 = inst.get_channel(0).unwrap();
    ch1.set_slew_rate(0.5).unwrap();
    ch1.set_voltage(Voltage::from_volts(10.0)).unwrap();
    ch1.set_output(true).unwrap();

    println!("Channel 1 setpoint: {:?}", ch1.get_setpoint());
    println!("Channel 1 current: {:?}", ch1.measure_current());

    // Print the status of the instrument
    println!("{}", inst.get_status());
}
