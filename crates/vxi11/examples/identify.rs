use std::env;
use std::time::Duration;

use vxi11::Device;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let Some(target) = env::args().nth(1) else {
        eprintln!("usage: identify <host | TCPIP::host::inst0::INSTR>");
        return Ok(());
    };

    let mut device = Device::builder(&target)?
        .timeout(Duration::from_secs(3))
        .build();
    let idn = device.ask_str("*IDN?")?;
    println!("{target}: {idn}");
    println!("status byte: 0x{:02X}", device.read_stb()?);
    device.close()?;
    Ok(())
}
