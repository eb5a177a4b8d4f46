use std::env;
use std::net::{IpAddr, UdpSocket};
use std::sync::mpsc;
use std::time::Duration;

use vxi11::consts::{DEVICE_INTR_PROG, DEVICE_INTR_VERS};
use vxi11::protocol::family;
use vxi11::{Device, SrqListener};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let Some(host) = env::args().nth(1) else {
        eprintln!("usage: srq_wait <host>");
        return Ok(());
    };

    let mut device = Device::new(&host)?;
    device.open()?;

    // Local address facing the instrument.
    let route = UdpSocket::bind("0.0.0.0:0")?;
    route.connect((host.as_str(), 111))?;
    let IpAddr::V4(local) = route.local_addr()?.ip() else {
        return Err("instrument is not reachable over IPv4".into());
    };

    let (tx, rx) = mpsc::channel();
    let listener = SrqListener::bind((local, 0), move |handle| {
        let _ = tx.send(handle);
    })?;
    let port = listener.local_addr()?.port();
    listener.spawn();

    device.create_intr_chan(local, port, DEVICE_INTR_PROG, DEVICE_INTR_VERS, family::DEVICE_TCP)?;
    device.enable_srq(true, b"srq_wait")?;
    // Request service on operation complete.
    device.write_str("*SRE 32;*ESE 1;*OPC")?;

    match rx.recv_timeout(Duration::from_secs(10)) {
        Ok(handle) => println!("service request: {}", String::from_utf8_lossy(&handle)),
        Err(_) => println!("no service request within 10 s"),
    }

    device.enable_srq(false, b"")?;
    device.destroy_intr_chan()?;
    device.close()?;
    Ok(())
}
