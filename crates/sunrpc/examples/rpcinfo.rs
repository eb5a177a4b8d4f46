use std::env;

use sunrpc::{PortMapper, Protocol};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let host = env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());

    let mut pmap = PortMapper::tcp(&host)?;
    let mappings = pmap.dump()?;
    println!("{:>10} {:>5} {:>5} {:>6}", "program", "vers", "proto", "port");
    for m in &mappings {
        let proto = match m.protocol {
            Protocol::Tcp => "tcp".to_string(),
            Protocol::Udp => "udp".to_string(),
            Protocol::Other(raw) => raw.to_string(),
        };
        println!("{:>10} {:>5} {:>5} {:>6}", m.program, m.version, proto, m.port);
    }
    Ok(())
}
