use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use vxi11::consts::{DEVICE_CORE_PROG, DEVICE_CORE_VERS};
use vxi11::sunrpc::{broadcast_interfaces, BroadcastPortMapper, Protocol};

use crate::common;

#[derive(Serialize)]
struct InstrumentEntry {
    ip: String,
    core_port: u16,
    interface: String,
}

/// Broadcast a core-program lookup on every interface and list responders.
pub fn run(window_ms: u64, iface: Option<&str>, json: bool) -> Result<()> {
    let window = Duration::from_millis(window_ms);
    let interfaces = broadcast_interfaces(iface).context("list IPv4 interfaces")?;
    if interfaces.is_empty() {
        warn!(filter = iface, "no broadcast-capable interface");
    }

    let mut found: BTreeMap<IpAddr, InstrumentEntry> = BTreeMap::new();
    for nic in &interfaces {
        debug!(name = %nic.name, broadcast = %nic.broadcast, "probing interface");
        let mut pmap = BroadcastPortMapper::new(IpAddr::V4(nic.broadcast))
            .with_context(|| format!("open broadcast socket on {}", nic.name))?;
        pmap.set_window(Some(window));
        let on_reply = |port: u16, from: SocketAddr| debug!(%from, port, "instrument answered");
        let replies = match pmap.get_port(DEVICE_CORE_PROG, DEVICE_CORE_VERS, Protocol::Tcp, on_reply) {
            Ok(replies) => replies,
            Err(err) => {
                warn!(name = %nic.name, %err, "broadcast failed");
                continue;
            }
        };
        for (port, from) in replies {
            found.entry(from.ip()).or_insert_with(|| InstrumentEntry {
                ip: from.ip().to_string(),
                core_port: port,
                interface: nic.name.clone(),
            });
        }
    }
    info!(count = found.len(), "discovered instruments");

    let entries: Vec<InstrumentEntry> = found.into_values().collect();
    if json {
        return common::print_json(&entries);
    }
    if entries.is_empty() {
        println!("No VXI-11 instruments discovered.");
        return Ok(());
    }
    println!("{:<16} {:<10} {}", "IP", "CORE PORT", "INTERFACE");
    for entry in &entries {
        println!("{:<16} {:<10} {}", entry.ip, entry.core_port, entry.interface);
    }
    Ok(())
}
