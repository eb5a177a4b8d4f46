use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use vxi11::{GpibAddress, InterfaceDevice};

use crate::common::{self, LinkOptions};

#[derive(Serialize)]
struct ListenerEntry {
    primary: u8,
    secondary: Option<u8>,
}

pub fn run(
    opts: &LinkOptions,
    target: &str,
    name: &str,
    candidates: &[u8],
    settle_us: u64,
    json: bool,
) -> Result<()> {
    let device = opts.open(target, Some(name))?;
    let mut bus = InterfaceDevice::new(device);
    bus.set_settle(Duration::from_micros(settle_us));
    let candidates = (!candidates.is_empty()).then_some(candidates);
    let scan = bus.find_listeners(candidates).context("scan GPIB listeners");
    let close = bus.device_mut().close().context("close link");
    let found: Vec<GpibAddress> = scan?;
    close?;
    info!(count = found.len(), "GPIB listeners");

    if json {
        let entries: Vec<ListenerEntry> = found
            .iter()
            .map(|addr| ListenerEntry {
                primary: addr.primary(),
                secondary: addr.secondary(),
            })
            .collect();
        return common::print_json(&entries);
    }
    if found.is_empty() {
        println!("No listeners on the bus.");
        return Ok(());
    }
    for addr in &found {
        println!("{addr}");
    }
    Ok(())
}
