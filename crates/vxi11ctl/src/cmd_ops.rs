use anyhow::{Context, Result};
use serde::Serialize;

use crate::common::{self, LinkOptions};

/// Simple device operations without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    Trigger,
    Clear,
    Remote,
    Local,
}

impl DeviceOp {
    fn name(self) -> &'static str {
        match self {
            DeviceOp::Trigger => "trigger",
            DeviceOp::Clear => "clear",
            DeviceOp::Remote => "remote",
            DeviceOp::Local => "local",
        }
    }
}

#[derive(Serialize)]
struct StatusByte<'a> {
    target: &'a str,
    stb: u8,
    rqs: bool,
}

pub fn run(opts: &LinkOptions, target: &str, op: DeviceOp, json: bool) -> Result<()> {
    opts.with_device(target, None, |device| {
        let result = match op {
            DeviceOp::Trigger => device.trigger(),
            DeviceOp::Clear => device.clear(),
            DeviceOp::Remote => device.remote(),
            DeviceOp::Local => device.local(),
        };
        result.with_context(|| format!("{} {target}", op.name()))
    })?;
    if json {
        common::print_json(&serde_json::json!({ "target": target, "op": op.name(), "ok": true }))?;
    } else {
        println!("{} ok", op.name());
    }
    Ok(())
}

pub fn stb(opts: &LinkOptions, target: &str, json: bool) -> Result<()> {
    let stb = opts.with_device(target, None, |device| device.read_stb().context("read status byte"))?;
    let status = StatusByte {
        target,
        stb,
        rqs: stb & 0x40 != 0,
    };
    if json {
        return common::print_json(&status);
    }
    println!("0x{:02X} ({}){}", status.stb, status.stb, if status.rqs { " RQS" } else { "" });
    Ok(())
}
