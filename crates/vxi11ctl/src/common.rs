use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;
use vxi11::Device;

/// Link settings shared by every device subcommand.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub timeout: Duration,
    pub lock_timeout: Duration,
    pub term_char: Option<u8>,
    pub port: Option<u16>,
    pub lock: bool,
}

impl LinkOptions {
    /// Open a link to `target`, a host name or `TCPIP::` resource string.
    pub fn open(&self, target: &str, name: Option<&str>) -> Result<Device> {
        let mut builder = Device::builder(target)
            .with_context(|| format!("parse target {target:?}"))?
            .timeout(self.timeout)
            .lock_timeout(self.lock_timeout)
            .term_char(self.term_char)
            .lock_on_open(self.lock);
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(name) = name {
            builder = builder.name(name);
        }
        let mut device = builder.build();
        device
            .open()
            .with_context(|| format!("open link to {target}"))?;
        Ok(device)
    }

    /// Run `op` on a fresh link and destroy the link afterwards.
    pub fn with_device<T>(
        &self,
        target: &str,
        name: Option<&str>,
        op: impl FnOnce(&mut Device) -> Result<T>,
    ) -> Result<T> {
        let mut device = self.open(target, name)?;
        let result = op(&mut device);
        match (result, device.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err).context("close link"),
            (Err(err), close) => {
                if let Err(close_err) = close {
                    warn!(%close_err, "close after failure");
                }
                Err(err)
            }
        }
    }
}

/// Parse a terminator given as an escape (`\n`), a number (`10`, `0x0a`) or one ASCII character.
pub fn parse_term_char(text: &str) -> Result<u8, String> {
    match text {
        "\\n" | "lf" | "LF" => return Ok(b'\n'),
        "\\r" | "cr" | "CR" => return Ok(b'\r'),
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).map_err(|err| format!("invalid hex terminator {text:?}: {err}"));
    }
    if text.len() > 1 && text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse()
            .map_err(|err| format!("invalid terminator {text:?}: {err}"));
    }
    match text.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(format!("terminator {text:?} must be one byte")),
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_char_forms() {
        assert_eq!(parse_term_char("\\n").unwrap(), b'\n');
        assert_eq!(parse_term_char("CR").unwrap(), b'\r');
        assert_eq!(parse_term_char("0x0a").unwrap(), 0x0A);
        assert_eq!(parse_term_char("13").unwrap(), 13);
        assert_eq!(parse_term_char(";").unwrap(), b';');
        assert_eq!(parse_term_char("7").unwrap(), b'7');
    }

    #[test]
    fn term_char_rejects_garbage() {
        assert!(parse_term_char("0xZZ").is_err());
        assert!(parse_term_char("300").is_err());
        assert!(parse_term_char("ab").is_err());
        assert!(parse_term_char("").is_err());
    }
}
