use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::common::{self, LinkOptions};

#[derive(Serialize)]
struct Response<'a> {
    target: &'a str,
    response: String,
}

pub fn write(opts: &LinkOptions, target: &str, message: &str, json: bool) -> Result<()> {
    opts.with_device(target, None, |device| {
        device
            .write_str(message)
            .with_context(|| format!("write {message:?}"))
    })?;
    info!(target, bytes = message.len(), "message written");
    if json {
        common::print_json(&serde_json::json!({ "target": target, "written": message.len() }))?;
    }
    Ok(())
}

pub fn read(opts: &LinkOptions, target: &str, max_len: Option<usize>, json: bool) -> Result<()> {
    let response = opts.with_device(target, None, |device| {
        device.read_string(max_len).context("read response")
    })?;
    print_response(target, response, json)
}

pub fn ask(opts: &LinkOptions, target: &str, query: &str, json: bool) -> Result<()> {
    let response = opts.with_device(target, None, |device| {
        device
            .ask_str(query)
            .with_context(|| format!("query {query:?}"))
    })?;
    print_response(target, response, json)
}

fn print_response(target: &str, response: String, json: bool) -> Result<()> {
    if json {
        return common::print_json(&Response { target, response });
    }
    println!("{response}");
    Ok(())
}
