use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vxi11ctl::cmd_discover;
use vxi11ctl::cmd_io;
use vxi11ctl::cmd_listeners;
use vxi11ctl::cmd_ops::{self, DeviceOp};
use vxi11ctl::common::{parse_term_char, LinkOptions};

#[derive(Parser, Debug)]
#[command(name = "vxi11ctl", version, about = "VXI-11 instrument CLI")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// I/O timeout for device operations
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
    /// How long the device waits for a lock held elsewhere
    #[arg(long, default_value_t = 10_000)]
    lock_timeout_ms: u64,
    /// Message terminator (\n, 0x0a, 10 or a single character)
    #[arg(long, value_parser = parse_term_char)]
    term_char: Option<u8>,
    /// Fixed core channel port instead of the port mapper lookup
    #[arg(long)]
    port: Option<u16>,
    /// Hold the device lock for the whole command
    #[arg(long)]
    lock: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Find instruments by broadcasting a port mapper lookup
    Discover {
        #[arg(long, default_value_t = 2000)]
        window_ms: u64,
        /// Restrict to one network interface by name
        #[arg(long)]
        iface: Option<String>,
    },
    /// Send a message
    Write { target: String, message: String },
    /// Read one response
    Read {
        target: String,
        #[arg(long)]
        max_len: Option<usize>,
    },
    /// Send a query and print the response
    Ask { target: String, query: String },
    /// Read the status byte
    Stb { target: String },
    /// Device trigger (GET)
    Trigger { target: String },
    /// Device clear
    Clear { target: String },
    /// Put the device in remote state
    Remote { target: String },
    /// Return the device to local state
    Local { target: String },
    /// Scan a GPIB interface device for listeners
    Listeners {
        target: String,
        /// Interface device name on the gateway
        #[arg(long, default_value = "gpib0")]
        name: String,
        /// Primary addresses to scan (default: all)
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<u8>,
        #[arg(long, default_value_t = 1500)]
        settle_us: u64,
    },
}

fn main() -> Result<()> {
    let Cli {
        verbose,
        json,
        timeout_ms,
        lock_timeout_ms,
        term_char,
        port,
        lock,
        cmd,
    } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .init();

    let opts = LinkOptions {
        timeout: Duration::from_millis(timeout_ms),
        lock_timeout: Duration::from_millis(lock_timeout_ms),
        term_char,
        port,
        lock,
    };

    match cmd {
        Cmd::Discover { window_ms, iface } => cmd_discover::run(window_ms, iface.as_deref(), json)?,
        Cmd::Write { target, message } => cmd_io::write(&opts, &target, &message, json)?,
        Cmd::Read { target, max_len } => cmd_io::read(&opts, &target, max_len, json)?,
        Cmd::Ask { target, query } => cmd_io::ask(&opts, &target, &query, json)?,
        Cmd::Stb { target } => cmd_ops::stb(&opts, &target, json)?,
        Cmd::Trigger { target } => cmd_ops::run(&opts, &target, DeviceOp::Trigger, json)?,
        Cmd::Clear { target } => cmd_ops::run(&opts, &target, DeviceOp::Clear, json)?,
        Cmd::Remote { target } => cmd_ops::run(&opts, &target, DeviceOp::Remote, json)?,
        Cmd::Local { target } => cmd_ops::run(&opts, &target, DeviceOp::Local, json)?,
        Cmd::Listeners {
            target,
            name,
            candidates,
            settle_us,
        } => cmd_listeners::run(&opts, &target, &name, &candidates, settle_us, json)?,
    };

    Ok(())
}
