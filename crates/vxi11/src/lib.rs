#![cfg_attr(docsrs, feature(doc_cfg))]
//! VXI-11 instrument control over ONC RPC, re-exporting the workspace RPC
//! crates.
//!
//! ```rust,no_run
//! use vxi11::{Device, Vxi11Error};
//! use std::time::Duration;
//!
//! # fn run() -> Result<(), Vxi11Error> {
//! let mut scope = Device::builder("TCPIP::192.168.1.20::inst0::INSTR")?
//!     .timeout(Duration::from_secs(5))
//!     .build();
//! let idn = scope.ask_str("*IDN?")?;
//! println!("{idn}");
//! scope.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ```rust,no_run
//! # fn scan() -> Result<(), vxi11::Vxi11Error> {
//! use vxi11::{Device, InterfaceDevice};
//! let gateway = Device::builder("192.168.1.30")?.name("gpib0").build();
//! let mut bus = InterfaceDevice::new(gateway);
//! for address in bus.find_listeners(None)? {
//!     println!("listener at {address}");
//! }
//! # Ok(())
//! # }
//! ```

pub use sunrpc;
pub use xdr;

pub mod channel;
pub mod consts;
pub mod device;
pub mod error;
pub mod gpib;
pub mod protocol;
pub mod resource;
pub mod srq;

#[cfg(test)]
mod sim;

pub use channel::{AbortClient, CoreClient};
pub use consts::{OpFlags, ReadReason};
pub use device::{Device, DeviceBuilder};
pub use error::{error_message, Vxi11Error};
pub use gpib::{setup_bytes, BusStatus, GpibAddress, InterfaceDevice};
pub use resource::Resource;
pub use srq::SrqListener;
