//! Program numbers, procedure numbers, flags and link defaults.

use std::time::Duration;

use bitflags::bitflags;

/// Core device channel.
pub const DEVICE_CORE_PROG: u32 = 0x0607AF;
pub const DEVICE_CORE_VERS: u32 = 1;

/// Asynchronous abort channel.
pub const DEVICE_ASYNC_PROG: u32 = 0x0607B0;
pub const DEVICE_ASYNC_VERS: u32 = 1;

/// Interrupt (service request) channel, served by the client.
pub const DEVICE_INTR_PROG: u32 = 0x0607B1;
pub const DEVICE_INTR_VERS: u32 = 1;

/// Procedure numbers of the three programs.
pub mod procs {
    pub const DEVICE_ABORT: u32 = 1;

    pub const CREATE_LINK: u32 = 10;
    pub const DEVICE_WRITE: u32 = 11;
    pub const DEVICE_READ: u32 = 12;
    pub const DEVICE_READSTB: u32 = 13;
    pub const DEVICE_TRIGGER: u32 = 14;
    pub const DEVICE_CLEAR: u32 = 15;
    pub const DEVICE_REMOTE: u32 = 16;
    pub const DEVICE_LOCAL: u32 = 17;
    pub const DEVICE_LOCK: u32 = 18;
    pub const DEVICE_UNLOCK: u32 = 19;
    pub const DEVICE_ENABLE_SRQ: u32 = 20;
    pub const DEVICE_DOCMD: u32 = 22;
    pub const DESTROY_LINK: u32 = 23;
    pub const CREATE_INTR_CHAN: u32 = 25;
    pub const DESTROY_INTR_CHAN: u32 = 26;

    pub const DEVICE_INTR_SRQ: u32 = 30;
}

bitflags! {
    /// Operation flags carried by device requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpFlags: i32 {
        /// Wait for a lock held by another link instead of failing.
        const WAIT_BLOCK = 1;
        /// This write block ends the message.
        const END = 8;
        /// The `term_char` field of a read is valid.
        const TERMCHAR_SET = 128;
    }
}

bitflags! {
    /// Why a device read returned.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadReason: i32 {
        /// The requested count was reached.
        const REQCNT = 1;
        /// The termination character was seen.
        const CHR = 2;
        /// The device signalled end of message.
        const END = 4;
    }
}

/// Sub-device name used when none is given.
pub const DEFAULT_DEVICE_NAME: &str = "inst0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound applied to the receive size a device advertises.
pub const MAX_RECV_CEILING: u32 = 1024 * 1024;
/// Longest handle accepted by `device_enable_srq`.
pub const MAX_SRQ_HANDLE: usize = 40;
/// Extra time granted to the socket beyond the device-side timeouts.
pub const SOCKET_SLACK: Duration = Duration::from_secs(1);
