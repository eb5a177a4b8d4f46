use sunrpc::RpcError;
use thiserror::Error;

/// Error type produced by VXI-11 links and interface devices.
#[derive(Debug, Error)]
pub enum Vxi11Error {
    /// The device answered with a non-zero error code.
    #[error("{code}: {message} [{operation}]")]
    Device {
        code: i32,
        message: &'static str,
        operation: &'static str,
    },
    /// The device accepted fewer bytes than a write block offered.
    #[error("did not write complete block [{operation}]")]
    IncompleteWrite { operation: &'static str },
    #[error("invalid resource string: {0}")]
    InvalidResource(String),
    /// A GPIB primary or secondary address outside 0..=30.
    #[error("invalid bus address {address} [{operation}]")]
    InvalidAddress { address: u8, operation: &'static str },
    #[error("SRQ handle is {0} bytes, at most 40 allowed")]
    SrqHandleTooLong(usize),
    /// The operation needs an established link.
    #[error("link is not open")]
    NotOpen,
    /// The device replied with data that does not fit the request.
    #[error("unexpected reply to {operation}: {detail}")]
    UnexpectedReply {
        operation: &'static str,
        detail: String,
    },
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Canonical text of a device error code.
pub fn error_message(code: i32) -> &'static str {
    match code {
        0 => "No error",
        1 => "Syntax error",
        3 => "Device not accessible",
        4 => "Invalid link identifier",
        5 => "Parameter error",
        6 => "Channel not established",
        8 => "Operation not supported",
        9 => "Out of resources",
        11 => "Device locked by another link",
        12 => "No lock held by this link",
        15 => "IO timeout",
        17 => "IO error",
        21 => "Invalid address",
        23 => "Abort",
        29 => "Channel already established",
        _ => "Unknown error",
    }
}

impl Vxi11Error {
    /// Map a device error code onto `Ok` or [`Vxi11Error::Device`].
    pub fn check(code: i32, operation: &'static str) -> Result<(), Vxi11Error> {
        if code == 0 {
            Ok(())
        } else {
            Err(Vxi11Error::Device {
                code,
                message: error_message(code),
                operation,
            })
        }
    }

    /// Device error code, when the failure came from the device.
    pub fn code(&self) -> Option<i32> {
        match self {
            Vxi11Error::Device { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn unexpected<S: Into<String>>(operation: &'static str, detail: S) -> Self {
        Vxi11Error::UnexpectedReply {
            operation,
            detail: detail.into(),
        }
    }
}
