use std::io;

use thiserror::Error;
use xdr::XdrError;

use crate::message::AuthStat;

/// Errors that can occur while issuing or serving RPC calls.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("io: {0}")]
    Io(io::Error),
    #[error("xdr: {0}")]
    Xdr(#[from] XdrError),
    #[error("timeout waiting for reply")]
    Timeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("bad message: {0}")]
    BadFormat(String),
    #[error("MSG_DENIED: RPC_MISMATCH ({low}, {high})")]
    RpcMismatch { low: u32, high: u32 },
    #[error("MSG_DENIED: AUTH_ERROR {0:?}")]
    AuthError(AuthStat),
    #[error("call failed: PROG_UNAVAIL")]
    ProgUnavail,
    #[error("call failed: PROG_MISMATCH ({low}, {high})")]
    ProgMismatch { low: u32, high: u32 },
    #[error("call failed: PROC_UNAVAIL")]
    ProcUnavail,
    #[error("call failed: GARBAGE_ARGS")]
    GarbageArgs,
    #[error("call failed: SYSTEM_ERR")]
    SystemErr,
    #[error("call failed: accept status {0}")]
    UnknownAcceptStat(u32),
    #[error("wrong xid in reply: {got} instead of {expected}")]
    XidMismatch { expected: u32, got: u32 },
    #[error("program {prog:#x} version {vers} not registered")]
    NotRegistered { prog: u32, vers: u32 },
    #[error("port mapper refused to {0} mapping")]
    RegistrationFailed(&'static str),
    #[error("procedure {0} registered twice")]
    DuplicateProcedure(u32),
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RpcError::Timeout,
            io::ErrorKind::UnexpectedEof => RpcError::ConnectionClosed,
            _ => RpcError::Io(err),
        }
    }
}

impl RpcError {
    /// True for rejections reported by the remote RPC layer itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RpcError::RpcMismatch { .. }
                | RpcError::AuthError(_)
                | RpcError::ProgUnavail
                | RpcError::ProgMismatch { .. }
                | RpcError::ProcUnavail
                | RpcError::GarbageArgs
                | RpcError::SystemErr
                | RpcError::UnknownAcceptStat(_)
        )
    }
}
