//! Client-side call plumbing shared by every transport.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use xdr::{Encoder, XdrDecode, XdrEncode};

use crate::message::{consts, CallHeader, OpaqueAuth};
use crate::RpcError;

/// A blocking RPC client bound to one (program, version).
///
/// Exactly one call is outstanding at a time; implementations are not
/// internally synchronised.
pub trait Transport {
    /// Issue `proc_num` with pre-encoded arguments and return the encoded results.
    fn call_raw(&mut self, proc_num: u32, args: &[u8]) -> Result<Bytes, RpcError>;

    /// Bound how long subsequent calls wait for their reply. `None` waits indefinitely on
    /// stream transports and restores the default resend schedule on datagram ones.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), RpcError>;

    /// Address of the remote endpoint.
    fn peer_addr(&self) -> SocketAddr;

    /// Issue a typed call.
    fn call<A, R>(&mut self, proc_num: u32, args: &A) -> Result<R, RpcError>
    where
        A: XdrEncode + ?Sized,
        R: XdrDecode,
        Self: Sized,
    {
        let encoded = xdr::to_bytes(args);
        let results = self.call_raw(proc_num, &encoded)?;
        Ok(xdr::from_bytes(&results)?)
    }

    /// Procedure 0: the no-op every program answers.
    fn null(&mut self) -> Result<(), RpcError>
    where
        Self: Sized,
    {
        self.call(consts::NULL_PROC, &())
    }
}

/// Per-connection call state: program identity, credentials and the xid counter.
#[derive(Debug, Clone)]
pub struct CallContext {
    prog: u32,
    vers: u32,
    last_xid: u32,
    cred: OpaqueAuth,
    verf: OpaqueAuth,
}

impl CallContext {
    pub fn new(prog: u32, vers: u32) -> Self {
        Self {
            prog,
            vers,
            last_xid: 0,
            cred: OpaqueAuth::null(),
            verf: OpaqueAuth::null(),
        }
    }

    pub fn program(&self) -> u32 {
        self.prog
    }

    pub fn version(&self) -> u32 {
        self.vers
    }

    /// Transaction id of the most recent call.
    pub fn last_xid(&self) -> u32 {
        self.last_xid
    }

    /// Allocate the next xid and encode the call header followed by `args`.
    pub fn start_call(&mut self, proc_num: u32, args: &[u8]) -> (u32, Bytes) {
        self.last_xid = self.last_xid.wrapping_add(1);
        let header = CallHeader {
            xid: self.last_xid,
            prog: self.prog,
            vers: self.vers,
            proc_num,
            cred: self.cred.clone(),
            verf: self.verf.clone(),
        };
        let mut enc = Encoder::with_capacity(64 + args.len());
        enc.put(&header);
        enc.put_raw(args);
        (self.last_xid, enc.freeze())
    }
}

/// Resolve `host:port` to the first IPv4 (else any) socket address.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr, RpcError> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| RpcError::BadFormat(format!("cannot resolve host {host}")))
}
