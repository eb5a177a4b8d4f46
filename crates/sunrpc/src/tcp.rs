//! Record-marked RPC over a persistent TCP connection.

use std::cmp::Ordering;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::client::{resolve, CallContext, Transport};
use crate::message::decode_reply;
use crate::portmap::{PortMapper, Protocol, PMAP_PORT, PMAP_PROG, PMAP_VERS};
use crate::{record, RpcError};

/// Timeout applied while establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// RPC client over one TCP stream.
#[derive(Debug)]
pub struct TcpClient {
    stream: TcpStream,
    peer: SocketAddr,
    ctx: CallContext,
}

impl TcpClient {
    /// Connect to a program listening on a known port.
    pub fn connect_addr(addr: SocketAddr, prog: u32, vers: u32) -> Result<Self, RpcError> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        debug!(%addr, prog, vers, "connected TCP RPC client");
        Ok(Self::from_stream(stream, addr, prog, vers))
    }

    /// Connect to `host`, asking its port mapper for the port when `port` is 0.
    pub fn connect(host: &str, prog: u32, vers: u32, port: u16) -> Result<Self, RpcError> {
        let port = if port == 0 {
            lookup_port(host, PMAP_PORT, prog, vers)?
        } else {
            port
        };
        Self::connect_addr(resolve(host, port)?, prog, vers)
    }

    /// Connect through a port mapper listening on a non-standard port.
    pub fn connect_via_portmapper(
        host: &str,
        prog: u32,
        vers: u32,
        pmap_port: u16,
    ) -> Result<Self, RpcError> {
        let port = lookup_port(host, pmap_port, prog, vers)?;
        Self::connect_addr(resolve(host, port)?, prog, vers)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, peer: SocketAddr, prog: u32, vers: u32) -> Self {
        Self {
            stream,
            peer,
            ctx: CallContext::new(prog, vers),
        }
    }

    /// Call bookkeeping, including the last xid sent.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Local address of the underlying stream.
    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.stream.local_addr()?)
    }

    /// Shut the connection down in both directions.
    pub fn close(self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            trace!(?err, peer = %self.peer, "shutdown on closed stream");
        }
    }
}

fn lookup_port(host: &str, pmap_port: u16, prog: u32, vers: u32) -> Result<u16, RpcError> {
    let addr = resolve(host, pmap_port)?;
    let mut pmap = PortMapper::new(TcpClient::connect_addr(addr, PMAP_PROG, PMAP_VERS)?);
    let port = pmap.get_port(prog, vers, Protocol::Tcp)?;
    pmap.into_inner().close();
    if port == 0 {
        return Err(RpcError::NotRegistered { prog, vers });
    }
    debug!(host, prog, vers, port, "resolved program port");
    Ok(port)
}

impl Transport for TcpClient {
    fn call_raw(&mut self, proc_num: u32, args: &[u8]) -> Result<Bytes, RpcError> {
        let (xid, call) = self.ctx.start_call(proc_num, args);
        trace!(xid, proc_num, bytes = call.len(), peer = %self.peer, "sending TCP call");
        record::write_record(&mut self.stream, &call)?;
        loop {
            let reply = record::read_record(&mut self.stream)?;
            let decoded = decode_reply(&reply)?;
            match decoded.header.xid.cmp(&xid) {
                Ordering::Equal => {
                    trace!(xid, bytes = reply.len(), "received TCP reply");
                    decoded.header.into_result()?;
                    return Ok(Bytes::copy_from_slice(decoded.results));
                }
                Ordering::Less => {
                    debug!(expected = xid, got = decoded.header.xid, "discarding stale reply");
                }
                Ordering::Greater => {
                    return Err(RpcError::XidMismatch {
                        expected: xid,
                        got: decoded.header.xid,
                    });
                }
            }
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), RpcError> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
