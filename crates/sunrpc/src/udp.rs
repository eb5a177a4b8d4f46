//! Datagram RPC with timeout and exponential-backoff resend.
//!
//! Every resend repeats the identical call, so only idempotent procedures
//! should go through this client.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::client::{resolve, CallContext, Transport};
use crate::message::decode_reply;
use crate::portmap::{PortMapper, Protocol, PMAP_PORT, PMAP_PROG, PMAP_VERS};
use crate::RpcError;

/// Largest datagram we accept as a reply.
pub const MAX_DATAGRAM: usize = 65_535;

/// Resend schedule of the UDP client.
///
/// The call is transmitted `attempts` times; after transmission `k` the
/// client waits `min(initial * 2^k, ceiling)` for a matching reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub ceiling: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_unit(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Default schedule (1, 2, 4, 8, 16; capped at 25) expressed in `unit`.
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            initial: unit,
            ceiling: unit * 25,
            attempts: 5,
        }
    }

    /// Default schedule scaled so that all waits together last `total`.
    pub fn within(total: Duration) -> Self {
        let units: u32 = (0..5).map(|k| (1u32 << k).min(25)).sum();
        Self::with_unit(total / units)
    }

    /// Wait applied after each transmission, in order.
    pub fn waits(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts).map(move |k| {
            let factor = 1u32.checked_shl(k).unwrap_or(u32::MAX);
            self.initial
                .checked_mul(factor)
                .map_or(self.ceiling, |wait| wait.min(self.ceiling))
        })
    }
}

/// RPC client over a connected UDP socket.
#[derive(Debug)]
pub struct UdpClient {
    socket: UdpSocket,
    peer: SocketAddr,
    ctx: CallContext,
    retry: RetryPolicy,
    buf: Vec<u8>,
}

impl UdpClient {
    /// Bind an ephemeral socket and connect it to a program on a known port.
    pub fn connect_addr(addr: SocketAddr, prog: u32, vers: u32) -> Result<Self, RpcError> {
        let local = match addr.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
        debug!(%addr, prog, vers, "connected UDP RPC client");
        Ok(Self {
            socket,
            peer: addr,
            ctx: CallContext::new(prog, vers),
            retry: RetryPolicy::default(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Connect to `host`, asking its port mapper for the port when `port` is 0.
    pub fn connect(host: &str, prog: u32, vers: u32, port: u16) -> Result<Self, RpcError> {
        let port = if port == 0 {
            let mut pmap = PortMapper::new(Self::connect_addr(
                resolve(host, PMAP_PORT)?,
                PMAP_PROG,
                PMAP_VERS,
            )?);
            let port = pmap.get_port(prog, vers, Protocol::Udp)?;
            if port == 0 {
                return Err(RpcError::NotRegistered { prog, vers });
            }
            port
        } else {
            port
        };
        Self::connect_addr(resolve(host, port)?, prog, vers)
    }

    /// Replace the resend schedule used by later calls.
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Call bookkeeping, including the last xid sent.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Wait up to `wait` for the reply to `xid`, skipping foreign datagrams.
    fn await_reply(&mut self, xid: u32, wait: Duration) -> Result<Option<Bytes>, RpcError> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket.set_read_timeout(Some(remaining))?;
            let len = match self.socket.recv(&mut self.buf) {
                Ok(len) => len,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(RpcError::Io(err)),
            };
            let reply = match decode_reply(&self.buf[..len]) {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(expected = xid, bytes = len, %err, "discarding undecodable datagram");
                    continue;
                }
            };
            if reply.header.xid != xid {
                debug!(expected = xid, got = reply.header.xid, "discarding reply with foreign xid");
                continue;
            }
            trace!(xid, bytes = len, "received UDP reply");
            reply.header.into_result()?;
            return Ok(Some(Bytes::copy_from_slice(reply.results)));
        }
    }
}

impl Transport for UdpClient {
    fn call_raw(&mut self, proc_num: u32, args: &[u8]) -> Result<Bytes, RpcError> {
        let (xid, call) = self.ctx.start_call(proc_num, args);
        let waits: Vec<Duration> = self.retry.waits().collect();
        for (attempt, wait) in waits.into_iter().enumerate() {
            if attempt > 0 {
                warn!(xid, proc_num, attempt, ?wait, peer = %self.peer, "no reply, resending");
            }
            trace!(xid, proc_num, bytes = call.len(), attempt, "sending UDP call");
            self.socket.send(&call)?;
            if let Some(results) = self.await_reply(xid, wait)? {
                return Ok(results);
            }
        }
        Err(RpcError::Timeout)
    }

    /// Fit the whole resend schedule into `timeout`; `None` restores the default schedule.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), RpcError> {
        self.retry = match timeout {
            Some(total) => RetryPolicy::within(total),
            None => RetryPolicy::default(),
        };
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
