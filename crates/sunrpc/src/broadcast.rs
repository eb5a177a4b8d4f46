//! Broadcast RPC: one datagram out, every matching reply within a window back.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use if_addrs::{get_if_addrs, IfAddr};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};
use xdr::{XdrDecode, XdrEncode};

use crate::client::CallContext;
use crate::message::decode_reply;
use crate::udp::MAX_DATAGRAM;
use crate::RpcError;

/// Default reply collection window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// IPv4 interface usable for broadcast calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastInterface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

/// List non-loopback IPv4 interfaces, optionally only the one named `filter`.
pub fn broadcast_interfaces(filter: Option<&str>) -> io::Result<Vec<BroadcastInterface>> {
    let mut interfaces = Vec::new();
    for iface in get_if_addrs()? {
        let IfAddr::V4(v4) = iface.addr else {
            continue;
        };
        if v4.ip.is_loopback() {
            continue;
        }
        if let Some(filter) = filter {
            if iface.name != filter {
                continue;
            }
        }
        interfaces.push(BroadcastInterface {
            name: iface.name,
            addr: v4.ip,
            broadcast: v4.broadcast.unwrap_or(Ipv4Addr::BROADCAST),
        });
    }
    Ok(interfaces)
}

/// RPC client that sends each call to a broadcast address.
#[derive(Debug)]
pub struct BroadcastClient {
    socket: UdpSocket,
    dest: SocketAddr,
    ctx: CallContext,
    window: Option<Duration>,
}

impl BroadcastClient {
    /// Create a client sending to `dest` from an ephemeral wildcard socket.
    pub fn new(dest: SocketAddr, prog: u32, vers: u32) -> Result<Self, RpcError> {
        Self::bind(Ipv4Addr::UNSPECIFIED, dest, prog, vers)
    }

    /// Create a client whose socket is bound to a specific local interface address.
    pub fn bind(local: Ipv4Addr, dest: SocketAddr, prog: u32, vers: u32) -> Result<Self, RpcError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        let addr = SocketAddr::new(IpAddr::V4(local), 0);
        socket.bind(&addr.into())?;
        let socket: UdpSocket = socket.into();
        debug!(local = %addr, %dest, prog, vers, "bound broadcast RPC socket");
        Ok(Self {
            socket,
            dest,
            ctx: CallContext::new(prog, vers),
            window: Some(DEFAULT_WINDOW),
        })
    }

    /// Set the collection window; `None` waits without bound.
    pub fn set_window(&mut self, window: Option<Duration>) {
        self.window = window;
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Broadcast a call and collect the decoded replies of every distinct sender.
    ///
    /// `on_reply` runs for each accepted reply as it arrives.
    pub fn call<A, R, F>(
        &mut self,
        proc_num: u32,
        args: &A,
        mut on_reply: F,
    ) -> Result<Vec<(R, SocketAddr)>, RpcError>
    where
        A: XdrEncode + ?Sized,
        R: XdrDecode,
        F: FnMut(&R, SocketAddr),
    {
        let mut replies = Vec::new();
        self.call_raw(proc_num, &xdr::to_bytes(args), |results, src| {
            match xdr::from_bytes::<R>(results) {
                Ok(value) => {
                    on_reply(&value, src);
                    replies.push((value, src));
                }
                Err(err) => warn!(%src, %err, "discarding undecodable broadcast reply"),
            }
        })?;
        Ok(replies)
    }

    /// Broadcast pre-encoded arguments, handing each matching result body to `on_reply`.
    pub fn call_raw<F>(&mut self, proc_num: u32, args: &[u8], mut on_reply: F) -> Result<usize, RpcError>
    where
        F: FnMut(&[u8], SocketAddr),
    {
        let (xid, call) = self.ctx.start_call(proc_num, args);
        info!(xid, proc_num, dest = %self.dest, "sending broadcast call");
        self.socket.send_to(&call, self.dest)?;

        let started = Instant::now();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut seen = HashSet::new();
        loop {
            let timeout = match self.window {
                Some(window) => match window.checked_sub(started.elapsed()) {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => break,
                },
                None => None,
            };
            self.socket.set_read_timeout(timeout)?;
            let (len, src) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    break;
                }
                Err(err) => return Err(RpcError::Io(err)),
            };
            trace!(bytes = len, %src, "received broadcast reply");
            let reply = match decode_reply(&buf[..len]) {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(%src, %err, "discarding malformed broadcast reply");
                    continue;
                }
            };
            if reply.header.xid != xid {
                debug!(expected = xid, got = reply.header.xid, %src, "discarding reply with foreign xid");
                continue;
            }
            if let Err(err) = reply.header.clone().into_result() {
                warn!(%src, %err, "responder rejected broadcast call");
                continue;
            }
            if !seen.insert(src) {
                debug!(%src, "duplicate broadcast reply");
                continue;
            }
            on_reply(reply.results, src);
        }
        info!(xid, replies = seen.len(), "broadcast window closed");
        Ok(seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CallHeader, ReplyHeader};
    use std::thread;
    use xdr::{Decoder, Encoder};

    fn spawn_responder(value: u32, copies: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (len, src) = socket.recv_from(&mut buf).unwrap();
            let header = CallHeader::decode(&mut Decoder::new(&buf[..len])).unwrap();
            let mut stale = Encoder::new();
            stale.put(&ReplyHeader::success(header.xid.wrapping_add(100)));
            stale.put_u32(0);
            socket.send_to(stale.as_slice(), src).unwrap();
            for _ in 0..copies {
                let mut enc = Encoder::new();
                enc.put(&ReplyHeader::success(header.xid));
                enc.put_u32(value);
                socket.send_to(enc.as_slice(), src).unwrap();
            }
        });
        addr
    }

    #[test]
    fn collects_matching_replies_within_window() {
        // Loopback has no broadcast address, so a unicast destination stands in.
        let dest = spawn_responder(7, 2);
        let mut client = BroadcastClient::new(dest, 0x2000_0000, 1).unwrap();
        client.set_window(Some(Duration::from_millis(300)));
        let mut seen = Vec::new();
        let replies: Vec<(u32, SocketAddr)> = client
            .call(1, &(), |value: &u32, src| seen.push((*value, src)))
            .unwrap();
        assert_eq!(replies, vec![(7, dest)]);
        assert_eq!(seen, replies);
    }

    #[test]
    fn empty_window_returns_no_replies() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = silent.local_addr().unwrap();
        let mut client = BroadcastClient::new(dest, 0x2000_0000, 1).unwrap();
        client.set_window(Some(Duration::from_millis(50)));
        let replies: Vec<(u32, SocketAddr)> = client.call(1, &(), |_, _| {}).unwrap();
        assert!(replies.is_empty());
    }
}
