//! Minimal blocking RPC server: a fixed procedure table served over TCP or UDP.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use xdr::{Decoder, Encoder, XdrError};

use crate::message::{consts, AcceptStat, OpaqueAuth, RejectReason, ReplyHeader};
use crate::portmap::{Mapping, PortMapper, Protocol};
use crate::udp::MAX_DATAGRAM;
use crate::{record, RpcError};

/// Procedure implementation: decode arguments from the first argument, encode results into the second.
pub type Handler = Box<dyn FnMut(&mut Decoder<'_>, &mut Encoder) -> Result<(), XdrError> + Send>;

/// One (program, version) and its procedures.
pub struct Program {
    prog: u32,
    vers: u32,
    procedures: BTreeMap<u32, Handler>,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("prog", &self.prog)
            .field("vers", &self.vers)
            .field("procedures", &self.procedures.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Program {
    /// New program answering only procedure 0.
    pub fn new(prog: u32, vers: u32) -> Self {
        let mut procedures: BTreeMap<u32, Handler> = BTreeMap::new();
        procedures.insert(consts::NULL_PROC, Box::new(null_proc));
        Self {
            prog,
            vers,
            procedures,
        }
    }

    /// Add a procedure; each number may be registered once.
    pub fn procedure<F>(mut self, proc_num: u32, handler: F) -> Result<Self, RpcError>
    where
        F: FnMut(&mut Decoder<'_>, &mut Encoder) -> Result<(), XdrError> + Send + 'static,
    {
        if self.procedures.contains_key(&proc_num) {
            return Err(RpcError::DuplicateProcedure(proc_num));
        }
        self.procedures.insert(proc_num, Box::new(handler));
        Ok(self)
    }

    pub fn program(&self) -> u32 {
        self.prog
    }

    pub fn version(&self) -> u32 {
        self.vers
    }

    /// Handle one call message; `None` means no reply is sent.
    pub fn dispatch(&mut self, call: &[u8]) -> Option<Bytes> {
        let mut dec = Decoder::new(call);
        let xid = dec.get_u32().ok()?;
        let mtype = dec.get_u32().ok()?;
        if mtype != consts::CALL {
            debug!(xid, mtype, "ignoring non-call message");
            return None;
        }
        let header = match read_call_header(&mut dec) {
            Ok(header) => header,
            Err(err) => {
                warn!(xid, %err, "dropping malformed call header");
                return None;
            }
        };
        let (rpcvers, prog, vers, proc_num) = header;
        trace!(xid, prog, vers, proc_num, "dispatching call");

        let mut out = Encoder::new();
        if rpcvers != consts::RPC_VERSION {
            let reason = RejectReason::RpcMismatch {
                low: consts::RPC_VERSION,
                high: consts::RPC_VERSION,
            };
            out.put(&ReplyHeader::denied(xid, reason));
            return Some(out.freeze());
        }
        if prog != self.prog {
            out.put(&ReplyHeader::accepted(xid, AcceptStat::ProgUnavail));
            return Some(out.freeze());
        }
        if vers != self.vers {
            let stat = AcceptStat::ProgMismatch {
                low: self.vers,
                high: self.vers,
            };
            out.put(&ReplyHeader::accepted(xid, stat));
            return Some(out.freeze());
        }
        let Some(handler) = self.procedures.get_mut(&proc_num) else {
            out.put(&ReplyHeader::accepted(xid, AcceptStat::ProcUnavail));
            return Some(out.freeze());
        };

        let mut results = Encoder::new();
        match handler(&mut dec, &mut results) {
            Ok(()) => {
                out.put(&ReplyHeader::success(xid));
                out.put_raw(results.as_slice());
            }
            Err(err) => {
                debug!(xid, proc_num, %err, "garbage arguments");
                out.put(&ReplyHeader::accepted(xid, AcceptStat::GarbageArgs));
            }
        }
        Some(out.freeze())
    }
}

fn null_proc(_: &mut Decoder<'_>, _: &mut Encoder) -> Result<(), XdrError> {
    Ok(())
}

fn read_call_header(dec: &mut Decoder<'_>) -> Result<(u32, u32, u32, u32), XdrError> {
    let rpcvers = dec.get_u32()?;
    let prog = dec.get_u32()?;
    let vers = dec.get_u32()?;
    let proc_num = dec.get_u32()?;
    let _cred: OpaqueAuth = dec.get()?;
    let _verf: OpaqueAuth = dec.get()?;
    Ok((rpcvers, prog, vers, proc_num))
}

fn register_with(pmap: SocketAddr, mapping: Mapping) -> Result<(), RpcError> {
    let mut client = PortMapper::udp_at(pmap)?;
    // Clear any stale entry first; a missing one is fine.
    let _ = client.unset(&mapping)?;
    if !client.set(&mapping)? {
        return Err(RpcError::RegistrationFailed("set"));
    }
    info!(prog = mapping.program, vers = mapping.version, port = mapping.port, "registered with port mapper");
    Ok(())
}

fn unregister_with(pmap: SocketAddr, mapping: Mapping) -> Result<(), RpcError> {
    let mut client = PortMapper::udp_at(pmap)?;
    if !client.unset(&mapping)? {
        return Err(RpcError::RegistrationFailed("unset"));
    }
    info!(prog = mapping.program, vers = mapping.version, "unregistered from port mapper");
    Ok(())
}

/// Record-marked server; connections are served one after another.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    program: Program,
    max_fragment: usize,
}

impl TcpServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, program: Program) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(addr)?;
        debug!(addr = ?listener.local_addr().ok(), prog = program.prog, "TCP RPC server listening");
        Ok(Self {
            listener,
            program,
            max_fragment: record::MAX_FRAGMENT,
        })
    }

    /// Split outgoing replies into fragments of at most `max_fragment` bytes.
    pub fn with_max_fragment(mut self, max_fragment: usize) -> Self {
        self.max_fragment = max_fragment.clamp(1, record::MAX_FRAGMENT);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Announce this server's port to the port mapper at `pmap`.
    pub fn register(&self, pmap: SocketAddr) -> Result<(), RpcError> {
        register_with(pmap, self.mapping()?)
    }

    /// Withdraw the mapping added by `register`.
    pub fn unregister(&self, pmap: SocketAddr) -> Result<(), RpcError> {
        unregister_with(pmap, self.mapping()?)
    }

    fn mapping(&self) -> Result<Mapping, RpcError> {
        Ok(Mapping {
            program: self.program.prog,
            version: self.program.vers,
            protocol: Protocol::Tcp,
            port: u32::from(self.local_addr()?.port()),
        })
    }

    /// Serve calls on one connection until the peer closes it.
    pub fn serve_connection(&mut self, mut stream: TcpStream) -> Result<(), RpcError> {
        let peer = stream.peer_addr().ok();
        loop {
            let call = match record::read_record(&mut stream) {
                Ok(call) => call,
                Err(err) => {
                    return match RpcError::from(err) {
                        RpcError::ConnectionClosed => {
                            debug!(?peer, "client disconnected");
                            Ok(())
                        }
                        other => Err(other),
                    };
                }
            };
            if let Some(reply) = self.program.dispatch(&call) {
                record::write_record_fragmented(&mut stream, &reply, self.max_fragment)?;
            }
        }
    }

    /// Accept and serve connections forever.
    pub fn run(mut self) -> Result<(), RpcError> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            debug!(%peer, "accepted RPC connection");
            if let Err(err) = self.serve_connection(stream) {
                warn!(%peer, %err, "connection ended with error");
            }
        }
    }
}

/// Datagram server; one call per datagram.
#[derive(Debug)]
pub struct UdpServer {
    socket: UdpSocket,
    program: Program,
    buf: Vec<u8>,
}

impl UdpServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, program: Program) -> Result<Self, RpcError> {
        let socket = UdpSocket::bind(addr)?;
        debug!(addr = ?socket.local_addr().ok(), prog = program.prog, "UDP RPC server listening");
        Ok(Self {
            socket,
            program,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn register(&self, pmap: SocketAddr) -> Result<(), RpcError> {
        register_with(pmap, self.mapping()?)
    }

    pub fn unregister(&self, pmap: SocketAddr) -> Result<(), RpcError> {
        unregister_with(pmap, self.mapping()?)
    }

    fn mapping(&self) -> Result<Mapping, RpcError> {
        Ok(Mapping {
            program: self.program.prog,
            version: self.program.vers,
            protocol: Protocol::Udp,
            port: u32::from(self.local_addr()?.port()),
        })
    }

    /// Receive one datagram and answer it.
    pub fn serve_one(&mut self) -> Result<(), RpcError> {
        let (len, src) = self.socket.recv_from(&mut self.buf)?;
        if let Some(reply) = self.program.dispatch(&self.buf[..len]) {
            self.socket.send_to(&reply, src)?;
        }
        Ok(())
    }

    /// Serve datagrams forever; errors on a single datagram are logged.
    pub fn run(mut self) -> Result<(), RpcError> {
        loop {
            if let Err(err) = self.serve_one() {
                warn!(%err, "UDP RPC server error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Transport;
    use crate::tcp::TcpClient;
    use crate::udp::{RetryPolicy, UdpClient};
    use std::thread;
    use std::time::Duration;

    fn echo_program() -> Program {
        Program::new(0x2000_0001, 3)
            .procedure(1, |args, out| {
                let value = args.get_u32()?;
                out.put_u32(value + 1);
                Ok(())
            })
            .unwrap()
            .procedure(2, |args, out| {
                let data = args.get_opaque()?;
                out.put_opaque(data);
                Ok(())
            })
            .unwrap()
    }

    fn call(program: &mut Program, rpcvers: u32, prog: u32, vers: u32, proc_num: u32, args: &[u8]) -> Bytes {
        let mut enc = Encoder::new();
        enc.put_u32(77);
        enc.put_u32(consts::CALL);
        enc.put_u32(rpcvers);
        enc.put_u32(prog);
        enc.put_u32(vers);
        enc.put_u32(proc_num);
        enc.put(&OpaqueAuth::null());
        enc.put(&OpaqueAuth::null());
        enc.put_raw(args);
        program.dispatch(enc.as_slice()).unwrap()
    }

    fn outcome(reply: &[u8]) -> Result<Vec<u8>, RpcError> {
        let reply = crate::message::decode_reply(reply)?;
        assert_eq!(reply.header.xid, 77);
        reply.header.into_result()?;
        Ok(reply.results.to_vec())
    }

    #[test]
    fn duplicate_procedure_is_rejected() {
        let err = Program::new(1, 1).procedure(0, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, RpcError::DuplicateProcedure(0)));
    }

    #[test]
    fn dispatch_statuses() {
        let mut program = echo_program();
        assert_eq!(outcome(&call(&mut program, 2, 0x2000_0001, 3, 1, &[0, 0, 0, 4])).unwrap(), vec![0, 0, 0, 5]);
        assert!(outcome(&call(&mut program, 2, 0x2000_0001, 3, 0, &[])).unwrap().is_empty());
        assert!(matches!(
            outcome(&call(&mut program, 3, 0x2000_0001, 3, 1, &[])),
            Err(RpcError::RpcMismatch { low: 2, high: 2 })
        ));
        assert!(matches!(
            outcome(&call(&mut program, 2, 0x2000_0002, 3, 1, &[])),
            Err(RpcError::ProgUnavail)
        ));
        assert!(matches!(
            outcome(&call(&mut program, 2, 0x2000_0001, 4, 1, &[])),
            Err(RpcError::ProgMismatch { low: 3, high: 3 })
        ));
        assert!(matches!(
            outcome(&call(&mut program, 2, 0x2000_0001, 3, 9, &[])),
            Err(RpcError::ProcUnavail)
        ));
        assert!(matches!(
            outcome(&call(&mut program, 2, 0x2000_0001, 3, 1, &[0, 0])),
            Err(RpcError::GarbageArgs)
        ));
    }

    #[test]
    fn replies_are_not_sent_for_non_calls() {
        let mut program = echo_program();
        let mut enc = Encoder::new();
        enc.put(&ReplyHeader::success(1));
        assert!(program.dispatch(enc.as_slice()).is_none());
        assert!(program.dispatch(&[0, 0]).is_none());
    }

    #[test]
    fn tcp_server_with_small_fragments() {
        let server = TcpServer::bind("127.0.0.1:0", echo_program())
            .unwrap()
            .with_max_fragment(8);
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut client = TcpClient::connect_addr(addr, 0x2000_0001, 3).unwrap();
        client.null().unwrap();
        let payload: Vec<u8> = (0..50).collect();
        let echoed: Vec<u8> = client.call(2, payload.as_slice()).unwrap();
        assert_eq!(echoed, payload);
        let next: u32 = client.call(1, &41u32).unwrap();
        assert_eq!(next, 42);
    }

    #[test]
    fn udp_server_answers() {
        let server = UdpServer::bind("127.0.0.1:0", echo_program()).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut client = UdpClient::connect_addr(addr, 0x2000_0001, 3).unwrap();
        client.set_retry_policy(RetryPolicy::with_unit(Duration::from_millis(200)));
        let next: u32 = client.call(1, &9u32).unwrap();
        assert_eq!(next, 10);
    }
}
