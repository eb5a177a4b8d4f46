//! Port mapper (program 100000, version 2) client.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use xdr::{Decoder, Encoder, XdrDecode, XdrEncode, XdrError};

use crate::broadcast::BroadcastClient;
use crate::client::{resolve, Transport};
use crate::tcp::TcpClient;
use crate::udp::UdpClient;
use crate::RpcError;

/// Port mapper program number.
pub const PMAP_PROG: u32 = 100_000;
/// Port mapper program version.
pub const PMAP_VERS: u32 = 2;
/// Well-known port mapper port.
pub const PMAP_PORT: u16 = 111;

/// Port mapper procedure numbers.
pub mod procs {
    pub const NULL: u32 = 0;
    pub const SET: u32 = 1;
    pub const UNSET: u32 = 2;
    pub const GETPORT: u32 = 3;
    pub const DUMP: u32 = 4;
    pub const CALLIT: u32 = 5;
}

/// Transport protocol of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Other(u32),
}

impl Protocol {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            other => Protocol::Other(other),
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(raw) => raw,
        }
    }
}

/// A (program, version, protocol, port) registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping {
    pub program: u32,
    pub version: u32,
    pub protocol: Protocol,
    pub port: u32,
}

impl XdrEncode for Mapping {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.program);
        enc.put_u32(self.version);
        enc.put_u32(self.protocol.to_raw());
        enc.put_u32(self.port);
    }
}

impl XdrDecode for Mapping {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            program: dec.get_u32()?,
            version: dec.get_u32()?,
            protocol: Protocol::from_raw(dec.get_u32()?),
            port: dec.get_u32()?,
        })
    }
}

/// Arguments of an indirect call through the port mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallArgs {
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
    pub args: Bytes,
}

impl XdrEncode for CallArgs {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.program);
        enc.put_u32(self.version);
        enc.put_u32(self.procedure);
        enc.put_opaque(&self.args);
    }
}

impl XdrDecode for CallArgs {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            program: dec.get_u32()?,
            version: dec.get_u32()?,
            procedure: dec.get_u32()?,
            args: dec.get()?,
        })
    }
}

/// Result of an indirect call: the callee's port and its encoded results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub port: u32,
    pub result: Bytes,
}

impl XdrEncode for CallResult {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.port);
        enc.put_opaque(&self.result);
    }
}

impl XdrDecode for CallResult {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            port: dec.get_u32()?,
            result: dec.get()?,
        })
    }
}

/// Mapping list as carried by DUMP: an XDR optional-data chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingList(pub Vec<Mapping>);

impl XdrEncode for MappingList {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_list(&self.0, |enc, mapping| enc.put(mapping));
    }
}

impl XdrDecode for MappingList {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        dec.get_list(Mapping::decode).map(MappingList)
    }
}

fn port_from_raw(raw: u32) -> Result<u16, RpcError> {
    u16::try_from(raw).map_err(|_| RpcError::BadFormat(format!("port {raw} out of range")))
}

/// Port mapper client layered over any transport.
#[derive(Debug)]
pub struct PortMapper<T: Transport> {
    client: T,
}

impl PortMapper<TcpClient> {
    /// Connect to the port mapper of `host` over TCP.
    pub fn tcp(host: &str) -> Result<Self, RpcError> {
        Self::tcp_at(resolve(host, PMAP_PORT)?)
    }

    pub fn tcp_at(addr: SocketAddr) -> Result<Self, RpcError> {
        Ok(Self::new(TcpClient::connect_addr(addr, PMAP_PROG, PMAP_VERS)?))
    }
}

impl PortMapper<UdpClient> {
    /// Connect to the port mapper of `host` over UDP.
    pub fn udp(host: &str) -> Result<Self, RpcError> {
        Self::udp_at(resolve(host, PMAP_PORT)?)
    }

    pub fn udp_at(addr: SocketAddr) -> Result<Self, RpcError> {
        Ok(Self::new(UdpClient::connect_addr(addr, PMAP_PROG, PMAP_VERS)?))
    }
}

impl<T: Transport> PortMapper<T> {
    /// Port mapper calls over an existing transport.
    pub fn new(client: T) -> Self {
        Self { client }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.client
    }

    pub fn into_inner(self) -> T {
        self.client
    }

    /// Ping the port mapper.
    pub fn null(&mut self) -> Result<(), RpcError> {
        self.client.null()
    }

    /// Register a mapping; false when the port mapper refuses it.
    pub fn set(&mut self, mapping: &Mapping) -> Result<bool, RpcError> {
        self.client.call(procs::SET, mapping)
    }

    /// Remove a mapping; false when none existed.
    pub fn unset(&mut self, mapping: &Mapping) -> Result<bool, RpcError> {
        self.client.call(procs::UNSET, mapping)
    }

    /// Look up the port of a program; 0 means not registered.
    pub fn get_port(&mut self, program: u32, version: u32, protocol: Protocol) -> Result<u16, RpcError> {
        let mapping = Mapping {
            program,
            version,
            protocol,
            port: 0,
        };
        let raw: u32 = self.client.call(procs::GETPORT, &mapping)?;
        debug!(program, version, ?protocol, port = raw, "port mapper lookup");
        port_from_raw(raw)
    }

    /// Every mapping the port mapper holds.
    pub fn dump(&mut self) -> Result<Vec<Mapping>, RpcError> {
        let list: MappingList = self.client.call(procs::DUMP, &())?;
        Ok(list.0)
    }

    /// Call a procedure of another program through the port mapper.
    pub fn callit(&mut self, args: &CallArgs) -> Result<CallResult, RpcError> {
        self.client.call(procs::CALLIT, args)
    }
}

/// Port mapper client over a broadcast socket.
#[derive(Debug)]
pub struct BroadcastPortMapper {
    client: BroadcastClient,
}

impl BroadcastPortMapper {
    /// Broadcast to the port mappers reachable through `broadcast`.
    pub fn new(broadcast: IpAddr) -> Result<Self, RpcError> {
        Self::with_dest(SocketAddr::new(broadcast, PMAP_PORT))
    }

    /// Broadcast to an explicit destination, port included.
    pub fn with_dest(dest: SocketAddr) -> Result<Self, RpcError> {
        Ok(Self {
            client: BroadcastClient::new(dest, PMAP_PROG, PMAP_VERS)?,
        })
    }

    pub fn from_client(client: BroadcastClient) -> Self {
        Self { client }
    }

    /// Set the reply collection window; `None` waits without bound.
    pub fn set_window(&mut self, window: Option<Duration>) {
        self.client.set_window(window);
    }

    /// Ask every port mapper for a program's port; responders without it are dropped.
    pub fn get_port<F>(
        &mut self,
        program: u32,
        version: u32,
        protocol: Protocol,
        mut on_reply: F,
    ) -> Result<Vec<(u16, SocketAddr)>, RpcError>
    where
        F: FnMut(u16, SocketAddr),
    {
        let mapping = Mapping {
            program,
            version,
            protocol,
            port: 0,
        };
        let replies: Vec<(u32, SocketAddr)> = self.client.call(procs::GETPORT, &mapping, |_, _| {})?;
        let mut found = Vec::new();
        for (raw, src) in replies {
            if raw == 0 {
                debug!(%src, program, version, "program not registered at responder");
                continue;
            }
            let port = match port_from_raw(raw) {
                Ok(port) => port,
                Err(err) => {
                    warn!(%src, %err, "skipping responder with unusable port");
                    continue;
                }
            };
            on_reply(port, src);
            found.push((port, src));
        }
        Ok(found)
    }

    /// Broadcast an indirect call and decode each callee's results as `R`.
    pub fn callit<A, R, F>(
        &mut self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &A,
        mut on_reply: F,
    ) -> Result<Vec<(R, SocketAddr)>, RpcError>
    where
        A: XdrEncode + ?Sized,
        R: XdrDecode,
        F: FnMut(&R, SocketAddr),
    {
        let call = CallArgs {
            program,
            version,
            procedure,
            args: xdr::to_bytes(args),
        };
        let mut results = Vec::new();
        self.client.call(procs::CALLIT, &call, |reply: &CallResult, src| {
            match xdr::from_bytes::<R>(&reply.result) {
                Ok(value) => {
                    on_reply(&value, src);
                    results.push((value, src));
                }
                Err(err) => debug!(%src, %err, "discarding undecodable indirect result"),
            }
        })?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CallContext;
    use crate::message::{decode_reply, CallHeader, ReplyHeader};
    use crate::server::{Program, TcpServer, UdpServer};
    use std::collections::HashMap;
    use std::net::UdpSocket;
    use std::sync::{Arc, Mutex};
    use std::thread;

    const CALLEE_PROG: u32 = 0x2000_0077;
    const CALLEE_PORT: u32 = 4242;

    /// Target of indirect calls: procedure 1 doubles a u32, procedure 2 returns nothing.
    fn callee() -> Program {
        Program::new(CALLEE_PROG, 1)
            .procedure(1, |args, out| {
                let value: u32 = args.get()?;
                out.put_u32(value * 2);
                Ok(())
            })
            .unwrap()
            .procedure(2, |_, _| Ok(()))
            .unwrap()
    }

    /// In-process port mapper backed by a shared table.
    fn portmapper(table: Arc<Mutex<HashMap<(u32, u32, Protocol), u32>>>) -> Program {
        let set_table = Arc::clone(&table);
        let unset_table = Arc::clone(&table);
        let get_table = Arc::clone(&table);
        let dump_table = Arc::clone(&table);
        let mut inner = callee();
        Program::new(PMAP_PROG, PMAP_VERS)
            .procedure(procs::SET, move |args, out| {
                let m: Mapping = args.get()?;
                let mut table = set_table.lock().unwrap();
                let key = (m.program, m.version, m.protocol);
                let fresh = !table.contains_key(&key);
                if fresh {
                    table.insert(key, m.port);
                }
                out.put_bool(fresh);
                Ok(())
            })
            .unwrap()
            .procedure(procs::UNSET, move |args, out| {
                let m: Mapping = args.get()?;
                let removed = unset_table
                    .lock()
                    .unwrap()
                    .remove(&(m.program, m.version, m.protocol))
                    .is_some();
                out.put_bool(removed);
                Ok(())
            })
            .unwrap()
            .procedure(procs::GETPORT, move |args, out| {
                let m: Mapping = args.get()?;
                let table = get_table.lock().unwrap();
                out.put_u32(*table.get(&(m.program, m.version, m.protocol)).unwrap_or(&0));
                Ok(())
            })
            .unwrap()
            .procedure(procs::DUMP, move |_, out| {
                let table = dump_table.lock().unwrap();
                let mut list: Vec<Mapping> = table
                    .iter()
                    .map(|(&(program, version, protocol), &port)| Mapping {
                        program,
                        version,
                        protocol,
                        port,
                    })
                    .collect();
                list.sort_by_key(|m| (m.program, m.version));
                out.put(&MappingList(list));
                Ok(())
            })
            .unwrap()
            .procedure(procs::CALLIT, move |args, out| {
                let call: CallArgs = args.get()?;
                let mut ctx = CallContext::new(call.program, call.version);
                let (_, message) = ctx.start_call(call.procedure, &call.args);
                let reply = inner.dispatch(&message).unwrap();
                let reply = decode_reply(&reply).unwrap();
                out.put(&CallResult {
                    port: CALLEE_PORT,
                    result: Bytes::copy_from_slice(reply.results),
                });
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn mapping_layout() {
        let mapping = Mapping {
            program: 0x0607AF,
            version: 1,
            protocol: Protocol::Tcp,
            port: 1024,
        };
        let bytes = xdr::to_bytes(&mapping);
        assert_eq!(&bytes[..4], &0x0607AFu32.to_be_bytes());
        assert_eq!(&bytes[8..12], &6u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &1024u32.to_be_bytes());
        assert_eq!(xdr::from_bytes::<Mapping>(&bytes).unwrap(), mapping);
    }

    #[test]
    fn set_get_dump_unset_over_tcp() {
        let table = Arc::new(Mutex::new(HashMap::new()));
        let server = TcpServer::bind("127.0.0.1:0", portmapper(table)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut pmap = PortMapper::tcp_at(addr).unwrap();
        pmap.null().unwrap();
        assert_eq!(pmap.get_port(0x0607AF, 1, Protocol::Tcp).unwrap(), 0);

        let mapping = Mapping {
            program: 0x0607AF,
            version: 1,
            protocol: Protocol::Tcp,
            port: 4000,
        };
        assert!(pmap.set(&mapping).unwrap());
        assert!(!pmap.set(&mapping).unwrap());
        assert_eq!(pmap.get_port(0x0607AF, 1, Protocol::Tcp).unwrap(), 4000);
        assert_eq!(pmap.get_port(0x0607AF, 1, Protocol::Udp).unwrap(), 0);
        assert_eq!(pmap.dump().unwrap(), vec![mapping]);
        assert!(pmap.unset(&mapping).unwrap());
        assert!(pmap.dump().unwrap().is_empty());
    }

    #[test]
    fn get_port_over_udp() {
        let table = Arc::new(Mutex::new(HashMap::from([((7, 1, Protocol::Udp), 555)])));
        let server = UdpServer::bind("127.0.0.1:0", portmapper(table)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut pmap = PortMapper::udp_at(addr).unwrap();
        assert_eq!(pmap.get_port(7, 1, Protocol::Udp).unwrap(), 555);
    }

    #[test]
    fn unregistered_program_is_distinct_failure() {
        let table = Arc::new(Mutex::new(HashMap::new()));
        let server = TcpServer::bind("127.0.0.1:0", portmapper(table)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let err = TcpClient::connect_via_portmapper("127.0.0.1", 0x0607AF, 1, addr.port()).unwrap_err();
        assert!(matches!(err, RpcError::NotRegistered { prog: 0x0607AF, vers: 1 }));
    }

    #[test]
    fn servers_register_and_unregister() {
        let table = Arc::new(Mutex::new(HashMap::new()));
        let pmap_server = UdpServer::bind("127.0.0.1:0", portmapper(Arc::clone(&table))).unwrap();
        let pmap_addr = pmap_server.local_addr().unwrap();
        thread::spawn(move || pmap_server.run());

        let service = TcpServer::bind("127.0.0.1:0", Program::new(0x2000_0042, 1)).unwrap();
        let port = service.local_addr().unwrap().port();
        service.register(pmap_addr).unwrap();
        let mut pmap = PortMapper::udp_at(pmap_addr).unwrap();
        assert_eq!(pmap.get_port(0x2000_0042, 1, Protocol::Tcp).unwrap(), port);

        service.unregister(pmap_addr).unwrap();
        assert_eq!(pmap.get_port(0x2000_0042, 1, Protocol::Tcp).unwrap(), 0);
        let err = service.unregister(pmap_addr).unwrap_err();
        assert!(matches!(err, RpcError::RegistrationFailed("unset")));
    }

    #[test]
    fn broadcast_get_port_skips_unregistered() {
        let table = Arc::new(Mutex::new(HashMap::from([((9, 1, Protocol::Tcp), 777)])));
        let server = UdpServer::bind("127.0.0.1:0", portmapper(table)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut pmap = BroadcastPortMapper::with_dest(addr).unwrap();
        pmap.set_window(Some(Duration::from_millis(200)));
        let found = pmap.get_port(9, 1, Protocol::Tcp, |_, _| {}).unwrap();
        assert_eq!(found, vec![(777, addr)]);

        let missing = pmap.get_port(10, 1, Protocol::Tcp, |_, _| {}).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn broadcast_get_port_skips_out_of_range_port() {
        let first = UdpSocket::bind("127.0.0.1:0").unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (len, src) = first.recv_from(&mut buf).unwrap();
            let header = CallHeader::decode(&mut Decoder::new(&buf[..len])).unwrap();
            for (socket, port) in [(&second, 70_000u32), (&first, 777)] {
                let mut enc = Encoder::new();
                enc.put(&ReplyHeader::success(header.xid));
                enc.put_u32(port);
                socket.send_to(&enc.freeze(), src).unwrap();
            }
        });

        let mut pmap = BroadcastPortMapper::with_dest(addr).unwrap();
        pmap.set_window(Some(Duration::from_millis(300)));
        let found = pmap.get_port(9, 1, Protocol::Tcp, |_, _| {}).unwrap();
        assert_eq!(found, vec![(777, addr)]);
    }

    #[test]
    fn callit_unwraps_the_callee_result() {
        let table = Arc::new(Mutex::new(HashMap::new()));
        let server = UdpServer::bind("127.0.0.1:0", portmapper(table)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut pmap = PortMapper::udp_at(addr).unwrap();
        let reply = pmap
            .callit(&CallArgs {
                program: CALLEE_PROG,
                version: 1,
                procedure: 1,
                args: xdr::to_bytes(&21u32),
            })
            .unwrap();
        assert_eq!(reply.port, CALLEE_PORT);
        assert_eq!(xdr::from_bytes::<u32>(&reply.result).unwrap(), 42);
    }

    #[test]
    fn broadcast_callit_decodes_each_result() {
        let table = Arc::new(Mutex::new(HashMap::new()));
        let server = UdpServer::bind("127.0.0.1:0", portmapper(table)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.run());

        let mut pmap = BroadcastPortMapper::with_dest(addr).unwrap();
        pmap.set_window(Some(Duration::from_millis(200)));
        let mut seen = Vec::new();
        let found = pmap
            .callit::<u32, u32, _>(CALLEE_PROG, 1, 1, &21, |value, src| seen.push((*value, src)))
            .unwrap();
        assert_eq!(found, vec![(42, addr)]);
        assert_eq!(seen, found);

        let empty = pmap
            .callit::<u32, u32, _>(CALLEE_PROG, 1, 2, &21, |_, _| panic!("nothing decodes"))
            .unwrap();
        assert!(empty.is_empty());
    }
}
