//! ONC RPC v2: message headers, TCP record marking, blocking TCP/UDP/broadcast
//! clients, the port mapper and a small fixed-table server.

pub mod broadcast;
pub mod client;
pub mod error;
pub mod message;
pub mod portmap;
pub mod record;
pub mod server;
pub mod tcp;
pub mod udp;

pub use broadcast::{broadcast_interfaces, BroadcastClient, BroadcastInterface, DEFAULT_WINDOW};
pub use client::{CallContext, Transport};
pub use error::RpcError;
pub use message::{AcceptStat, AuthFlavor, AuthStat, OpaqueAuth, RejectReason};
pub use portmap::{BroadcastPortMapper, Mapping, PortMapper, Protocol, PMAP_PORT, PMAP_PROG, PMAP_VERS};
pub use server::{Program, TcpServer, UdpServer};
pub use tcp::TcpClient;
pub use udp::{RetryPolicy, UdpClient};
