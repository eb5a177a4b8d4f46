//! Typed procedure stubs of the core and abort channels.
//!
//! These return the raw device responses; mapping non-zero error codes is
//! left to [`crate::Device`].

use std::net::SocketAddr;

use sunrpc::{RpcError, TcpClient, Transport};

use crate::consts::{procs, DEVICE_ASYNC_PROG, DEVICE_ASYNC_VERS, DEVICE_CORE_PROG, DEVICE_CORE_VERS};
use crate::protocol::{
    CreateLinkParms, CreateLinkResp, DeviceLink, DocmdParms, DocmdResp, EnableSrqParms, GenericParms,
    LockParms, ReadParms, ReadResp, ReadStbResp, RemoteFunc, WriteParms, WriteResp,
};

/// Client of the core device program (0x0607AF v1).
#[derive(Debug)]
pub struct CoreClient<T: Transport = TcpClient> {
    rpc: T,
}

impl CoreClient<TcpClient> {
    /// Connect on a fixed port, or through the port mapper at `pmap_port` when `port` is `None`.
    pub fn connect(host: &str, port: Option<u16>, pmap_port: u16) -> Result<Self, RpcError> {
        let rpc = match port {
            Some(port) => TcpClient::connect(host, DEVICE_CORE_PROG, DEVICE_CORE_VERS, port)?,
            None => TcpClient::connect_via_portmapper(host, DEVICE_CORE_PROG, DEVICE_CORE_VERS, pmap_port)?,
        };
        Ok(Self::new(rpc))
    }

    /// Shut the connection down.
    pub fn close(self) {
        self.rpc.close();
    }
}

impl<T: Transport> CoreClient<T> {
    /// Wrap an already connected transport.
    pub fn new(rpc: T) -> Self {
        Self { rpc }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.rpc
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.rpc.peer_addr()
    }

    pub fn into_inner(self) -> T {
        self.rpc
    }

    /// Procedure 10.
    pub fn create_link(&mut self, parms: &CreateLinkParms) -> Result<CreateLinkResp, RpcError> {
        self.rpc.call(procs::CREATE_LINK, parms)
    }

    /// Procedure 11.
    pub fn device_write(&mut self, parms: &WriteParms) -> Result<WriteResp, RpcError> {
        self.rpc.call(procs::DEVICE_WRITE, parms)
    }

    /// Procedure 12.
    pub fn device_read(&mut self, parms: &ReadParms) -> Result<ReadResp, RpcError> {
        self.rpc.call(procs::DEVICE_READ, parms)
    }

    pub fn device_readstb(&mut self, parms: &GenericParms) -> Result<ReadStbResp, RpcError> {
        self.rpc.call(procs::DEVICE_READSTB, parms)
    }

    pub fn device_trigger(&mut self, parms: &GenericParms) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_TRIGGER, parms)
    }

    pub fn device_clear(&mut self, parms: &GenericParms) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_CLEAR, parms)
    }

    pub fn device_remote(&mut self, parms: &GenericParms) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_REMOTE, parms)
    }

    pub fn device_local(&mut self, parms: &GenericParms) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_LOCAL, parms)
    }

    pub fn device_lock(&mut self, parms: &LockParms) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_LOCK, parms)
    }

    pub fn device_unlock(&mut self, link: DeviceLink) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_UNLOCK, &link)
    }

    pub fn device_enable_srq(&mut self, parms: &EnableSrqParms) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_ENABLE_SRQ, parms)
    }

    /// Raw docmd; the reply carries the command output.
    pub fn device_docmd(&mut self, parms: &DocmdParms) -> Result<DocmdResp, RpcError> {
        self.rpc.call(procs::DEVICE_DOCMD, parms)
    }

    /// Procedure 23.
    pub fn destroy_link(&mut self, link: DeviceLink) -> Result<i32, RpcError> {
        self.rpc.call(procs::DESTROY_LINK, &link)
    }

    /// Procedure 25.
    pub fn create_intr_chan(&mut self, parms: &RemoteFunc) -> Result<i32, RpcError> {
        self.rpc.call(procs::CREATE_INTR_CHAN, parms)
    }

    pub fn destroy_intr_chan(&mut self) -> Result<i32, RpcError> {
        self.rpc.call(procs::DESTROY_INTR_CHAN, &())
    }
}

/// Client of the abort program (0x0607B0 v1).
#[derive(Debug)]
pub struct AbortClient<T: Transport = TcpClient> {
    rpc: T,
}

impl AbortClient<TcpClient> {
    /// Connect to the abort port announced by `create_link`.
    pub fn connect(host: &str, port: u16) -> Result<Self, RpcError> {
        Ok(Self::new(TcpClient::connect(host, DEVICE_ASYNC_PROG, DEVICE_ASYNC_VERS, port)?))
    }

    pub fn close(self) {
        self.rpc.close();
    }
}

impl<T: Transport> AbortClient<T> {
    pub fn new(rpc: T) -> Self {
        Self { rpc }
    }

    /// Procedure 1 of the abort program.
    pub fn device_abort(&mut self, link: DeviceLink) -> Result<i32, RpcError> {
        self.rpc.call(procs::DEVICE_ABORT, &link)
    }
}
