//! Interrupt channel listener for service requests.

use std::net::{SocketAddr, ToSocketAddrs};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use sunrpc::{Program, RpcError, TcpServer};
use tracing::debug;

use crate::consts::{procs, DEVICE_INTR_PROG, DEVICE_INTR_VERS, MAX_SRQ_HANDLE};

/// Serves `device_intr_srq` and hands each request's handle to a callback.
///
/// Bind it, pass its address to [`crate::Device::create_intr_chan`] and
/// enable service requests with [`crate::Device::enable_srq`].
#[derive(Debug)]
pub struct SrqListener {
    server: TcpServer,
}

impl SrqListener {
    pub fn bind<A, F>(addr: A, mut on_srq: F) -> Result<Self, RpcError>
    where
        A: ToSocketAddrs,
        F: FnMut(Bytes) + Send + 'static,
    {
        let program = Program::new(DEVICE_INTR_PROG, DEVICE_INTR_VERS).procedure(
            procs::DEVICE_INTR_SRQ,
            move |args, _| {
                let handle = Bytes::copy_from_slice(args.get_opaque_max(MAX_SRQ_HANDLE)?);
                debug!(len = handle.len(), "service request");
                on_srq(handle);
                Ok(())
            },
        )?;
        Ok(Self {
            server: TcpServer::bind(addr, program)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.server.local_addr()
    }

    /// Serve interrupt connections on the calling thread.
    pub fn run(self) -> Result<(), RpcError> {
        self.server.run()
    }

    /// Serve interrupt connections on a background thread.
    pub fn spawn(self) -> JoinHandle<Result<(), RpcError>> {
        thread::spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use sunrpc::{TcpClient, Transport};

    #[test]
    fn delivers_handle_to_callback() {
        let (tx, rx) = mpsc::channel();
        let listener = SrqListener::bind("127.0.0.1:0", move |handle| {
            tx.send(handle).unwrap();
        })
        .unwrap();
        let addr = listener.local_addr().unwrap();
        listener.spawn();

        let mut device_side = TcpClient::connect_addr(addr, DEVICE_INTR_PROG, DEVICE_INTR_VERS).unwrap();
        let handle: &[u8] = b"scope-1";
        let () = device_side.call(procs::DEVICE_INTR_SRQ, handle).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(&got[..], b"scope-1");
    }

    #[test]
    fn oversized_handle_is_garbage() {
        let listener = SrqListener::bind("127.0.0.1:0", |_| {}).unwrap();
        let addr = listener.local_addr().unwrap();
        listener.spawn();

        let mut device_side = TcpClient::connect_addr(addr, DEVICE_INTR_PROG, DEVICE_INTR_VERS).unwrap();
        let handle = vec![0u8; 41];
        let err = device_side
            .call::<[u8], ()>(procs::DEVICE_INTR_SRQ, &handle[..])
            .unwrap_err();
        assert!(err.is_rejection());
    }
}
