//! Instrument link: lifecycle, locking, chunked I/O and the simple device operations.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use sunrpc::{RpcError, TcpClient, Transport, PMAP_PORT};
use tracing::{debug, info, trace, warn};

use crate::channel::{AbortClient, CoreClient};
use crate::consts::{
    OpFlags, ReadReason, DEFAULT_DEVICE_NAME, DEFAULT_LOCK_TIMEOUT, DEFAULT_TIMEOUT, MAX_RECV_CEILING,
    MAX_SRQ_HANDLE, SOCKET_SLACK,
};
use crate::protocol::{
    CreateLinkParms, DeviceLink, DocmdParms, EnableSrqParms, GenericParms, LockParms, ReadParms,
    RemoteFunc, WriteParms,
};
use crate::{Resource, Vxi11Error};

type GenericProc = fn(&mut CoreClient<TcpClient>, &GenericParms) -> Result<i32, RpcError>;

/// Device-side timeouts travel as milliseconds in a u32.
fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Builder for [`Device`].
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    host: String,
    name: String,
    client_id: Option<i32>,
    timeout: Duration,
    lock_timeout: Duration,
    term_char: Option<u8>,
    port: Option<u16>,
    pmap_port: u16,
    lock_on_open: bool,
    max_recv_ceiling: u32,
}

impl DeviceBuilder {
    /// Start from a host name or a `TCPIP::host::[name::]INSTR` resource string.
    pub fn new(target: &str) -> Result<Self, Vxi11Error> {
        let (host, name) = if Resource::is_resource(target) {
            let resource: Resource = target.parse()?;
            (resource.host, resource.sub_address)
        } else {
            (target.to_string(), None)
        };
        Ok(Self {
            host,
            name: name.unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            client_id: None,
            timeout: DEFAULT_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            term_char: None,
            port: None,
            pmap_port: PMAP_PORT,
            lock_on_open: false,
            max_recv_ceiling: MAX_RECV_CEILING,
        })
    }

    /// Logical sub-device name (`inst0`, `gpib0,5`, ...).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fixed client id; a random 31-bit id is used otherwise.
    pub fn client_id(mut self, id: i32) -> Self {
        self.client_id = Some(id);
        self
    }

    /// I/O timeout sent with every device operation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long the device waits for a lock held by another link.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Byte appended to every write and used to end reads.
    pub fn term_char(mut self, term_char: Option<u8>) -> Self {
        self.term_char = term_char;
        self
    }

    /// Skip the port mapper and connect to the core channel on `port`.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Port mapper port used when no fixed core port is configured.
    pub fn pmap_port(mut self, port: u16) -> Self {
        self.pmap_port = port;
        self
    }

    /// Request the device lock as part of link creation.
    pub fn lock_on_open(mut self, lock: bool) -> Self {
        self.lock_on_open = lock;
        self
    }

    /// Local upper bound on the negotiated receive size.
    pub fn max_recv_ceiling(mut self, ceiling: u32) -> Self {
        self.max_recv_ceiling = ceiling.max(1);
        self
    }

    /// Finish configuration; the link is created on first use.
    pub fn build(self) -> Device {
        Device {
            client_id: self
                .client_id
                .unwrap_or_else(|| fastrand::i32(0..=i32::MAX)),
            host: self.host,
            name: self.name,
            timeout: self.timeout,
            lock_timeout: self.lock_timeout,
            term_char: self.term_char,
            port: self.port,
            pmap_port: self.pmap_port,
            lock_on_open: self.lock_on_open,
            max_recv_ceiling: self.max_recv_ceiling,
            link: None,
            locked: false,
        }
    }
}

#[derive(Debug)]
struct Link {
    core: CoreClient<TcpClient>,
    id: DeviceLink,
    abort_port: u16,
    max_recv_size: u32,
}

/// A VXI-11 instrument reached over one core-channel connection.
///
/// The link is created lazily by the first operation that needs it and
/// lives until [`Device::close`]. Dropping a `Device` only tears down the
/// connection; the device reclaims the link on its own.
#[derive(Debug)]
pub struct Device {
    host: String,
    name: String,
    client_id: i32,
    timeout: Duration,
    lock_timeout: Duration,
    term_char: Option<u8>,
    port: Option<u16>,
    pmap_port: u16,
    lock_on_open: bool,
    max_recv_ceiling: u32,
    link: Option<Link>,
    locked: bool,
}

impl Device {
    /// Device with default settings for a host name or resource string.
    pub fn new(target: &str) -> Result<Self, Vxi11Error> {
        Ok(DeviceBuilder::new(target)?.build())
    }

    /// Start configuring a link to `target`.
    pub fn builder(target: &str) -> Result<DeviceBuilder, Vxi11Error> {
        DeviceBuilder::new(target)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id sent with `create_link`.
    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn term_char(&self) -> Option<u8> {
        self.term_char
    }

    /// Change the terminator used by later reads and writes.
    pub fn set_term_char(&mut self, term_char: Option<u8>) {
        self.term_char = term_char;
    }

    /// Whether a link currently exists.
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Whether this link currently holds the device lock.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Link id assigned by the device, if open.
    pub fn link_id(&self) -> Option<DeviceLink> {
        self.link.as_ref().map(|link| link.id)
    }

    /// Receive size negotiated at link creation, after clamping.
    pub fn max_recv_size(&self) -> Option<u32> {
        self.link.as_ref().map(|link| link.max_recv_size)
    }

    /// Abort channel port announced at link creation, if open.
    pub fn abort_port(&self) -> Option<u16> {
        self.link.as_ref().map(|link| link.abort_port)
    }

    /// Socket deadline covering a device operation that first waits for the lock.
    fn socket_deadline(&self) -> Duration {
        self.timeout + self.lock_timeout + SOCKET_SLACK
    }

    fn apply_deadline(&mut self) -> Result<(), Vxi11Error> {
        let deadline = self.socket_deadline();
        if let Some(link) = self.link.as_mut() {
            link.core.transport_mut().set_timeout(Some(deadline))?;
        }
        Ok(())
    }

    /// Change the I/O timeout, including the deadline of an open connection.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Vxi11Error> {
        self.timeout = timeout;
        self.apply_deadline()
    }

    /// Change the lock wait, including the deadline of an open connection.
    pub fn set_lock_timeout(&mut self, timeout: Duration) -> Result<(), Vxi11Error> {
        self.lock_timeout = timeout;
        self.apply_deadline()
    }

    /// Create the link unless it already exists.
    pub fn open(&mut self) -> Result<(), Vxi11Error> {
        if self.link.is_some() {
            return Ok(());
        }
        let mut core = CoreClient::connect(&self.host, self.port, self.pmap_port)?;
        core.transport_mut().set_timeout(Some(self.socket_deadline()))?;

        let parms = CreateLinkParms {
            client_id: self.client_id,
            lock_device: self.lock_on_open,
            lock_timeout: millis(self.lock_timeout),
            device: self.name.clone(),
        };
        let resp = core.create_link(&parms)?;
        if let Err(err) = Vxi11Error::check(resp.error, "open") {
            core.close();
            return Err(err);
        }
        let abort_port = u16::try_from(resp.abort_port)
            .map_err(|_| Vxi11Error::unexpected("open", format!("abort port {}", resp.abort_port)))?;
        let max_recv_size = match resp.max_recv_size {
            0 => self.max_recv_ceiling,
            size => size.min(self.max_recv_ceiling),
        };
        info!(
            host = %self.host,
            device = %self.name,
            link = resp.link,
            max_recv_size,
            abort_port,
            "link created"
        );
        self.link = Some(Link {
            core,
            id: resp.link,
            abort_port,
            max_recv_size,
        });
        self.locked = self.lock_on_open;
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<&mut Link, Vxi11Error> {
        self.open()?;
        self.link.as_mut().ok_or(Vxi11Error::NotOpen)
    }

    /// Destroy the link and drop the connection; a no-op when already closed.
    ///
    /// The connection is torn down even when destroy_link fails; that
    /// failure is still reported.
    pub fn close(&mut self) -> Result<(), Vxi11Error> {
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };
        self.locked = false;
        let result = link.core.destroy_link(link.id);
        link.core.close();
        debug!(host = %self.host, link = link.id, "link closed");
        Vxi11Error::check(result?, "close")
    }

    fn generic(&mut self, operation: &'static str, proc: GenericProc) -> Result<(), Vxi11Error> {
        let parms = self.generic_parms()?;
        let link = self.ensure_open()?;
        let code = proc(&mut link.core, &parms)?;
        Vxi11Error::check(code, operation)
    }

    fn generic_parms(&mut self) -> Result<GenericParms, Vxi11Error> {
        let (io_timeout, lock_timeout) = (millis(self.timeout), millis(self.lock_timeout));
        let link = self.ensure_open()?;
        Ok(GenericParms {
            link: link.id,
            flags: OpFlags::empty(),
            lock_timeout,
            io_timeout,
        })
    }

    /// Send a group execute trigger to the device.
    pub fn trigger(&mut self) -> Result<(), Vxi11Error> {
        self.generic("trigger", CoreClient::device_trigger)
    }

    /// Device clear.
    pub fn clear(&mut self) -> Result<(), Vxi11Error> {
        self.generic("clear", CoreClient::device_clear)
    }

    /// Place the device in remote state.
    pub fn remote(&mut self) -> Result<(), Vxi11Error> {
        self.generic("remote", CoreClient::device_remote)
    }

    /// Return the device to local state.
    pub fn local(&mut self) -> Result<(), Vxi11Error> {
        self.generic("local", CoreClient::device_local)
    }

    /// Read the status byte.
    pub fn read_stb(&mut self) -> Result<u8, Vxi11Error> {
        let parms = self.generic_parms()?;
        let link = self.ensure_open()?;
        let resp = link.core.device_readstb(&parms)?;
        Vxi11Error::check(resp.error, "read_stb")?;
        Ok(resp.stb)
    }

    /// Acquire the device lock, waiting up to the lock timeout.
    pub fn lock(&mut self) -> Result<(), Vxi11Error> {
        let lock_timeout = millis(self.lock_timeout);
        let link = self.ensure_open()?;
        let parms = LockParms {
            link: link.id,
            flags: OpFlags::empty(),
            lock_timeout,
        };
        let code = link.core.device_lock(&parms)?;
        Vxi11Error::check(code, "lock")?;
        self.locked = true;
        Ok(())
    }

    /// Release the device lock.
    pub fn unlock(&mut self) -> Result<(), Vxi11Error> {
        let link = self.ensure_open()?;
        let code = link.core.device_unlock(link.id)?;
        Vxi11Error::check(code, "unlock")?;
        self.locked = false;
        Ok(())
    }

    /// Abort the operation in progress through the abort channel.
    ///
    /// Uses its own short-lived connection to the port announced at link creation.
    pub fn abort(&mut self) -> Result<(), Vxi11Error> {
        let link = self.ensure_open()?;
        let (id, abort_port) = (link.id, link.abort_port);
        let mut client = AbortClient::connect(&self.host, abort_port)?;
        let result = client.device_abort(id);
        client.close();
        info!(host = %self.host, link = id, "abort sent");
        Vxi11Error::check(result?, "abort")
    }

    /// Enable or disable service requests; `handle` is echoed back with each request.
    pub fn enable_srq(&mut self, enable: bool, handle: &[u8]) -> Result<(), Vxi11Error> {
        if handle.len() > MAX_SRQ_HANDLE {
            return Err(Vxi11Error::SrqHandleTooLong(handle.len()));
        }
        let link = self.ensure_open()?;
        let parms = EnableSrqParms {
            link: link.id,
            enable,
            handle: Bytes::copy_from_slice(handle),
        };
        let code = link.core.device_enable_srq(&parms)?;
        Vxi11Error::check(code, "enable_srq")
    }

    /// Ask the device to open an interrupt channel back to `host:port`.
    pub fn create_intr_chan(
        &mut self,
        host: Ipv4Addr,
        port: u16,
        prog_num: u32,
        prog_vers: u32,
        family: i32,
    ) -> Result<(), Vxi11Error> {
        let link = self.ensure_open()?;
        let parms = RemoteFunc {
            host_addr: u32::from(host),
            host_port: u32::from(port),
            prog_num,
            prog_vers,
            prog_family: family,
        };
        let code = link.core.create_intr_chan(&parms)?;
        Vxi11Error::check(code, "create_intr_chan")
    }

    /// Close the interrupt channel opened by [`Device::create_intr_chan`].
    pub fn destroy_intr_chan(&mut self) -> Result<(), Vxi11Error> {
        let link = self.ensure_open()?;
        let code = link.core.destroy_intr_chan()?;
        Vxi11Error::check(code, "destroy_intr_chan")
    }

    /// Device-specific command passthrough.
    pub fn docmd(
        &mut self,
        cmd: i32,
        network_order: bool,
        datasize: i32,
        data_in: &[u8],
    ) -> Result<Bytes, Vxi11Error> {
        self.docmd_as("docmd", cmd, network_order, datasize, data_in)
    }

    pub(crate) fn docmd_as(
        &mut self,
        operation: &'static str,
        cmd: i32,
        network_order: bool,
        datasize: i32,
        data_in: &[u8],
    ) -> Result<Bytes, Vxi11Error> {
        let (io_timeout, lock_timeout) = (millis(self.timeout), millis(self.lock_timeout));
        let link = self.ensure_open()?;
        let parms = DocmdParms {
            link: link.id,
            flags: OpFlags::empty(),
            io_timeout,
            lock_timeout,
            cmd,
            network_order,
            datasize,
            data_in: Bytes::copy_from_slice(data_in),
        };
        let resp = link.core.device_docmd(&parms)?;
        Vxi11Error::check(resp.error, operation)?;
        trace!(operation, cmd, bytes = resp.data_out.len(), "docmd done");
        Ok(resp.data_out)
    }

    /// Write a message in blocks of at most the negotiated receive size.
    ///
    /// The configured terminator is appended and only the final block
    /// carries the END flag.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), Vxi11Error> {
        let payload = match self.term_char {
            Some(term) => {
                let mut buf = BytesMut::with_capacity(data.len() + 1);
                buf.put_slice(data);
                buf.put_u8(term);
                buf.freeze()
            }
            None => Bytes::copy_from_slice(data),
        };
        let (io_timeout, lock_timeout) = (millis(self.timeout), millis(self.lock_timeout));
        let link = self.ensure_open()?;
        let block_size = link.max_recv_size as usize;

        let mut offset = 0;
        loop {
            let end = payload.len().min(offset + block_size);
            let last = end == payload.len();
            let block = payload.slice(offset..end);
            let parms = WriteParms {
                link: link.id,
                io_timeout,
                lock_timeout,
                flags: if last { OpFlags::END } else { OpFlags::empty() },
                data: block,
            };
            let resp = link.core.device_write(&parms)?;
            Vxi11Error::check(resp.error, "write")?;
            if (resp.size as usize) < end - offset {
                warn!(offered = end - offset, accepted = resp.size, "short write");
                return Err(Vxi11Error::IncompleteWrite { operation: "write" });
            }
            trace!(link = link.id, bytes = end - offset, last, "wrote block");
            if last {
                return Ok(());
            }
            offset = end;
        }
    }

    /// Read until the device signals END or the terminator, or `max_len` bytes arrived.
    pub fn read_raw(&mut self, max_len: Option<usize>) -> Result<Vec<u8>, Vxi11Error> {
        let (flags, term_char) = match self.term_char {
            Some(term) => (OpFlags::TERMCHAR_SET, term),
            None => (OpFlags::empty(), 0),
        };
        let (io_timeout, lock_timeout) = (millis(self.timeout), millis(self.lock_timeout));
        let link = self.ensure_open()?;
        let block_size = link.max_recv_size;

        let mut data = Vec::new();
        let mut remaining = max_len;
        if remaining == Some(0) {
            return Ok(data);
        }
        loop {
            let request_size = match remaining {
                Some(left) => u32::try_from(left).map_or(block_size, |left| left.min(block_size)),
                None => block_size,
            };
            let parms = ReadParms {
                link: link.id,
                request_size,
                io_timeout,
                lock_timeout,
                flags,
                term_char,
            };
            let resp = link.core.device_read(&parms)?;
            Vxi11Error::check(resp.error, "read")?;
            data.extend_from_slice(&resp.data);
            trace!(link = link.id, bytes = resp.data.len(), reason = resp.reason.bits(), "read block");

            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(resp.data.len());
                if *left == 0 {
                    if let Some(max) = max_len {
                        data.truncate(max);
                    }
                    break;
                }
            }
            if resp.reason.intersects(ReadReason::END | ReadReason::CHR) {
                break;
            }
        }
        Ok(data)
    }

    /// Write `data`, then read the reply.
    pub fn ask_raw(&mut self, data: &[u8], max_len: Option<usize>) -> Result<Vec<u8>, Vxi11Error> {
        self.write_raw(data)?;
        self.read_raw(max_len)
    }

    /// Write a text message; the terminator, if set, is appended.
    pub fn write_str(&mut self, message: &str) -> Result<(), Vxi11Error> {
        self.write_raw(message.as_bytes())
    }

    /// Read a UTF-8 text reply with trailing CR/LF removed.
    pub fn read_string(&mut self, max_len: Option<usize>) -> Result<String, Vxi11Error> {
        let raw = self.read_raw(max_len)?;
        let text = String::from_utf8(raw)
            .map_err(|err| Vxi11Error::unexpected("read", format!("reply is not UTF-8: {err}")))?;
        Ok(strip_line_end(&text))
    }

    /// Write a query and read its text reply.
    pub fn ask_str(&mut self, message: &str) -> Result<String, Vxi11Error> {
        self.write_str(message)?;
        self.read_string(None)
    }

    /// Write each message in order.
    pub fn write_all_lines<S: AsRef<str>>(&mut self, messages: &[S]) -> Result<(), Vxi11Error> {
        messages
            .iter()
            .try_for_each(|message| self.write_str(message.as_ref()))
    }

    /// Ask each query in order and collect the replies.
    pub fn ask_all<S: AsRef<str>>(&mut self, queries: &[S]) -> Result<Vec<String>, Vxi11Error> {
        queries
            .iter()
            .map(|query| self.ask_str(query.as_ref()))
            .collect()
    }
}

fn strip_line_end(text: &str) -> String {
    text.trim_end_matches(&['\r', '\n'][..]).to_string()
}
