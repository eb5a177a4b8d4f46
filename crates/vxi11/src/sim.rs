//! In-process simulated instrument serving the core and abort programs on loopback.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use bytes::Bytes;
use sunrpc::{Program, TcpServer};
use xdr::{Decoder, Encoder, XdrDecode, XdrEncode, XdrError};

use crate::consts::{
    procs, OpFlags, ReadReason, DEVICE_ASYNC_PROG, DEVICE_ASYNC_VERS, DEVICE_CORE_PROG, DEVICE_CORE_VERS,
};
use crate::protocol::{
    CreateLinkParms, CreateLinkResp, DeviceLink, DocmdParms, DocmdResp, EnableSrqParms, GenericParms,
    LockParms, ReadParms, ReadResp, ReadStbResp, RemoteFunc, WriteParms, WriteResp,
};

pub(crate) type BusHandler = Box<dyn FnMut(&DocmdParms) -> DocmdResp + Send>;

/// Device behaviour knobs plus a record of everything the client sent.
pub(crate) struct SimState {
    pub max_recv_size: u32,
    pub link_error: i32,
    pub short_write: bool,
    pub output: Vec<u8>,
    pub stb: u8,
    pub invalidate_links: bool,
    pub bus: Option<BusHandler>,

    pub link: Option<DeviceLink>,
    pub next_link: DeviceLink,
    pub abort_port: u32,
    pub links_created: u32,
    pub device_names: Vec<String>,
    pub client_ids: Vec<i32>,
    pub ops: Vec<&'static str>,
    pub generic: Vec<GenericParms>,
    pub writes: Vec<WriteParms>,
    pub received: Vec<u8>,
    pub read_requests: Vec<ReadParms>,
    pub locked: bool,
    pub lock_calls: u32,
    pub unlock_calls: u32,
    pub destroyed: Vec<DeviceLink>,
    pub srq_handle: Option<Vec<u8>>,
    pub intr_chan: Option<RemoteFunc>,
    pub aborted: Vec<DeviceLink>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            max_recv_size: 4096,
            link_error: 0,
            short_write: false,
            output: Vec::new(),
            stb: 0,
            invalidate_links: false,
            bus: None,
            link: None,
            next_link: 0,
            abort_port: 0,
            links_created: 0,
            device_names: Vec::new(),
            client_ids: Vec::new(),
            ops: Vec::new(),
            generic: Vec::new(),
            writes: Vec::new(),
            received: Vec::new(),
            read_requests: Vec::new(),
            locked: false,
            lock_calls: 0,
            unlock_calls: 0,
            destroyed: Vec::new(),
            srq_handle: None,
            intr_chan: None,
            aborted: Vec::new(),
        }
    }
}

impl SimState {
    fn link_error(&self, link: DeviceLink) -> i32 {
        if self.invalidate_links || self.link != Some(link) {
            4
        } else {
            0
        }
    }

    fn create_link(&mut self, parms: CreateLinkParms) -> CreateLinkResp {
        let mut resp = CreateLinkResp {
            error: self.link_error,
            link: 0,
            abort_port: self.abort_port,
            max_recv_size: self.max_recv_size,
        };
        if resp.error != 0 {
            return resp;
        }
        if parms.lock_device {
            if self.locked {
                resp.error = 11;
                return resp;
            }
            self.locked = true;
        }
        self.next_link += 1;
        self.link = Some(self.next_link);
        self.links_created += 1;
        self.device_names.push(parms.device);
        self.client_ids.push(parms.client_id);
        resp.link = self.next_link;
        resp
    }

    fn destroy_link(&mut self, link: DeviceLink) -> i32 {
        let error = self.link_error(link);
        if error == 0 {
            self.destroyed.push(link);
            self.link = None;
            self.locked = false;
        }
        error
    }

    fn write(&mut self, parms: WriteParms) -> WriteResp {
        let error = self.link_error(parms.link);
        if error != 0 {
            return WriteResp { error, size: 0 };
        }
        let accepted = if self.short_write {
            parms.data.len().saturating_sub(1)
        } else {
            parms.data.len()
        };
        self.received.extend_from_slice(&parms.data[..accepted]);
        self.writes.push(parms);
        WriteResp {
            error: 0,
            size: accepted as u32,
        }
    }

    fn read(&mut self, parms: ReadParms) -> ReadResp {
        self.read_requests.push(parms);
        let error = self.link_error(parms.link);
        if error != 0 {
            return ReadResp {
                error,
                reason: ReadReason::empty(),
                data: Bytes::new(),
            };
        }
        let mut count = (parms.request_size as usize).min(self.output.len());
        let mut reason = ReadReason::empty();
        if parms.flags.contains(OpFlags::TERMCHAR_SET) {
            if let Some(pos) = self.output[..count].iter().position(|&b| b == parms.term_char) {
                count = pos + 1;
                reason |= ReadReason::CHR;
            }
        }
        let data: Vec<u8> = self.output.drain(..count).collect();
        if self.output.is_empty() {
            reason |= ReadReason::END;
        } else if data.len() == parms.request_size as usize {
            reason |= ReadReason::REQCNT;
        }
        ReadResp {
            error: 0,
            reason,
            data: Bytes::from(data),
        }
    }

    fn generic(&mut self, name: &'static str, parms: GenericParms) -> i32 {
        self.ops.push(name);
        self.generic.push(parms);
        self.link_error(parms.link)
    }

    fn trigger(&mut self, parms: GenericParms) -> i32 {
        self.generic("trigger", parms)
    }

    fn clear(&mut self, parms: GenericParms) -> i32 {
        self.generic("clear", parms)
    }

    fn remote(&mut self, parms: GenericParms) -> i32 {
        self.generic("remote", parms)
    }

    fn local(&mut self, parms: GenericParms) -> i32 {
        self.generic("local", parms)
    }

    fn readstb(&mut self, parms: GenericParms) -> ReadStbResp {
        ReadStbResp {
            error: self.generic("read_stb", parms),
            stb: self.stb,
        }
    }

    fn lock(&mut self, parms: LockParms) -> i32 {
        self.lock_calls += 1;
        match self.link_error(parms.link) {
            0 if self.locked => 11,
            0 => {
                self.locked = true;
                0
            }
            error => error,
        }
    }

    fn unlock(&mut self, link: DeviceLink) -> i32 {
        self.unlock_calls += 1;
        match self.link_error(link) {
            0 if !self.locked => 12,
            0 => {
                self.locked = false;
                0
            }
            error => error,
        }
    }

    fn enable_srq(&mut self, parms: EnableSrqParms) -> i32 {
        self.srq_handle = parms.enable.then(|| parms.handle.to_vec());
        self.link_error(parms.link)
    }

    fn docmd(&mut self, parms: DocmdParms) -> DocmdResp {
        let error = self.link_error(parms.link);
        if error != 0 {
            return DocmdResp {
                error,
                data_out: Bytes::new(),
            };
        }
        match self.bus.as_mut() {
            Some(bus) => bus(&parms),
            None => DocmdResp {
                error: 8,
                data_out: Bytes::new(),
            },
        }
    }

    fn create_intr_chan(&mut self, parms: RemoteFunc) -> i32 {
        if self.intr_chan.is_some() {
            return 29;
        }
        self.intr_chan = Some(parms);
        0
    }

    fn destroy_intr_chan(&mut self, _: ()) -> i32 {
        match self.intr_chan.take() {
            Some(_) => 0,
            None => 6,
        }
    }

    fn abort(&mut self, link: DeviceLink) -> i32 {
        self.aborted.push(link);
        self.link_error(link)
    }
}

type Shared = Arc<Mutex<SimState>>;

fn handler<P, R>(
    state: &Shared,
    f: fn(&mut SimState, P) -> R,
) -> impl FnMut(&mut Decoder<'_>, &mut Encoder) -> Result<(), XdrError> + Send + 'static
where
    P: XdrDecode + 'static,
    R: XdrEncode + 'static,
{
    let state = Arc::clone(state);
    move |args, out| {
        let parms = P::decode(args)?;
        let resp = f(&mut state.lock().unwrap(), parms);
        out.put(&resp);
        Ok(())
    }
}

pub(crate) struct SimInstrument {
    pub addr: SocketAddr,
    state: Shared,
}

impl SimInstrument {
    pub fn spawn(state: SimState) -> Self {
        let state: Shared = Arc::new(Mutex::new(state));

        let abort = Program::new(DEVICE_ASYNC_PROG, DEVICE_ASYNC_VERS)
            .procedure(procs::DEVICE_ABORT, handler(&state, SimState::abort))
            .unwrap();
        let abort = TcpServer::bind("127.0.0.1:0", abort).unwrap();
        state.lock().unwrap().abort_port = u32::from(abort.local_addr().unwrap().port());
        thread::spawn(move || abort.run());

        let core = Program::new(DEVICE_CORE_PROG, DEVICE_CORE_VERS)
            .procedure(procs::CREATE_LINK, handler(&state, SimState::create_link))
            .and_then(|p| p.procedure(procs::DEVICE_WRITE, handler(&state, SimState::write)))
            .and_then(|p| p.procedure(procs::DEVICE_READ, handler(&state, SimState::read)))
            .and_then(|p| p.procedure(procs::DEVICE_READSTB, handler(&state, SimState::readstb)))
            .and_then(|p| p.procedure(procs::DEVICE_TRIGGER, handler(&state, SimState::trigger)))
            .and_then(|p| p.procedure(procs::DEVICE_CLEAR, handler(&state, SimState::clear)))
            .and_then(|p| p.procedure(procs::DEVICE_REMOTE, handler(&state, SimState::remote)))
            .and_then(|p| p.procedure(procs::DEVICE_LOCAL, handler(&state, SimState::local)))
            .and_then(|p| p.procedure(procs::DEVICE_LOCK, handler(&state, SimState::lock)))
            .and_then(|p| p.procedure(procs::DEVICE_UNLOCK, handler(&state, SimState::unlock)))
            .and_then(|p| p.procedure(procs::DEVICE_ENABLE_SRQ, handler(&state, SimState::enable_srq)))
            .and_then(|p| p.procedure(procs::DEVICE_DOCMD, handler(&state, SimState::docmd)))
            .and_then(|p| p.procedure(procs::DESTROY_LINK, handler(&state, SimState::destroy_link)))
            .and_then(|p| p.procedure(procs::CREATE_INTR_CHAN, handler(&state, SimState::create_intr_chan)))
            .and_then(|p| p.procedure(procs::DESTROY_INTR_CHAN, handler(&state, SimState::destroy_intr_chan)))
            .unwrap();
        let core = TcpServer::bind("127.0.0.1:0", core).unwrap();
        let addr = core.local_addr().unwrap();
        thread::spawn(move || core.run());

        Self { addr, state }
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }
}
