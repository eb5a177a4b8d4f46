//! GPIB interface devices (`gpib0,...` sub-devices of a LAN/GPIB gateway).
//!
//! Every bus operation is one `device_docmd` call; the listener scan drives
//! ATN and NDAC directly to find instruments that accept addressing.

use std::fmt;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{Device, Vxi11Error};

/// Generic command ids understood by interface devices.
pub mod docmd {
    pub const SEND_COMMAND: i32 = 0x020000;
    pub const BUS_STATUS: i32 = 0x020001;
    pub const ATN_CTRL: i32 = 0x020002;
    pub const REN_CTRL: i32 = 0x020003;
    pub const PASS_CTRL: i32 = 0x020004;
    pub const BUS_ADDRESS: i32 = 0x02000A;
    pub const IFC_CTRL: i32 = 0x020010;
}

/// IEEE-488 bus command bytes.
pub mod cmd {
    /// Go to local.
    pub const GTL: u8 = 0x01;
    /// Selected device clear.
    pub const SDC: u8 = 0x04;
    /// Parallel poll configure.
    pub const PPC: u8 = 0x05;
    /// Group execute trigger.
    pub const GET: u8 = 0x08;
    /// Take control.
    pub const TCT: u8 = 0x09;
    /// Local lockout.
    pub const LLO: u8 = 0x11;
    /// Device clear.
    pub const DCL: u8 = 0x14;
    /// Parallel poll unconfigure.
    pub const PPU: u8 = 0x15;
    /// Serial poll enable.
    pub const SPE: u8 = 0x18;
    /// Serial poll disable.
    pub const SPD: u8 = 0x19;
    /// Listen address group; OR with the primary address.
    pub const LAD: u8 = 0x20;
    /// Unlisten.
    pub const UNL: u8 = 0x3F;
    /// Talk address group; OR with the primary address.
    pub const TAD: u8 = 0x40;
    /// Untalk.
    pub const UNT: u8 = 0x5F;
    /// Secondary address group; OR with the secondary address.
    pub const SAD: u8 = 0x60;
    /// Parallel poll disable.
    pub const PPD: u8 = 0x70;
}

/// Highest valid primary or secondary address.
pub const MAX_ADDRESS: u8 = 30;
/// Time allowed for listeners to pull NDAC after ATN is released.
pub const DEFAULT_SETTLE: Duration = Duration::from_micros(1500);

/// Bus line or state selectable through the BUS_STATUS command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    Remote = 1,
    Srq = 2,
    Ndac = 3,
    SystemController = 4,
    ControllerInCharge = 5,
    Talker = 6,
    Listener = 7,
    BusAddress = 8,
}

/// A GPIB address, optionally with a secondary address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GpibAddress {
    Primary(u8),
    Secondary(u8, u8),
}

impl GpibAddress {
    pub fn primary(self) -> u8 {
        match self {
            GpibAddress::Primary(addr) | GpibAddress::Secondary(addr, _) => addr,
        }
    }

    pub fn secondary(self) -> Option<u8> {
        match self {
            GpibAddress::Primary(_) => None,
            GpibAddress::Secondary(_, sa) => Some(sa),
        }
    }
}

impl From<u8> for GpibAddress {
    fn from(addr: u8) -> Self {
        GpibAddress::Primary(addr)
    }
}

impl From<(u8, u8)> for GpibAddress {
    fn from((addr, sa): (u8, u8)) -> Self {
        GpibAddress::Secondary(addr, sa)
    }
}

impl fmt::Display for GpibAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpibAddress::Primary(addr) => write!(f, "{addr}"),
            GpibAddress::Secondary(addr, sa) => write!(f, "{addr},{sa}"),
        }
    }
}

fn check_address(address: u8, operation: &'static str) -> Result<u8, Vxi11Error> {
    if address > MAX_ADDRESS {
        return Err(Vxi11Error::InvalidAddress { address, operation });
    }
    Ok(address)
}

/// Command bytes that make `controller` the talker and every target a listener.
pub fn setup_bytes(controller: u8, targets: &[GpibAddress]) -> Result<Vec<u8>, Vxi11Error> {
    let mut bytes = vec![check_address(controller, "create_setup")? | cmd::TAD, cmd::UNL];
    for target in targets {
        bytes.push(check_address(target.primary(), "create_setup")? | cmd::LAD);
        if let Some(sa) = target.secondary() {
            bytes.push(check_address(sa, "create_setup")? | cmd::SAD);
        }
    }
    Ok(bytes)
}

/// Bus controller operations on top of a link to an interface device.
#[derive(Debug)]
pub struct InterfaceDevice {
    device: Device,
    settle: Duration,
}

impl InterfaceDevice {
    /// Wrap a link whose name addresses an interface device, such as `gpib0`.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Interface device `gpib0` on `host` with default settings.
    pub fn open_default(host: &str) -> Result<Self, Vxi11Error> {
        Ok(Self::new(Device::builder(host)?.name("gpib0").build()))
    }

    /// Delay between releasing ATN and sampling NDAC during a scan.
    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Give the link back.
    pub fn into_inner(self) -> Device {
        self.device
    }

    /// Send raw command bytes with ATN asserted.
    pub fn send_command(&mut self, data: &[u8]) -> Result<Bytes, Vxi11Error> {
        self.device
            .docmd_as("send_command", docmd::SEND_COMMAND, false, 1, data)
    }

    /// Query one bus status item.
    pub fn bus_status(&mut self, which: BusStatus) -> Result<u16, Vxi11Error> {
        let selector = (which as u16).to_be_bytes();
        let out = self
            .device
            .docmd_as("bus_status", docmd::BUS_STATUS, true, 2, &selector)?;
        let raw: [u8; 2] = out
            .get(..2)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Vxi11Error::unexpected("bus_status", format!("{} bytes", out.len())))?;
        Ok(u16::from_be_bytes(raw))
    }

    pub fn test_ren(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::Remote)? != 0)
    }

    /// Whether SRQ is asserted on the bus.
    pub fn test_srq(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::Srq)? != 0)
    }

    /// Whether NDAC is asserted; a listener holds it while addressed.
    pub fn test_ndac(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::Ndac)? != 0)
    }

    pub fn is_system_controller(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::SystemController)? != 0)
    }

    pub fn is_controller_in_charge(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::ControllerInCharge)? != 0)
    }

    pub fn is_talker(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::Talker)? != 0)
    }

    pub fn is_listener(&mut self) -> Result<bool, Vxi11Error> {
        Ok(self.bus_status(BusStatus::Listener)? != 0)
    }

    /// This controller's own primary address.
    pub fn bus_address(&mut self) -> Result<u8, Vxi11Error> {
        let raw = self.bus_status(BusStatus::BusAddress)?;
        u8::try_from(raw)
            .ok()
            .filter(|addr| *addr <= MAX_ADDRESS)
            .ok_or_else(|| Vxi11Error::unexpected("bus_address", format!("address {raw}")))
    }

    /// Drive ATN.
    pub fn set_atn(&mut self, asserted: bool) -> Result<(), Vxi11Error> {
        let value = u16::from(asserted).to_be_bytes();
        self.device
            .docmd_as("set_atn", docmd::ATN_CTRL, true, 2, &value)?;
        Ok(())
    }

    /// Drive REN.
    pub fn set_ren(&mut self, asserted: bool) -> Result<(), Vxi11Error> {
        let value = u16::from(asserted).to_be_bytes();
        self.device
            .docmd_as("set_ren", docmd::REN_CTRL, true, 2, &value)?;
        Ok(())
    }

    /// Hand controller-in-charge to the device at `address`.
    pub fn pass_control(&mut self, address: u8) -> Result<(), Vxi11Error> {
        let value = u32::from(check_address(address, "pass_control")?).to_be_bytes();
        self.device
            .docmd_as("pass_control", docmd::PASS_CTRL, true, 4, &value)?;
        Ok(())
    }

    /// Change this controller's primary address.
    pub fn set_bus_address(&mut self, address: u8) -> Result<(), Vxi11Error> {
        let value = u32::from(check_address(address, "set_bus_address")?).to_be_bytes();
        self.device
            .docmd_as("set_bus_address", docmd::BUS_ADDRESS, true, 4, &value)?;
        Ok(())
    }

    /// Pulse interface clear.
    pub fn send_ifc(&mut self) -> Result<(), Vxi11Error> {
        self.device
            .docmd_as("send_ifc", docmd::IFC_CTRL, false, 1, &[])?;
        Ok(())
    }

    /// Setup bytes addressing `targets` with this controller as talker.
    pub fn create_setup(&mut self, targets: &[GpibAddress]) -> Result<Vec<u8>, Vxi11Error> {
        let own = self.bus_address()?;
        setup_bytes(own, targets)
    }

    /// Address `targets` as listeners with this controller as talker.
    pub fn send_setup(&mut self, targets: &[GpibAddress]) -> Result<(), Vxi11Error> {
        let setup = self.create_setup(targets)?;
        self.send_command(&setup)?;
        Ok(())
    }

    /// Scan the bus for devices that accept listen addressing.
    ///
    /// `candidates` defaults to every primary address; this controller's own
    /// address is always skipped. The device lock is held for the whole
    /// scan and released whether or not the scan succeeds. A lock the link
    /// already holds is used as is and left in place.
    pub fn find_listeners(&mut self, candidates: Option<&[u8]>) -> Result<Vec<GpibAddress>, Vxi11Error> {
        if self.device.is_locked() {
            return self.scan(candidates);
        }
        self.device.lock()?;
        let scan = self.scan(candidates);
        let unlock = self.device.unlock();
        match (scan, unlock) {
            (Ok(found), Ok(())) => {
                info!(listeners = found.len(), "GPIB listener scan done");
                Ok(found)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), unlock) => {
                if let Err(unlock_err) = unlock {
                    warn!(%unlock_err, "unlock after failed scan");
                }
                Err(err)
            }
        }
    }

    fn scan(&mut self, candidates: Option<&[u8]>) -> Result<Vec<GpibAddress>, Vxi11Error> {
        let own = self.bus_address()?;
        let all: Vec<u8> = (0..=MAX_ADDRESS).collect();
        let candidates = candidates.unwrap_or(&all[..]);
        let talk = [cmd::UNL, cmd::UNT, own | cmd::TAD];

        let mut found = Vec::new();
        for &addr in candidates {
            let addr = check_address(addr, "find_listeners")?;
            if addr == own {
                continue;
            }
            let mut listen = talk.to_vec();
            listen.push(addr | cmd::LAD);
            if self.answers(&listen)? {
                debug!(addr, "listener found");
                found.push(GpibAddress::Primary(addr));
                continue;
            }

            let mut every_sa = listen.clone();
            every_sa.extend((0..=MAX_ADDRESS).map(|sa| sa | cmd::SAD));
            if !self.answers(&every_sa)? {
                continue;
            }
            for sa in 0..=MAX_ADDRESS {
                let mut single = listen.clone();
                single.push(sa | cmd::SAD);
                if self.answers(&single)? {
                    debug!(addr, sa, "listener found at secondary address");
                    found.push(GpibAddress::Secondary(addr, sa));
                }
            }
        }
        Ok(found)
    }

    /// Address the bus, release ATN and report whether anyone holds NDAC.
    fn answers(&mut self, command: &[u8]) -> Result<bool, Vxi11Error> {
        self.send_command(command)?;
        self.set_atn(false)?;
        thread::sleep(self.settle);
        self.test_ndac()
    }
}
