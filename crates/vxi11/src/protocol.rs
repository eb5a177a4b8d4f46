//! Argument and result structures of the core, abort and interrupt programs.

use bytes::Bytes;
use xdr::{Decoder, Encoder, XdrDecode, XdrEncode, XdrError};

use crate::consts::{OpFlags, ReadReason, MAX_SRQ_HANDLE};

/// Link identifier issued by `create_link`.
pub type DeviceLink = i32;

/// Address family of an interrupt channel.
pub mod family {
    pub const DEVICE_TCP: i32 = 0;
    pub const DEVICE_UDP: i32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateLinkParms {
    pub client_id: i32,
    pub lock_device: bool,
    pub lock_timeout: u32,
    pub device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateLinkResp {
    pub error: i32,
    pub link: DeviceLink,
    pub abort_port: u32,
    pub max_recv_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteParms {
    pub link: DeviceLink,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: OpFlags,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResp {
    pub error: i32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadParms {
    pub link: DeviceLink,
    pub request_size: u32,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: OpFlags,
    pub term_char: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResp {
    pub error: i32,
    pub reason: ReadReason,
    pub data: Bytes,
}

/// Arguments shared by read_stb, trigger, clear, remote and local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericParms {
    pub link: DeviceLink,
    pub flags: OpFlags,
    pub lock_timeout: u32,
    pub io_timeout: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStbResp {
    pub error: i32,
    pub stb: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockParms {
    pub link: DeviceLink,
    pub flags: OpFlags,
    pub lock_timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableSrqParms {
    pub link: DeviceLink,
    pub enable: bool,
    pub handle: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocmdParms {
    pub link: DeviceLink,
    pub flags: OpFlags,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub cmd: i32,
    pub network_order: bool,
    pub datasize: i32,
    pub data_in: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocmdResp {
    pub error: i32,
    pub data_out: Bytes,
}

/// Where the device should send service requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFunc {
    pub host_addr: u32,
    pub host_port: u32,
    pub prog_num: u32,
    pub prog_vers: u32,
    pub prog_family: i32,
}

fn get_flags(dec: &mut Decoder<'_>) -> Result<OpFlags, XdrError> {
    Ok(OpFlags::from_bits_retain(dec.get_i32()?))
}

impl XdrEncode for CreateLinkParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.client_id);
        enc.put_bool(self.lock_device);
        enc.put_u32(self.lock_timeout);
        enc.put_string(&self.device);
    }
}

impl XdrDecode for CreateLinkParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            client_id: dec.get_i32()?,
            lock_device: dec.get_bool()?,
            lock_timeout: dec.get_u32()?,
            device: dec.get_string()?,
        })
    }
}

impl XdrEncode for CreateLinkResp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.error);
        enc.put_i32(self.link);
        enc.put_u32(self.abort_port);
        enc.put_u32(self.max_recv_size);
    }
}

impl XdrDecode for CreateLinkResp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            error: dec.get_i32()?,
            link: dec.get_i32()?,
            abort_port: dec.get_u32()?,
            max_recv_size: dec.get_u32()?,
        })
    }
}

impl XdrEncode for WriteParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.link);
        enc.put_u32(self.io_timeout);
        enc.put_u32(self.lock_timeout);
        enc.put_i32(self.flags.bits());
        enc.put_opaque(&self.data);
    }
}

impl XdrDecode for WriteParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            link: dec.get_i32()?,
            io_timeout: dec.get_u32()?,
            lock_timeout: dec.get_u32()?,
            flags: get_flags(dec)?,
            data: dec.get()?,
        })
    }
}

impl XdrEncode for WriteResp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.error);
        enc.put_u32(self.size);
    }
}

impl XdrDecode for WriteResp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            error: dec.get_i32()?,
            size: dec.get_u32()?,
        })
    }
}

impl XdrEncode for ReadParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.link);
        enc.put_u32(self.request_size);
        enc.put_u32(self.io_timeout);
        enc.put_u32(self.lock_timeout);
        enc.put_i32(self.flags.bits());
        enc.put_i32(i32::from(self.term_char));
    }
}

impl XdrDecode for ReadParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            link: dec.get_i32()?,
            request_size: dec.get_u32()?,
            io_timeout: dec.get_u32()?,
            lock_timeout: dec.get_u32()?,
            flags: get_flags(dec)?,
            // Only the low byte is meaningful.
            term_char: (dec.get_i32()? & 0xFF) as u8,
        })
    }
}

impl XdrEncode for ReadResp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.error);
        enc.put_i32(self.reason.bits());
        enc.put_opaque(&self.data);
    }
}

impl XdrDecode for ReadResp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            error: dec.get_i32()?,
            reason: ReadReason::from_bits_retain(dec.get_i32()?),
            data: dec.get()?,
        })
    }
}

impl XdrEncode for GenericParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.link);
        enc.put_i32(self.flags.bits());
        enc.put_u32(self.lock_timeout);
        enc.put_u32(self.io_timeout);
    }
}

impl XdrDecode for GenericParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            link: dec.get_i32()?,
            flags: get_flags(dec)?,
            lock_timeout: dec.get_u32()?,
            io_timeout: dec.get_u32()?,
        })
    }
}

impl XdrEncode for ReadStbResp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.error);
        enc.put_u32(u32::from(self.stb));
    }
}

impl XdrDecode for ReadStbResp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            error: dec.get_i32()?,
            stb: (dec.get_u32()? & 0xFF) as u8,
        })
    }
}

impl XdrEncode for LockParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.link);
        enc.put_i32(self.flags.bits());
        enc.put_u32(self.lock_timeout);
    }
}

impl XdrDecode for LockParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            link: dec.get_i32()?,
            flags: get_flags(dec)?,
            lock_timeout: dec.get_u32()?,
        })
    }
}

impl XdrEncode for EnableSrqParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.link);
        enc.put_bool(self.enable);
        enc.put_opaque(&self.handle);
    }
}

impl XdrDecode for EnableSrqParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            link: dec.get_i32()?,
            enable: dec.get_bool()?,
            handle: Bytes::copy_from_slice(dec.get_opaque_max(MAX_SRQ_HANDLE)?),
        })
    }
}

impl XdrEncode for DocmdParms {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.link);
        enc.put_i32(self.flags.bits());
        enc.put_u32(self.io_timeout);
        enc.put_u32(self.lock_timeout);
        enc.put_i32(self.cmd);
        enc.put_bool(self.network_order);
        enc.put_i32(self.datasize);
        enc.put_opaque(&self.data_in);
    }
}

impl XdrDecode for DocmdParms {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            link: dec.get_i32()?,
            flags: get_flags(dec)?,
            io_timeout: dec.get_u32()?,
            lock_timeout: dec.get_u32()?,
            cmd: dec.get_i32()?,
            network_order: dec.get_bool()?,
            datasize: dec.get_i32()?,
            data_in: dec.get()?,
        })
    }
}

impl XdrEncode for DocmdResp {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_i32(self.error);
        enc.put_opaque(&self.data_out);
    }
}

impl XdrDecode for DocmdResp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            error: dec.get_i32()?,
            data_out: dec.get()?,
        })
    }
}

impl XdrEncode for RemoteFunc {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.host_addr);
        enc.put_u32(self.host_port);
        enc.put_u32(self.prog_num);
        enc.put_u32(self.prog_vers);
        enc.put_i32(self.prog_family);
    }
}

impl XdrDecode for RemoteFunc {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(Self {
            host_addr: dec.get_u32()?,
            host_port: dec.get_u32()?,
            prog_num: dec.get_u32()?,
            prog_vers: dec.get_u32()?,
            prog_family: dec.get_i32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_link_layout() {
        let parms = CreateLinkParms {
            client_id: 0x1234,
            lock_device: true,
            lock_timeout: 10_000,
            device: "inst0".into(),
        };
        let bytes = xdr::to_bytes(&parms);
        assert_eq!(
            bytes.as_ref(),
            &[
                0, 0, 0x12, 0x34, // client id
                0, 0, 0, 1, // lock
                0, 0, 0x27, 0x10, // lock timeout
                0, 0, 0, 5, b'i', b'n', b's', b't', b'0', 0, 0, 0,
            ]
        );
    }

    #[test]
    fn read_parms_carry_term_char_as_int() {
        let parms = ReadParms {
            link: 7,
            request_size: 1024,
            io_timeout: 500,
            lock_timeout: 0,
            flags: OpFlags::TERMCHAR_SET,
            term_char: b'\n',
        };
        let bytes = xdr::to_bytes(&parms);
        assert_eq!(&bytes[16..20], &128i32.to_be_bytes());
        assert_eq!(&bytes[20..24], &10i32.to_be_bytes());
        assert_eq!(xdr::from_bytes::<ReadParms>(&bytes).unwrap(), parms);
    }

    #[test]
    fn read_reason_keeps_unknown_bits() {
        let resp = ReadResp {
            error: 0,
            reason: ReadReason::from_bits_retain(0x14),
            data: Bytes::from_static(b"1.0"),
        };
        let decoded: ReadResp = xdr::from_bytes(&xdr::to_bytes(&resp)).unwrap();
        assert!(decoded.reason.contains(ReadReason::END));
        assert_eq!(decoded.reason.bits(), 0x14);
    }

    #[test]
    fn oversized_srq_handle_does_not_decode() {
        let parms = EnableSrqParms {
            link: 1,
            enable: true,
            handle: Bytes::from(vec![0u8; 41]),
        };
        let err = xdr::from_bytes::<EnableSrqParms>(&xdr::to_bytes(&parms)).unwrap_err();
        assert!(matches!(err, XdrError::LengthLimit { len: 41, max: 40 }));
    }
}
