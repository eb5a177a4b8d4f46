//! ONC RPC v2 call/reply headers (RFC 5531).

use bytes::Bytes;
use xdr::{Decoder, Encoder, XdrDecode, XdrEncode, XdrError};

use crate::RpcError;

/// RPC message constants.
pub mod consts {
    /// Protocol version carried in every call.
    pub const RPC_VERSION: u32 = 2;
    /// Message type of a call.
    pub const CALL: u32 = 0;
    /// Message type of a reply.
    pub const REPLY: u32 = 1;
    /// Reply status: the call was accepted.
    pub const MSG_ACCEPTED: u32 = 0;
    /// Reply status: the call was denied.
    pub const MSG_DENIED: u32 = 1;
    /// Denial reason: RPC version mismatch.
    pub const RPC_MISMATCH: u32 = 0;
    /// Denial reason: authentication failure.
    pub const AUTH_ERROR: u32 = 1;
    /// Maximum size of a credential or verifier body.
    pub const MAX_AUTH_BYTES: usize = 400;
    /// Procedure 0 is the no-op ping of every program.
    pub const NULL_PROC: u32 = 0;
}

/// Authentication flavor of a credential or verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlavor {
    Null,
    Unix,
    Short,
    Des,
    Other(u32),
}

impl AuthFlavor {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => AuthFlavor::Null,
            1 => AuthFlavor::Unix,
            2 => AuthFlavor::Short,
            3 => AuthFlavor::Des,
            other => AuthFlavor::Other(other),
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            AuthFlavor::Null => 0,
            AuthFlavor::Unix => 1,
            AuthFlavor::Short => 2,
            AuthFlavor::Des => 3,
            AuthFlavor::Other(raw) => raw,
        }
    }
}

/// Credential or verifier: a flavor plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAuth {
    pub flavor: AuthFlavor,
    pub body: Bytes,
}

impl OpaqueAuth {
    /// The null credential, the only one this crate generates.
    pub fn null() -> Self {
        Self {
            flavor: AuthFlavor::Null,
            body: Bytes::new(),
        }
    }
}

impl Default for OpaqueAuth {
    fn default() -> Self {
        Self::null()
    }
}

impl XdrEncode for OpaqueAuth {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.flavor.to_raw());
        enc.put_opaque(&self.body);
    }
}

impl XdrDecode for OpaqueAuth {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        let flavor = AuthFlavor::from_raw(dec.get_u32()?);
        let body = dec.get_opaque_max(consts::MAX_AUTH_BYTES)?;
        Ok(Self {
            flavor,
            body: Bytes::copy_from_slice(body),
        })
    }
}

/// Authentication failure sub-codes of a denied reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStat {
    Ok,
    BadCred,
    RejectedCred,
    BadVerf,
    RejectedVerf,
    TooWeak,
    Other(u32),
}

impl AuthStat {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => AuthStat::Ok,
            1 => AuthStat::BadCred,
            2 => AuthStat::RejectedCred,
            3 => AuthStat::BadVerf,
            4 => AuthStat::RejectedVerf,
            5 => AuthStat::TooWeak,
            other => AuthStat::Other(other),
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            AuthStat::Ok => 0,
            AuthStat::BadCred => 1,
            AuthStat::RejectedCred => 2,
            AuthStat::BadVerf => 3,
            AuthStat::RejectedVerf => 4,
            AuthStat::TooWeak => 5,
            AuthStat::Other(raw) => raw,
        }
    }
}

/// Outcome of an accepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStat {
    Success,
    ProgUnavail,
    ProgMismatch { low: u32, high: u32 },
    ProcUnavail,
    GarbageArgs,
    SystemErr,
    Unknown(u32),
}

impl AcceptStat {
    pub const fn to_raw(self) -> u32 {
        match self {
            AcceptStat::Success => 0,
            AcceptStat::ProgUnavail => 1,
            AcceptStat::ProgMismatch { .. } => 2,
            AcceptStat::ProcUnavail => 3,
            AcceptStat::GarbageArgs => 4,
            AcceptStat::SystemErr => 5,
            AcceptStat::Unknown(raw) => raw,
        }
    }
}

/// Reason a call was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    RpcMismatch { low: u32, high: u32 },
    AuthError(AuthStat),
}

/// Call header preceding the procedure arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHeader {
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc_num: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

impl XdrEncode for CallHeader {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.xid);
        enc.put_u32(consts::CALL);
        enc.put_u32(consts::RPC_VERSION);
        enc.put_u32(self.prog);
        enc.put_u32(self.vers);
        enc.put_u32(self.proc_num);
        enc.put(&self.cred);
        enc.put(&self.verf);
    }
}

impl CallHeader {
    /// Decode a call header, rejecting non-calls and foreign RPC versions.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, RpcError> {
        let xid = dec.get_u32()?;
        let mtype = dec.get_u32()?;
        if mtype != consts::CALL {
            return Err(RpcError::BadFormat(format!("no CALL but {mtype}")));
        }
        let version = dec.get_u32()?;
        if version != consts::RPC_VERSION {
            return Err(RpcError::BadFormat(format!("bad RPC version {version}")));
        }
        Ok(Self {
            xid,
            prog: dec.get_u32()?,
            vers: dec.get_u32()?,
            proc_num: dec.get_u32()?,
            cred: dec.get()?,
            verf: dec.get()?,
        })
    }
}

/// Body of a reply header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Accepted { verf: OpaqueAuth, stat: AcceptStat },
    Denied(RejectReason),
}

/// Reply header preceding the procedure results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: u32,
    pub body: ReplyBody,
}

impl ReplyHeader {
    /// Header of a successful reply with a null verifier.
    pub fn success(xid: u32) -> Self {
        Self::accepted(xid, AcceptStat::Success)
    }

    pub fn accepted(xid: u32, stat: AcceptStat) -> Self {
        Self {
            xid,
            body: ReplyBody::Accepted {
                verf: OpaqueAuth::null(),
                stat,
            },
        }
    }

    pub fn denied(xid: u32, reason: RejectReason) -> Self {
        Self {
            xid,
            body: ReplyBody::Denied(reason),
        }
    }

    /// Structural decode; status codes other than success are not errors here.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, RpcError> {
        let xid = dec.get_u32()?;
        let mtype = dec.get_u32()?;
        if mtype != consts::REPLY {
            return Err(RpcError::BadFormat(format!("no REPLY but {mtype}")));
        }
        let body = match dec.get_u32()? {
            consts::MSG_ACCEPTED => {
                let verf = dec.get()?;
                let stat = match dec.get_u32()? {
                    0 => AcceptStat::Success,
                    1 => AcceptStat::ProgUnavail,
                    2 => AcceptStat::ProgMismatch {
                        low: dec.get_u32()?,
                        high: dec.get_u32()?,
                    },
                    3 => AcceptStat::ProcUnavail,
                    4 => AcceptStat::GarbageArgs,
                    5 => AcceptStat::SystemErr,
                    other => AcceptStat::Unknown(other),
                };
                ReplyBody::Accepted { verf, stat }
            }
            consts::MSG_DENIED => {
                let reason = match dec.get_u32()? {
                    consts::RPC_MISMATCH => RejectReason::RpcMismatch {
                        low: dec.get_u32()?,
                        high: dec.get_u32()?,
                    },
                    consts::AUTH_ERROR => RejectReason::AuthError(AuthStat::from_raw(dec.get_u32()?)),
                    other => {
                        return Err(RpcError::BadFormat(format!("MSG_DENIED: {other}")));
                    }
                };
                ReplyBody::Denied(reason)
            }
            other => {
                return Err(RpcError::BadFormat(format!(
                    "neither MSG_DENIED nor MSG_ACCEPTED: {other}"
                )));
            }
        };
        Ok(Self { xid, body })
    }

    /// Map the reply status onto the caller-visible outcome.
    pub fn into_result(self) -> Result<OpaqueAuth, RpcError> {
        match self.body {
            ReplyBody::Accepted { verf, stat } => match stat {
                AcceptStat::Success => Ok(verf),
                AcceptStat::ProgUnavail => Err(RpcError::ProgUnavail),
                AcceptStat::ProgMismatch { low, high } => Err(RpcError::ProgMismatch { low, high }),
                AcceptStat::ProcUnavail => Err(RpcError::ProcUnavail),
                AcceptStat::GarbageArgs => Err(RpcError::GarbageArgs),
                AcceptStat::SystemErr => Err(RpcError::SystemErr),
                AcceptStat::Unknown(raw) => Err(RpcError::UnknownAcceptStat(raw)),
            },
            ReplyBody::Denied(RejectReason::RpcMismatch { low, high }) => {
                Err(RpcError::RpcMismatch { low, high })
            }
            ReplyBody::Denied(RejectReason::AuthError(stat)) => Err(RpcError::AuthError(stat)),
        }
    }
}

impl XdrEncode for ReplyHeader {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.xid);
        enc.put_u32(consts::REPLY);
        match &self.body {
            ReplyBody::Accepted { verf, stat } => {
                enc.put_u32(consts::MSG_ACCEPTED);
                enc.put(verf);
                enc.put_u32(stat.to_raw());
                if let AcceptStat::ProgMismatch { low, high } = stat {
                    enc.put_u32(*low);
                    enc.put_u32(*high);
                }
            }
            ReplyBody::Denied(reason) => {
                enc.put_u32(consts::MSG_DENIED);
                match reason {
                    RejectReason::RpcMismatch { low, high } => {
                        enc.put_u32(consts::RPC_MISMATCH);
                        enc.put_u32(*low);
                        enc.put_u32(*high);
                    }
                    RejectReason::AuthError(stat) => {
                        enc.put_u32(consts::AUTH_ERROR);
                        enc.put_u32(stat.to_raw());
                    }
                }
            }
        }
    }
}

/// A reply split into its header and the undecoded procedure results.
#[derive(Debug, Clone)]
pub struct Reply<'a> {
    pub header: ReplyHeader,
    pub results: &'a [u8],
}

/// Decode the reply header of a complete reply message.
pub fn decode_reply(buf: &[u8]) -> Result<Reply<'_>, RpcError> {
    let mut dec = Decoder::new(buf);
    let header = ReplyHeader::decode(&mut dec)?;
    Ok(Reply {
        header,
        results: dec.rest(),
    })
}
