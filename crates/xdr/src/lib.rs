//! XDR: external data representation encode/decode (transport-agnostic).
//!
//! Integers travel in network byte order, booleans as 32-bit `0`/`1`, and
//! variable-length data is prefixed with its length and zero-padded to the
//! next four byte boundary. Lists are a sequence of `1, element` markers
//! closed by a single `0`.
//!
//! ```
//! use xdr::{Decoder, Encoder};
//!
//! let mut enc = Encoder::new();
//! enc.put_u32(7);
//! enc.put_opaque(b"abc");
//! let bytes = enc.freeze();
//! assert_eq!(bytes.len(), 12);
//!
//! let mut dec = Decoder::new(&bytes);
//! assert_eq!(dec.get_u32().unwrap(), 7);
//! assert_eq!(dec.get_opaque().unwrap(), b"abc");
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the basic XDR unit (in bytes).
pub const UNIT: usize = 4;

/// Errors that can occur when decoding XDR data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XdrError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid boolean value {0}")]
    InvalidBool(u32),
    #[error("invalid discriminant {value} for {what}")]
    InvalidDiscriminant { what: &'static str, value: u32 },
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("length {len} exceeds limit {max}")]
    LengthLimit { len: usize, max: usize },
}

/// Number of zero bytes needed to pad `len` to a unit boundary.
pub const fn padding(len: usize) -> usize {
    (UNIT - len % UNIT) % UNIT
}

/// Types with a fixed XDR representation.
pub trait XdrEncode {
    fn encode(&self, enc: &mut Encoder);
}

/// Types that can be decoded from their XDR representation.
pub trait XdrDecode: Sized {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError>;
}

/// Growable XDR output buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder with room for `capacity` bytes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Unsigned 32-bit integer, big-endian.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Signed 32-bit integer, two's complement, big-endian.
    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Unsigned hyper integer.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    /// Signed hyper integer.
    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Boolean as the integer 0 or 1.
    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u32(u32::from(value));
    }

    /// Fixed-length opaque data: the bytes followed by padding, no length.
    pub fn put_fixed_opaque(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.buf.put_bytes(0, padding(data.len()));
    }

    /// Variable-length opaque data: length prefix, bytes, padding.
    pub fn put_opaque(&mut self, data: &[u8]) {
        self.buf.put_u32(data.len() as u32);
        self.put_fixed_opaque(data);
    }

    /// String as variable-length opaque UTF-8 bytes.
    pub fn put_string(&mut self, value: &str) {
        self.put_opaque(value.as_bytes());
    }

    /// Encode a list as `1, item` pairs closed by `0`.
    pub fn put_list<T, I, F>(&mut self, items: I, mut f: F)
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&mut Self, T),
    {
        for item in items {
            self.buf.put_u32(1);
            f(self, item);
        }
        self.buf.put_u32(0);
    }

    /// Encode any [`XdrEncode`] value.
    pub fn put<T: XdrEncode + ?Sized>(&mut self, value: &T) {
        value.encode(self);
    }

    /// Append already encoded XDR data verbatim.
    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish encoding and hand out the bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// Cursor over borrowed XDR input.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Start decoding at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unconsumed input.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<(), XdrError> {
        if self.buf.len() < needed {
            return Err(XdrError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Unsigned 32-bit integer, big-endian.
    pub fn get_u32(&mut self) -> Result<u32, XdrError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Signed 32-bit integer, big-endian.
    pub fn get_i32(&mut self) -> Result<i32, XdrError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn get_u64(&mut self) -> Result<u64, XdrError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn get_i64(&mut self) -> Result<i64, XdrError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Boolean; any value other than 0 or 1 is [`XdrError::InvalidBool`].
    pub fn get_bool(&mut self) -> Result<bool, XdrError> {
        match self.get_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(XdrError::InvalidBool(other)),
        }
    }

    /// `len` bytes of opaque data, skipping the padding that follows them.
    pub fn get_fixed_opaque(&mut self, len: usize) -> Result<&'a [u8], XdrError> {
        let padded = len
            .checked_add(padding(len))
            .ok_or(XdrError::LengthLimit {
                len,
                max: usize::MAX - UNIT,
            })?;
        self.ensure(padded)?;
        let (data, rest) = self.buf.split_at(padded);
        self.buf = rest;
        Ok(&data[..len])
    }

    /// Length-prefixed opaque data, borrowed from the input.
    pub fn get_opaque(&mut self) -> Result<&'a [u8], XdrError> {
        let len = self.get_u32()? as usize;
        self.get_fixed_opaque(len)
    }

    /// Variable-length opaque data with an upper bound on its declared size.
    pub fn get_opaque_max(&mut self, max: usize) -> Result<&'a [u8], XdrError> {
        let len = self.get_u32()? as usize;
        if len > max {
            return Err(XdrError::LengthLimit { len, max });
        }
        self.get_fixed_opaque(len)
    }

    /// Length-prefixed string; the bytes must be UTF-8.
    pub fn get_string(&mut self) -> Result<String, XdrError> {
        let raw = self.get_opaque()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| XdrError::InvalidUtf8)
    }

    /// Decode a `1, item ... 0` list.
    pub fn get_list<T, F>(&mut self, mut f: F) -> Result<Vec<T>, XdrError>
    where
        F: FnMut(&mut Self) -> Result<T, XdrError>,
    {
        let mut items = Vec::new();
        loop {
            match self.get_u32()? {
                0 => return Ok(items),
                1 => items.push(f(self)?),
                value => {
                    return Err(XdrError::InvalidDiscriminant {
                        what: "list marker",
                        value,
                    })
                }
            }
        }
    }

    /// Decode any [`XdrDecode`] value.
    pub fn get<T: XdrDecode>(&mut self) -> Result<T, XdrError> {
        T::decode(self)
    }
}

/// Encode a value into a standalone buffer.
pub fn to_bytes<T: XdrEncode + ?Sized>(value: &T) -> Bytes {
    let mut enc = Encoder::new();
    value.encode(&mut enc);
    enc.freeze()
}

/// Decode a value from the front of `buf`; trailing bytes are ignored.
pub fn from_bytes<T: XdrDecode>(buf: &[u8]) -> Result<T, XdrError> {
    Decoder::new(buf).get()
}

impl XdrEncode for () {
    fn encode(&self, _enc: &mut Encoder) {}
}

impl XdrDecode for () {
    fn decode(_dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        Ok(())
    }
}

macro_rules! scalar {
    ($ty:ty, $put:ident, $get:ident) => {
        impl XdrEncode for $ty {
            fn encode(&self, enc: &mut Encoder) {
                enc.$put(*self);
            }
        }

        impl XdrDecode for $ty {
            fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
                dec.$get()
            }
        }
    };
}

scalar!(u32, put_u32, get_u32);
scalar!(i32, put_i32, get_i32);
scalar!(u64, put_u64, get_u64);
scalar!(i64, put_i64, get_i64);
scalar!(bool, put_bool, get_bool);

impl XdrEncode for [u8] {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_opaque(self);
    }
}

impl XdrEncode for Vec<u8> {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_opaque(self);
    }
}

impl XdrDecode for Vec<u8> {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        dec.get_opaque().map(<[u8]>::to_vec)
    }
}

impl XdrEncode for Bytes {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_opaque(self);
    }
}

impl XdrDecode for Bytes {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        dec.get_opaque().map(Bytes::copy_from_slice)
    }
}

impl XdrEncode for str {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_string(self);
    }
}

impl XdrEncode for String {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_string(self);
    }
}

impl XdrDecode for String {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, XdrError> {
        dec.get_string()
    }
}

impl<T: XdrEncode + ?Sized> XdrEncode for &T {
    fn encode(&self, enc: &mut Encoder) {
        (**self).encode(enc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut enc = Encoder::new();
        enc.put_u32(0x0102_0304);
        enc.put_i32(-2);
        enc.put_bool(true);
        enc.put_u64(0x0A0B_0C0D_0E0F_1011);
        let out = enc.freeze();
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(&out[4..8], &[0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(&out[8..12], &[0, 0, 0, 1]);
        assert_eq!(&out[12..20], &0x0A0B_0C0D_0E0F_1011u64.to_be_bytes());

        let mut dec = Decoder::new(&out);
        assert_eq!(dec.get_u32().unwrap(), 0x0102_0304);
        assert_eq!(dec.get_i32().unwrap(), -2);
        assert!(dec.get_bool().unwrap());
        assert_eq!(dec.get_u64().unwrap(), 0x0A0B_0C0D_0E0F_1011);
        assert!(dec.is_empty());
    }

    #[test]
    fn opaque_padding_is_stripped() {
        for len in [0usize, 1, 3, 4, 5, 100] {
            let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(7) | 1).collect();
            let encoded = to_bytes(&data[..]);
            assert_eq!(encoded.len(), 4 + len + padding(len), "len {len}");
            assert_eq!(encoded.len() % UNIT, 0);
            assert!(encoded[4 + len..].iter().all(|&b| b == 0));

            let mut dec = Decoder::new(&encoded);
            assert_eq!(dec.get_opaque().unwrap(), &data[..]);
            assert!(dec.is_empty(), "padding left behind for len {len}");
        }
    }

    #[test]
    fn truncated_opaque_is_rejected() {
        let mut enc = Encoder::new();
        enc.put_u32(9);
        enc.put_fixed_opaque(b"short");
        let err = Decoder::new(enc.as_slice()).get_opaque().unwrap_err();
        assert_eq!(
            err,
            XdrError::Truncated {
                needed: 12,
                remaining: 8
            }
        );
    }

    #[test]
    fn truncated_integer_is_rejected() {
        let err = Decoder::new(&[0, 1]).get_u32().unwrap_err();
        assert!(matches!(err, XdrError::Truncated { needed: 4, .. }));
    }

    #[test]
    fn list_encoding_uses_markers() {
        let mut enc = Encoder::new();
        enc.put_list([10u32, 20], |e, v| e.put_u32(v));
        assert_eq!(
            enc.as_slice(),
            &[0, 0, 0, 1, 0, 0, 0, 10, 0, 0, 0, 1, 0, 0, 0, 20, 0, 0, 0, 0]
        );
        let items = Decoder::new(enc.as_slice())
            .get_list(|d| d.get_u32())
            .unwrap();
        assert_eq!(items, vec![10, 20]);
    }

    #[test]
    fn bad_list_marker_is_rejected() {
        let mut enc = Encoder::new();
        enc.put_u32(1);
        enc.put_u32(5);
        enc.put_u32(2);
        let err = Decoder::new(enc.as_slice())
            .get_list(|d| d.get_u32())
            .unwrap_err();
        assert_eq!(
            err,
            XdrError::InvalidDiscriminant {
                what: "list marker",
                value: 2
            }
        );
    }

    #[test]
    fn bool_outside_range_is_rejected() {
        let err = Decoder::new(&[0, 0, 0, 2]).get_bool().unwrap_err();
        assert_eq!(err, XdrError::InvalidBool(2));
    }

    #[test]
    fn opaque_limit_is_enforced() {
        let encoded = to_bytes(&vec![0u8; 41]);
        let err = Decoder::new(&encoded).get_opaque_max(40).unwrap_err();
        assert_eq!(err, XdrError::LengthLimit { len: 41, max: 40 });
    }

    #[test]
    fn strings_roundtrip_and_validate_utf8() {
        let encoded = to_bytes("inst0");
        assert_eq!(from_bytes::<String>(&encoded).unwrap(), "inst0");

        let bad = to_bytes(&vec![0xFFu8, 0xFE]);
        assert_eq!(from_bytes::<String>(&bad).unwrap_err(), XdrError::InvalidUtf8);
    }
}
