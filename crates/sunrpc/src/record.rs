//! Record marking for stream transports (RFC 5531, section 11).
//!
//! Every fragment is prefixed by a big-endian `u32` whose top bit flags the
//! last fragment of a record and whose low 31 bits carry the fragment length.

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};
use tracing::trace;

/// Flag marking the last fragment of a record.
pub const LAST_FRAGMENT: u32 = 0x8000_0000;
/// Largest fragment length expressible in a fragment header.
pub const MAX_FRAGMENT: usize = 0x7FFF_FFFF;

/// Write one fragment (header and payload in a single write).
pub fn write_fragment<W: Write + ?Sized>(writer: &mut W, last: bool, fragment: &[u8]) -> io::Result<()> {
    if fragment.len() > MAX_FRAGMENT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "fragment exceeds record marking limit",
        ));
    }
    let mut header = fragment.len() as u32;
    if last {
        header |= LAST_FRAGMENT;
    }
    let mut buf = BytesMut::with_capacity(4 + fragment.len());
    buf.put_u32(header);
    buf.extend_from_slice(fragment);
    writer.write_all(&buf)
}

/// Write a record as a single last fragment.
pub fn write_record<W: Write + ?Sized>(writer: &mut W, record: &[u8]) -> io::Result<()> {
    write_fragment(writer, true, record)
}

/// Write a record split into fragments of at most `max_fragment` bytes.
pub fn write_record_fragmented<W: Write + ?Sized>(
    writer: &mut W,
    record: &[u8],
    max_fragment: usize,
) -> io::Result<()> {
    let max_fragment = max_fragment.clamp(1, MAX_FRAGMENT);
    if record.len() <= max_fragment {
        return write_record(writer, record);
    }
    let mut chunks = record.chunks(max_fragment).peekable();
    while let Some(chunk) = chunks.next() {
        write_fragment(writer, chunks.peek().is_none(), chunk)?;
    }
    Ok(())
}

/// Read one fragment, returning its last-fragment flag and payload.
pub fn read_fragment<R: Read + ?Sized>(reader: &mut R) -> io::Result<(bool, Vec<u8>)> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let raw = u32::from_be_bytes(header);
    let last = raw & LAST_FRAGMENT != 0;
    let len = (raw & !LAST_FRAGMENT) as usize;
    let mut fragment = Vec::new();
    let got = reader.take(len as u64).read_to_end(&mut fragment)?;
    if got != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed connection mid-fragment",
        ));
    }
    Ok((last, fragment))
}

/// Read fragments until the last one and concatenate their payloads.
pub fn read_record<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut record = Vec::new();
    let mut fragments = 0usize;
    loop {
        let (last, fragment) = read_fragment(reader)?;
        fragments += 1;
        record.extend_from_slice(&fragment);
        if last {
            trace!(fragments, bytes = record.len(), "received record");
            return Ok(record);
        }
    }
}
