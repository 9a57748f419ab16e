//! XMP packet wrapper
//!
//! An XMP packet embedded in a host file is framed by `<?xpacket begin=…?>`
//! and `<?xpacket end=…?>` processing instructions, with a run of whitespace
//! padding before the end marker so the packet can later be edited in place
//! without rewriting the host file. This module emits and strips that frame.
//!
//! The begin PI is a fixed 54-byte sequence (it embeds a UTF-8 byte order
//! mark and the well-known packet id); the end PI is 20 bytes including its
//! leading newline, and carries `w` for a writable packet or `r` for a
//! read-only one (padding length zero).

use crate::error::XmpResult;
use std::io::Write;

/// The 54-byte packet header, BOM included
pub const PACKET_HEADER: &[u8] =
    b"<?xpacket begin=\"\xEF\xBB\xBF\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n";

/// The 20-byte packet trailer for a writable packet
pub const PACKET_TRAILER_WRITABLE: &[u8] = b"\n<?xpacket end=\"w\"?>";

/// The 20-byte packet trailer for a read-only packet
pub const PACKET_TRAILER_READONLY: &[u8] = b"\n<?xpacket end=\"r\"?>";

/// Write a payload, optionally framed by the packet wrapper, with `pad - 1`
/// bytes of whitespace padding (every 100th byte a newline, the rest spaces).
///
/// Returns the number of bytes written, which always equals
/// [`packet_len`]`(payload.len(), wrap, pad)`.
pub fn write_packet<W: Write>(
    writer: &mut W,
    payload: &[u8],
    wrap: bool,
    pad: usize,
) -> XmpResult<usize> {
    if wrap {
        writer.write_all(PACKET_HEADER)?;
    }
    writer.write_all(payload)?;
    for i in 1..pad {
        writer.write_all(if i % 100 == 0 { b"\n" } else { b" " })?;
    }
    if wrap {
        if pad > 0 {
            writer.write_all(PACKET_TRAILER_WRITABLE)?;
        } else {
            writer.write_all(PACKET_TRAILER_READONLY)?;
        }
    }
    Ok(packet_len(payload.len(), wrap, pad))
}

/// The size in bytes that [`write_packet`] produces, without writing.
///
/// Container rewriters use this to size enclosing chunk and box headers
/// before streaming the packet itself.
pub fn packet_len(payload_len: usize, wrap: bool, pad: usize) -> usize {
    let mut len = payload_len;
    if wrap {
        len += PACKET_HEADER.len() + PACKET_TRAILER_WRITABLE.len();
    }
    if pad > 0 {
        len += pad - 1;
    }
    len
}

/// Build a wrapped packet in memory.
///
/// The PNG rewriter needs the full chunk body ahead of time to checksum it.
pub fn wrap_packet(payload: &[u8], wrap: bool, pad: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(packet_len(payload.len(), wrap, pad));
    write_packet(&mut out, payload, wrap, pad).expect("writing to a Vec cannot fail");
    out
}

/// Strip the packet wrapper and surrounding whitespace from a byte region.
///
/// Skips leading whitespace, a begin PI if present (consumed through its
/// closing `?>`), whitespace again, then symmetrically trailing whitespace,
/// an end PI of exactly the 19-byte shape `<?xpacket end="X"?>`, and any
/// whitespace padding before it. Returns `None` when nothing remains, or
/// when a begin PI opens but never closes.
pub fn strip_packet(region: &[u8]) -> Option<&[u8]> {
    let mut start = 0;
    let mut end = region.len();

    while start < end && region[start].is_ascii_whitespace() {
        start += 1;
    }

    if region[start..end].starts_with(b"<?xpacket begin=") {
        let mut i = start + 16;
        while i < end && region[i] != b'?' {
            i += 1;
        }
        if i + 1 >= end || region[i + 1] != b'>' {
            return None;
        }
        start = i + 2;
        while start < end && region[start].is_ascii_whitespace() {
            start += 1;
        }
    }

    while end > start && region[end - 1].is_ascii_whitespace() {
        end -= 1;
    }

    if end - start >= 19 {
        let tail = &region[end - 19..end];
        if tail.starts_with(b"<?xpacket end=") && tail.ends_with(b"?>") {
            end -= 19;
            while end > start && region[end - 1].is_ascii_whitespace() {
                end -= 1;
            }
        }
    }

    if end > start {
        Some(&region[start..end])
    } else {
        None
    }
}
