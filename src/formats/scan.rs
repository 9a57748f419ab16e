//! Generic packet scanner
//!
//! Fallback for formats with no dedicated walker (SVG among them): a byte
//! scan for the XMP packet magic id and end marker. Quotes in the markers
//! match interchangeably (`'` or `"`), and an `r` in place of the `w`
//! matches too but marks the packet read-only.
//!
//! The scanner's rewrite is the in-place kind the packet wrapper exists
//! for: the new payload must fit the old region, the padding is rebuilt,
//! and the total file size never changes.

use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{FileHandler, WriteOptions, XmpData};
use crate::io::{copy_bytes, read_u8};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

/// Tail of the packet begin PI: the well-known id and the PI close
const PACKET_MAGIC: &[u8] = b"W5M0MpCehiHzreSzNTczkc9d'?>";

/// The 19-byte end marker
const END_MAGIC: &[u8] = b"<?xpacket end='w'?>";

/// Generic packet-scanning handler
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanHandler;

impl FileHandler for ScanHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let found = scan_for_begin(reader)?;
        reader.seek(SeekFrom::Start(pos))?;
        Ok(found)
    }

    fn read_xmp<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<XmpData> {
        Self::read_xmp(reader)
    }

    fn write_xmp<R: Read + Seek, W: Write + Seek>(
        &self,
        reader: &mut R,
        writer: &mut W,
        xmp: &str,
        _options: &WriteOptions,
    ) -> XmpResult<()> {
        Self::write_xmp(reader, writer, xmp)
    }

    fn format_name(&self) -> &'static str {
        "packet scan"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Whether `byte` matches the begin-magic byte at `at`, either quote
/// standing in for the other
fn begin_marker_match(byte: u8, at: usize) -> bool {
    let expected = PACKET_MAGIC[at];
    byte == expected || (byte == b'"' && expected == b'\'')
}

/// Whether `byte` matches the end-marker byte at `at`. The second field
/// reports an `r` standing in for the `w` (a read-only packet).
fn end_marker_match(byte: u8, at: usize) -> (bool, bool) {
    let expected = END_MAGIC[at];
    if byte == expected || (byte == b'"' && expected == b'\'') {
        (true, false)
    } else if byte == b'r' && expected == b'w' {
        (true, true)
    } else {
        (false, false)
    }
}

/// Advance the reader past the next packet magic. `Ok(false)` at end of
/// input with no match.
fn scan_for_begin<R: Read>(reader: &mut R) -> XmpResult<bool> {
    let mut index = 0;
    loop {
        let byte = match read_u8(reader) {
            Ok(byte) => byte,
            Err(_) => return Ok(false),
        };
        if begin_marker_match(byte, index) {
            index += 1;
            if index == PACKET_MAGIC.len() {
                return Ok(true);
            }
        } else {
            // the byte that broke a partial match may itself start one;
            // the magic has no longer self-overlap, so this restart is
            // enough
            index = if begin_marker_match(byte, 0) { 1 } else { 0 };
        }
    }
}

/// Advance the reader past the next end marker.
///
/// Returns (matched, writable); `writable` goes false as soon as an `r`
/// stands in for the `w`.
fn scan_for_end<R: Read>(reader: &mut R) -> XmpResult<(bool, bool)> {
    let mut index = 0;
    let mut writable = true;
    loop {
        let byte = match read_u8(reader) {
            Ok(byte) => byte,
            Err(_) => return Ok((false, writable)),
        };
        let (matched, readonly) = end_marker_match(byte, index);
        if matched {
            if readonly {
                writable = false;
            }
            index += 1;
            if index == END_MAGIC.len() {
                return Ok((true, writable));
            }
        } else {
            // retry the failed byte as a fresh start; `<` never recurs in
            // the marker, so no longer restart exists
            index = if end_marker_match(byte, 0).0 { 1 } else { 0 };
        }
    }
}

impl ScanHandler {
    /// Scan any byte stream for one XMP packet.
    ///
    /// The recovered packet reports no dimensions; an input without the
    /// packet magic is rejected.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        if !scan_for_begin(&mut reader)? {
            return Err(XmpError::NotFound("no XMP packet magic found".to_string()));
        }
        let start = reader.stream_position()?;
        scan_for_end(&mut reader)?;
        let end = reader.stream_position()?.saturating_sub(19);

        let mut data = XmpData::default();
        if end > start {
            reader.seek(SeekFrom::Start(start))?;
            let mut region = vec![0u8; (end - start) as usize];
            reader.read_exact(&mut region)?;
            if let Some(payload) = packet::strip_packet(&region) {
                data.packets.push(packet_string(payload)?);
            }
        }
        Ok(data)
    }

    /// Rewrite the packet found in `reader` in place, keeping the total
    /// size constant.
    ///
    /// Targets the same packet the reader reports: the first one in the
    /// file. The write fails when that packet is read-only (`end="r"`)
    /// or when the region between the magic and the end marker cannot
    /// hold `xmp`.
    pub fn write_xmp<R: Read + Seek, W: Write + Seek>(
        mut reader: R,
        mut writer: W,
        xmp: &str,
    ) -> XmpResult<()> {
        if xmp.is_empty() {
            return Err(XmpError::BadParam(
                "an in-place rewrite needs a non-empty payload".to_string(),
            ));
        }
        let needed = xmp.len() as u64;

        if !scan_for_begin(&mut reader)? {
            return Err(XmpError::NotFound("no XMP packet magic found".to_string()));
        }
        let start = reader.stream_position()?;
        let (matched, writable) = scan_for_end(&mut reader)?;
        if !matched {
            return Err(XmpError::NotFound(
                "XMP packet has no end marker".to_string(),
            ));
        }
        let end = reader.stream_position()? - 19;
        if !writable {
            return Err(XmpError::BadValue("the XMP packet is read-only".to_string()));
        }
        if end - start < needed {
            return Err(XmpError::BadParam(
                "payload larger than the existing packet region".to_string(),
            ));
        }

        reader.seek(SeekFrom::Start(0))?;
        copy_bytes(&mut reader, &mut writer, start)?;
        writer.write_all(xmp.as_bytes())?;
        for i in needed..(end - start) {
            writer.write_all(if i % 100 == 0 { b"\n" } else { b" " })?;
        }
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(end))?;
        copy_bytes(&mut reader, &mut writer, file_size - end)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn host_text(payload: &str, quote: char, end_mode: char) -> Vec<u8> {
        format!(
            "prologue <?xpacket begin={q}\u{FEFF}{q} id={q}W5M0MpCehiHzreSzNTczkc9d{q}?> {payload} <?xpacket end={q}{end_mode}{q}?> epilogue",
            q = quote,
        )
        .into_bytes()
    }

    #[test]
    fn test_read_single_quoted() {
        let data = ScanHandler::read_xmp(Cursor::new(host_text("hello", '\'', 'w'))).unwrap();
        assert!(data.dimensions.is_none());
        assert_eq!(data.packets, vec!["hello".to_string()]);
    }

    #[test]
    fn test_read_double_quoted() {
        let data = ScanHandler::read_xmp(Cursor::new(host_text("hello", '"', 'w'))).unwrap();
        assert_eq!(data.packets, vec!["hello".to_string()]);
    }

    #[test]
    fn test_read_readonly_packet() {
        let data = ScanHandler::read_xmp(Cursor::new(host_text("hush", '\'', 'r'))).unwrap();
        assert_eq!(data.packets, vec!["hush".to_string()]);
    }

    #[test]
    fn test_read_no_magic() {
        assert!(ScanHandler::read_xmp(Cursor::new(b"plain text".to_vec())).is_err());
    }

    #[test]
    fn test_begin_scan_restarts_on_failed_byte() {
        // a truncated magic whose final byte opens the real one: the W
        // that breaks the first match must start the second
        let host = "x W5M0MpCehiHzreSzNTczkc9d'?W5M0MpCehiHzreSzNTczkc9d'?> hello <?xpacket end='w'?>";
        let data = ScanHandler::read_xmp(Cursor::new(host.as_bytes().to_vec())).unwrap();
        assert_eq!(data.packets, vec!["hello".to_string()]);
    }

    #[test]
    fn test_end_scan_restarts_on_failed_byte() {
        // a truncated end marker runs straight into the real one: the <
        // that breaks the first match at the 'w' position must start the
        // second
        let host = "x <?xpacket begin='' id='W5M0MpCehiHzreSzNTczkc9d'?>A<?xpacket end='<?xpacket end='w'?> tail";
        let data = ScanHandler::read_xmp(Cursor::new(host.as_bytes().to_vec())).unwrap();
        // the truncated marker is part of the packet region
        assert_eq!(data.packets, vec!["A<?xpacket end='".to_string()]);
    }

    #[test]
    fn test_write_keeps_size_and_tail() {
        let host = host_text("hello", '\'', 'w');
        let mut out = Cursor::new(Vec::new());
        ScanHandler::write_xmp(Cursor::new(host.clone()), &mut out, "hi").unwrap();

        let rewritten = out.into_inner();
        assert_eq!(rewritten.len(), host.len());
        assert!(rewritten.ends_with(b"epilogue"));
        assert!(rewritten.starts_with(b"prologue"));

        let data = ScanHandler::read_xmp(Cursor::new(rewritten)).unwrap();
        assert_eq!(data.packets, vec!["hi".to_string()]);
    }

    #[test]
    fn test_write_payload_too_large() {
        let host = host_text("tiny", '\'', 'w');
        let mut out = Cursor::new(Vec::new());
        let oversized = "x".repeat(64);
        assert!(matches!(
            ScanHandler::write_xmp(Cursor::new(host), &mut out, &oversized),
            Err(XmpError::BadParam(_))
        ));
    }

    #[test]
    fn test_write_readonly_fails() {
        let host = host_text("hello", '\'', 'r');
        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            ScanHandler::write_xmp(Cursor::new(host), &mut out, "hi"),
            Err(XmpError::BadValue(_))
        ));
    }

    #[test]
    fn test_write_targets_first_packet_only() {
        // first packet read-only, second writable: the writer addresses
        // the packet the reader reports and fails, never the later one
        let mut host = host_text("alpha", '\'', 'r');
        host.extend_from_slice(&host_text("beta", '\'', 'w'));

        let data = ScanHandler::read_xmp(Cursor::new(host.clone())).unwrap();
        assert_eq!(data.packets, vec!["alpha".to_string()]);

        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            ScanHandler::write_xmp(Cursor::new(host), &mut out, "hi"),
            Err(XmpError::BadValue(_))
        ));

        // same when the first packet is merely too small for the payload
        let mut host = host_text("a", '\'', 'w');
        host.extend_from_slice(&host_text(&" ".repeat(200), '\'', 'w'));
        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            ScanHandler::write_xmp(Cursor::new(host), &mut out, &"y".repeat(16)),
            Err(XmpError::BadParam(_))
        ));
    }

    #[test]
    fn test_write_empty_payload_rejected() {
        let host = host_text("hello", '\'', 'w');
        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            ScanHandler::write_xmp(Cursor::new(host), &mut out, ""),
            Err(XmpError::BadParam(_))
        ));
    }

    #[test]
    fn test_can_handle() {
        let handler = ScanHandler;
        let mut reader = Cursor::new(host_text("hello", '"', 'w'));
        assert!(handler.can_handle(&mut reader).unwrap());
        assert_eq!(reader.position(), 0);
        let mut reader = Cursor::new(b"nothing here".to_vec());
        assert!(!handler.can_handle(&mut reader).unwrap());
    }
}
