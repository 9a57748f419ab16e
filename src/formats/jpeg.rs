//! JPEG file format handler
//!
//! JPEG XMP Storage:
//! - The standard packet is an APP1 segment whose payload begins with the
//!   29-byte signature `http://ns.adobe.com/xap/1.0/\0`
//! - Packets too large for one segment spill into extended XMP: further APP1
//!   segments signed `http://ns.adobe.com/xmp/extension/\0`, each carrying a
//!   32-digit GUID, the total length, the part offset, and up to 65400
//!   payload bytes. The GUID is the MD5 of the full extended packet and must
//!   appear in the standard packet (`xmpNote:HasExtendedXMP`).
//! - Dimensions come from SOFn segments; the maximum across all of them is
//!   kept, since a file may contain thumbnails. DNL updates the height.

use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{Dimensions, FileHandler, WriteOptions, XmpData};
use crate::io::{copy_bytes, read_at_most, read_u8, read_u16, read_u32, write_u8, write_u16, write_u32, Endian};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

/// Standard XMP signature in an APP1 segment (29 bytes)
const XMP_SIGNATURE: &[u8; 29] = b"http://ns.adobe.com/xap/1.0/\0";

/// Extended XMP signature in an APP1 segment (35 bytes)
const EXTENDED_XMP_SIGNATURE: &[u8; 35] = b"http://ns.adobe.com/xmp/extension/\0";

/// APP13 Photoshop signature (14 bytes)
const PHOTOSHOP_SIGNATURE: &[u8; 14] = b"Photoshop 3.0\0";

/// Fixed per-part overhead of an extended XMP segment: length field,
/// signature, GUID, total length, offset
const EXTENDED_HEADER_LEN: usize = 2 + 35 + 32 + 4 + 4;

/// Largest extended XMP payload carried by one APP1 segment
const MAX_EXTENDED_PART: usize = 65400;

/// The GUID naming an extended XMP payload: its MD5 digest as 32 hex digits.
///
/// A standard packet that spills into extended XMP must carry this value in
/// its `xmpNote:HasExtendedXMP` property; readers drop extension segments
/// whose GUID the standard packet does not mention.
pub fn extended_xmp_guid(extended_xmp: &str) -> String {
    format!("{:032x}", md5::compute(extended_xmp.as_bytes()))
}

/// JPEG file handler for XMP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegHandler;

impl FileHandler for JpegHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let mut header = [0u8; 4];
        let got = read_at_most(reader, &mut header)?;
        reader.seek(SeekFrom::Start(pos))?;
        if got < 4 || header[0] != 0xFF || header[1] != 0xD8 {
            return Ok(false);
        }
        // a marker must follow the SOI
        Ok(header[2] == 0xFF && header[3] != 0x00)
    }

    fn read_xmp<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<XmpData> {
        Self::read_xmp(reader)
    }

    fn write_xmp<R: Read + Seek, W: Write + Seek>(
        &self,
        reader: &mut R,
        writer: &mut W,
        xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        Self::write_xmp_ext(reader, writer, xmp, "", options)
    }

    fn format_name(&self) -> &'static str {
        "JPEG"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg"]
    }
}

/// True for a Start-of-Frame marker code (SOF0..SOF15 minus DHT and DAC)
fn is_sof(marker: u8) -> bool {
    (0xC0..=0xCF).contains(&marker) && marker != 0xC4 && marker != 0xCC
}

impl JpegHandler {
    /// Read XMP packets and image dimensions from a JPEG file.
    ///
    /// The marker stream is scanned with one byte of lookahead; the scan
    /// ends at the natural end of input. Extended XMP parts are reassembled
    /// into a single packet appended after the standard one, on the
    /// assumption that the file carries one GUID, named by the standard
    /// packet, with all parts present. A part that violates the first two
    /// assumptions is dropped with a warning.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        if read_u8(&mut reader)? != 0xFF || read_u8(&mut reader)? != 0xD8 {
            return Err(XmpError::BadValue("not a JPEG file".to_string()));
        }

        let mut width = 0u32;
        let mut height = 0u32;
        let mut packets: Vec<String> = Vec::new();
        let mut extended: Option<Vec<u8>> = None;

        let mut prev = match read_u8(&mut reader) {
            Ok(byte) => byte,
            Err(_) => {
                return Ok(XmpData {
                    dimensions: Some(Dimensions { width, height }),
                    packets,
                })
            }
        };

        loop {
            let cur = match read_u8(&mut reader) {
                Ok(byte) => byte,
                Err(_) => break,
            };

            if prev == 0xFF && cur == 0xE1 {
                let len = read_u16(&mut reader, Endian::Big)? as usize;
                let mut sig = [0u8; 35];
                let got = read_at_most(&mut reader, &mut sig)?;

                if got >= 29 && sig[..29] == *XMP_SIGNATURE {
                    let region_len = len.checked_sub(31).ok_or_else(|| {
                        XmpError::BadValue("XMP APP1 segment too short".to_string())
                    })?;
                    reader.seek(SeekFrom::Current(29 - got as i64))?;
                    let mut region = vec![0u8; region_len];
                    reader.read_exact(&mut region)?;
                    if let Some(payload) = packet::strip_packet(&region) {
                        packets.push(packet_string(payload)?);
                    }
                } else if got == 35 && sig == *EXTENDED_XMP_SIGNATURE {
                    if packets.is_empty() {
                        log::warn!("extended XMP found with no standard XMP; extended ignored");
                        reader.seek(SeekFrom::Current(len as i64 - 2 - got as i64))?;
                    } else {
                        Self::read_extended_part(&mut reader, len, &packets, &mut extended)?;
                    }
                } else {
                    reader.seek(SeekFrom::Current(len as i64 - 2 - got as i64))?;
                }
            } else if prev == 0xFF && is_sof(cur) {
                // length and sample precision
                reader.seek(SeekFrom::Current(3))?;
                let h = read_u16(&mut reader, Endian::Big)? as u32;
                let w = read_u16(&mut reader, Endian::Big)? as u32;
                height = height.max(h);
                width = width.max(w);
            } else if prev == 0xFF && cur == 0xDC {
                reader.seek(SeekFrom::Current(2))?;
                let h = read_u16(&mut reader, Endian::Big)? as u32;
                height = height.max(h);
            }

            prev = cur;
        }

        if let Some(extended) = extended {
            packets.push(packet_string(&extended)?);
        }
        Ok(XmpData {
            dimensions: Some(Dimensions { width, height }),
            packets,
        })
    }

    /// Stream a reference JPEG to `writer` with a fresh XMP APP1 segment
    /// (and extended XMP parts, when `extended_xmp` is non-empty).
    ///
    /// The new segments are emitted at the first of: an existing standard
    /// XMP APP1 (discarded), a Photoshop 3.0 APP13 (emitted before it), or
    /// the first SOFn marker. Stale standard and extended XMP segments are
    /// dropped wherever they occur.
    pub fn write_xmp_ext<R: Read + Seek, W: Write + Seek>(
        mut reader: R,
        mut writer: W,
        xmp: &str,
        extended_xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        if read_u8(&mut reader)? != 0xFF || read_u8(&mut reader)? != 0xD8 {
            return Err(XmpError::BadValue("not a JPEG file".to_string()));
        }
        writer.write_all(&[0xFF, 0xD8])?;

        let mut wrote_xmp = xmp.is_empty();

        let mut prev = match read_u8(&mut reader) {
            Ok(byte) => byte,
            Err(_) => return Ok(()),
        };

        loop {
            let cur = match read_u8(&mut reader) {
                Ok(byte) => byte,
                Err(_) => {
                    write_u8(&mut writer, prev)?;
                    break;
                }
            };

            if prev == 0xFF && cur == 0xE1 {
                let len = read_u16(&mut reader, Endian::Big)? as usize;
                let mut sig = [0u8; 35];
                let got = read_at_most(&mut reader, &mut sig)?;

                if got >= 29 && sig[..29] == *XMP_SIGNATURE {
                    // drop the stale packet; the fresh one takes its place
                    reader.seek(SeekFrom::Current(len as i64 - 2 - got as i64))?;
                    if !wrote_xmp {
                        Self::write_xmp_segments(&mut writer, xmp, extended_xmp, options)?;
                        wrote_xmp = true;
                    }
                } else if got == 35 && sig == *EXTENDED_XMP_SIGNATURE {
                    reader.seek(SeekFrom::Current(len as i64 - 2 - got as i64))?;
                } else {
                    reader.seek(SeekFrom::Current(-(4 + got as i64)))?;
                    copy_bytes(&mut reader, &mut writer, len as u64 + 2)?;
                }
                prev = match read_u8(&mut reader) {
                    Ok(byte) => byte,
                    Err(_) => break,
                };
                continue;
            }

            if prev == 0xFF && cur == 0xED && !wrote_xmp {
                let len = read_u16(&mut reader, Endian::Big)? as usize;
                let mut sig = [0u8; 14];
                let got = read_at_most(&mut reader, &mut sig)?;
                if got == 14 && sig == *PHOTOSHOP_SIGNATURE {
                    Self::write_xmp_segments(&mut writer, xmp, extended_xmp, options)?;
                    wrote_xmp = true;
                }
                reader.seek(SeekFrom::Current(-(4 + got as i64)))?;
                copy_bytes(&mut reader, &mut writer, len as u64 + 2)?;
                prev = match read_u8(&mut reader) {
                    Ok(byte) => byte,
                    Err(_) => break,
                };
                continue;
            }

            if prev == 0xFF && is_sof(cur) && !wrote_xmp {
                Self::write_xmp_segments(&mut writer, xmp, extended_xmp, options)?;
                wrote_xmp = true;
            }

            write_u8(&mut writer, prev)?;
            prev = cur;
        }

        Ok(())
    }

    /// Collect one extended XMP part into the reassembly buffer
    fn read_extended_part<R: Read + Seek>(
        reader: &mut R,
        len: usize,
        packets: &[String],
        extended: &mut Option<Vec<u8>>,
    ) -> XmpResult<()> {
        let mut guid = [0u8; 32];
        reader.read_exact(&mut guid)?;
        let guid = String::from_utf8_lossy(&guid).into_owned();

        if !packets[0].contains(&guid) {
            log::warn!("extended XMP found with GUID not matching XMP; ignored");
            // what remains of the segment: total, offset and payload
            reader.seek(SeekFrom::Current(len as i64 - 2 - 35 - 32))?;
            return Ok(());
        }

        let total = read_u32(reader, Endian::Big)? as usize;
        let offset = read_u32(reader, Endian::Big)? as usize;
        let part_len = len.checked_sub(EXTENDED_HEADER_LEN).ok_or_else(|| {
            XmpError::BadValue("extended XMP APP1 segment too short".to_string())
        })?;

        let buffer = extended.get_or_insert_with(|| vec![0u8; total]);
        let end = offset.checked_add(part_len).filter(|&end| end <= buffer.len());
        let end = end.ok_or_else(|| {
            XmpError::BadValue("extended XMP part escapes its declared buffer".to_string())
        })?;
        reader.read_exact(&mut buffer[offset..end])?;
        Ok(())
    }

    /// Emit the standard XMP APP1 segment, then extended XMP parts when
    /// `extended_xmp` is non-empty
    fn write_xmp_segments<W: Write>(
        writer: &mut W,
        xmp: &str,
        extended_xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        let segment_len = packet::packet_len(xmp.len(), true, options.padding) + 31;
        if segment_len > u16::MAX as usize {
            return Err(XmpError::BadParam(
                "standard XMP packet does not fit one APP1 segment; carry the overflow as extended XMP"
                    .to_string(),
            ));
        }
        writer.write_all(&[0xFF, 0xE1])?;
        write_u16(writer, segment_len as u16, Endian::Big)?;
        writer.write_all(XMP_SIGNATURE)?;
        packet::write_packet(writer, xmp.as_bytes(), true, options.padding)?;

        if extended_xmp.is_empty() {
            return Ok(());
        }

        let guid = extended_xmp_guid(extended_xmp);
        let bytes = extended_xmp.as_bytes();
        let total = u32::try_from(bytes.len())
            .map_err(|_| XmpError::BadParam("extended XMP packet too large".to_string()))?;

        let mut offset = 0usize;
        while offset < bytes.len() {
            let part = (bytes.len() - offset).min(MAX_EXTENDED_PART);
            writer.write_all(&[0xFF, 0xE1])?;
            write_u16(writer, (part + EXTENDED_HEADER_LEN) as u16, Endian::Big)?;
            writer.write_all(EXTENDED_XMP_SIGNATURE)?;
            writer.write_all(guid.as_bytes())?;
            write_u32(writer, total, Endian::Big)?;
            write_u32(writer, offset as u32, Endian::Big)?;
            writer.write_all(&bytes[offset..offset + part])?;
            offset += part;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn app0_jfif() -> Vec<u8> {
        let mut seg = vec![0xFF, 0xE0];
        let payload = b"JFIF\0\x01\x02\x00\x00\x01\x00\x01\x00\x00";
        seg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        seg.extend_from_slice(payload);
        seg
    }

    fn sof0(width: u16, height: u16) -> Vec<u8> {
        let mut seg = vec![0xFF, 0xC0];
        let payload = {
            let mut p = vec![0x08]; // sample precision
            p.extend_from_slice(&height.to_be_bytes());
            p.extend_from_slice(&width.to_be_bytes());
            p.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]); // one component
            p
        };
        seg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        seg.extend_from_slice(&payload);
        seg
    }

    fn minimal_jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&app0_jfif());
        jpeg.extend_from_slice(&sof0(width, height));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_read_dimensions_no_xmp() {
        let data = JpegHandler::read_xmp(Cursor::new(minimal_jpeg(100, 200))).unwrap();
        let dims = data.dimensions.unwrap();
        assert_eq!((dims.width, dims.height), (100, 200));
        assert!(data.packets.is_empty());
    }

    #[test]
    fn test_invalid_jpeg() {
        assert!(JpegHandler::read_xmp(Cursor::new(vec![0x00, 0x01, 0x02])).is_err());
    }

    #[test]
    fn test_write_and_read_back() {
        let mut out = Cursor::new(Vec::new());
        JpegHandler::write_xmp_ext(
            Cursor::new(minimal_jpeg(100, 200)),
            &mut out,
            "<x/>",
            "",
            &WriteOptions::default(),
        )
        .unwrap();

        out.set_position(0);
        let data = JpegHandler::read_xmp(out).unwrap();
        assert_eq!(data.packets, vec!["<x/>".to_string()]);
        assert_eq!(data.dimensions.unwrap().width, 100);
    }

    #[test]
    fn test_segment_placement() {
        let mut out = Cursor::new(Vec::new());
        JpegHandler::write_xmp_ext(
            Cursor::new(minimal_jpeg(100, 200)),
            &mut out,
            "p",
            "",
            &WriteOptions::default(),
        )
        .unwrap();

        let bytes = out.into_inner();
        // SOI, then the original APP0 verbatim, then the fresh APP1
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let app0 = app0_jfif();
        assert_eq!(&bytes[2..2 + app0.len()], &app0[..]);
        let app1_at = 2 + app0.len();
        assert_eq!(&bytes[app1_at..app1_at + 2], &[0xFF, 0xE1]);
        assert_eq!(
            &bytes[app1_at + 4..app1_at + 4 + 29],
            &XMP_SIGNATURE[..]
        );
        // the SOF0 segment follows, and the file still ends with EOI
        let app1_len = u16::from_be_bytes([bytes[app1_at + 2], bytes[app1_at + 3]]) as usize;
        let sof_at = app1_at + 2 + app1_len;
        assert_eq!(&bytes[sof_at..sof_at + 2], &[0xFF, 0xC0]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_rewrite_replaces_existing() {
        let mut first = Cursor::new(Vec::new());
        JpegHandler::write_xmp_ext(
            Cursor::new(minimal_jpeg(8, 8)),
            &mut first,
            "<old/>",
            "",
            &WriteOptions::default(),
        )
        .unwrap();

        first.set_position(0);
        let mut second = Cursor::new(Vec::new());
        JpegHandler::write_xmp_ext(
            &mut first,
            &mut second,
            "<new/>",
            "",
            &WriteOptions::default(),
        )
        .unwrap();

        let sig_count = second
            .get_ref()
            .windows(XMP_SIGNATURE.len())
            .filter(|w| *w == XMP_SIGNATURE)
            .count();
        assert_eq!(sig_count, 1);

        second.set_position(0);
        let data = JpegHandler::read_xmp(second).unwrap();
        assert_eq!(data.packets, vec!["<new/>".to_string()]);
    }

    #[test]
    fn test_extended_xmp_round_trip() {
        let extended: String = "<long>".chars().cycle().take(100_000).collect();
        let xmp = format!(
            "<x:xmpmeta xmpNote:HasExtendedXMP=\"{}\"/>",
            extended_xmp_guid(&extended)
        );

        let mut out = Cursor::new(Vec::new());
        JpegHandler::write_xmp_ext(
            Cursor::new(minimal_jpeg(16, 16)),
            &mut out,
            &xmp,
            &extended,
            &WriteOptions::default(),
        )
        .unwrap();

        // ceil(100000 / 65400) = 2 extension segments
        let ext_count = out
            .get_ref()
            .windows(EXTENDED_XMP_SIGNATURE.len())
            .filter(|w| *w == EXTENDED_XMP_SIGNATURE)
            .count();
        assert_eq!(ext_count, 2);

        out.set_position(0);
        let data = JpegHandler::read_xmp(out).unwrap();
        assert_eq!(data.packets.len(), 2);
        assert_eq!(data.packets[0], xmp);
        assert_eq!(data.packets[1], extended);
    }

    #[test]
    fn test_extended_without_standard_is_ignored() {
        // hand-built extension segment with no standard packet before it
        let mut jpeg = vec![0xFF, 0xD8];
        let part = b"orphan";
        let mut seg = vec![0xFF, 0xE1];
        seg.extend_from_slice(&((part.len() + EXTENDED_HEADER_LEN) as u16).to_be_bytes());
        seg.extend_from_slice(EXTENDED_XMP_SIGNATURE);
        seg.extend_from_slice("0".repeat(32).as_bytes());
        seg.extend_from_slice(&(part.len() as u32).to_be_bytes());
        seg.extend_from_slice(&0u32.to_be_bytes());
        seg.extend_from_slice(part);
        jpeg.extend_from_slice(&seg);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let data = JpegHandler::read_xmp(Cursor::new(jpeg)).unwrap();
        assert!(data.packets.is_empty());
    }

    #[test]
    fn test_can_handle() {
        let handler = JpegHandler;
        let mut reader = Cursor::new(minimal_jpeg(1, 1));
        assert!(handler.can_handle(&mut reader).unwrap());
        assert_eq!(reader.position(), 0);
        let mut reader = Cursor::new(b"RIFF....WEBP".to_vec());
        assert!(!handler.can_handle(&mut reader).unwrap());
    }
}
