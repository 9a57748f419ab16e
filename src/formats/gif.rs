//! GIF file format handler
//!
//! GIF XMP Storage:
//! - XMP lives in an Application Extension block with identifier "XMP DataXMP"
//! - The packet is written unchunked, followed by a 258-byte "magic" trailer
//!   that doubles as a valid sub-block chain: `0x01`, then 256 bytes counting
//!   down from 0xFF, then the `0x00` block terminator. Decoders that honor
//!   sub-block framing step harmlessly through the packet; the trailer's
//!   descending run guarantees they resynchronize before the terminator.
//! - Only GIF89a supports extension blocks; writes promote 87a references

use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{FileHandler, WriteOptions, XmpData};
use crate::io::{copy_bytes, read_u8, read_u16, write_u8, Endian};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

const GIF_SIGNATURE_87A: &[u8; 6] = b"GIF87a";
const GIF_SIGNATURE_89A: &[u8; 6] = b"GIF89a";

const IMAGE_SEPARATOR: u8 = 0x2C;
const EXTENSION_INTRODUCER: u8 = 0x21;
const GIF_TRAILER: u8 = 0x3B;
const APPLICATION_EXTENSION_LABEL: u8 = 0xFF;

/// XMP Application Extension identifier (11 bytes, no terminator)
const XMP_APP_IDENTIFIER: &[u8; 11] = b"XMP DataXMP";

/// GIF file handler for XMP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct GifHandler;

impl FileHandler for GifHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let mut header = [0u8; 6];
        let ok = reader.read_exact(&mut header).is_ok()
            && (header == *GIF_SIGNATURE_87A || header == *GIF_SIGNATURE_89A);
        reader.seek(SeekFrom::Start(pos))?;
        Ok(ok)
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
        Self::write_xmp(reader, writer, xmp, options)
    }

    fn format_name(&self) -> &'static str {
        "GIF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gif"]
    }
}

/// Byte length of a color table described by a packed flags byte, zero when
/// the table-present bit is clear. The low three bits encode the table size
/// as 2^(n+1) three-byte entries.
fn color_table_len(flags: u8) -> u64 {
    if flags & 0x80 != 0 {
        6 << (flags & 0x07)
    } else {
        0
    }
}

impl GifHandler {
    /// Read XMP packets and the logical screen dimensions from a GIF file.
    ///
    /// 87a files expose dimensions but cannot carry extension blocks, so
    /// they never have XMP.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        let mut signature = [0u8; 6];
        reader.read_exact(&mut signature)?;
        let has_extensions = match &signature {
            b"GIF89a" => true,
            b"GIF87a" => false,
            _ => return Err(XmpError::BadValue("not a GIF file".to_string())),
        };

        let width = read_u16(&mut reader, Endian::Little)? as u32;
        let height = read_u16(&mut reader, Endian::Little)? as u32;
        let mut data = XmpData::with_dimensions(width, height);
        if !has_extensions {
            return Ok(data);
        }

        let flags = read_u8(&mut reader)?;
        // background color index + pixel aspect ratio
        reader.seek(SeekFrom::Current(2))?;
        reader.seek(SeekFrom::Current(color_table_len(flags) as i64))?;

        loop {
            let intro = read_u8(&mut reader)?;
            match intro {
                GIF_TRAILER => return Ok(data),
                IMAGE_SEPARATOR => Self::skip_image(&mut reader)?,
                EXTENSION_INTRODUCER => {
                    let label = read_u8(&mut reader)?;
                    if label == APPLICATION_EXTENSION_LABEL {
                        if read_u8(&mut reader)? != 11 {
                            return Err(XmpError::BadValue(
                                "application extension identifier must be 11 bytes".to_string(),
                            ));
                        }
                        let mut app_id = [0u8; 11];
                        reader.read_exact(&mut app_id)?;
                        if app_id == *XMP_APP_IDENTIFIER {
                            let region = Self::read_until_sentinel(&mut reader)?;
                            if let Some(payload) = packet::strip_packet(&region) {
                                data.packets.push(packet_string(payload)?);
                            }
                            Self::check_magic_trailer(&mut reader)?;
                        } else {
                            Self::skip_sub_blocks(&mut reader)?;
                        }
                    } else {
                        Self::skip_sub_blocks(&mut reader)?;
                    }
                }
                other => {
                    return Err(XmpError::BadValue(format!(
                        "invalid GIF block introducer 0x{:02X}",
                        other
                    )))
                }
            }
        }
    }

    /// Stream a reference GIF to `writer` with exactly one XMP application
    /// extension carrying `xmp`.
    ///
    /// An existing XMP extension is discarded and the new one emitted in its
    /// place; otherwise the new extension goes just before the trailer. The
    /// output is always GIF89a, since extensions require it.
    pub fn write_xmp<R: Read + Seek, W: Write + Seek>(
        mut reader: R,
        mut writer: W,
        xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        let mut signature = [0u8; 6];
        reader.read_exact(&mut signature)?;
        if signature != *GIF_SIGNATURE_87A && signature != *GIF_SIGNATURE_89A {
            return Err(XmpError::BadValue("not a GIF file".to_string()));
        }
        writer.write_all(GIF_SIGNATURE_89A)?;

        let mut wrote_xmp = xmp.is_empty();

        // logical screen descriptor, plus the global color table if present
        copy_bytes(&mut reader, &mut writer, 4)?;
        let flags = read_u8(&mut reader)?;
        write_u8(&mut writer, flags)?;
        copy_bytes(&mut reader, &mut writer, 2 + color_table_len(flags))?;

        loop {
            let intro = read_u8(&mut reader)?;
            match intro {
                GIF_TRAILER => {
                    if !wrote_xmp {
                        Self::write_xmp_extension(&mut writer, xmp, options.padding)?;
                    }
                    write_u8(&mut writer, GIF_TRAILER)?;
                    return Ok(());
                }
                IMAGE_SEPARATOR => {
                    write_u8(&mut writer, intro)?;
                    copy_bytes(&mut reader, &mut writer, 8)?;
                    let local_flags = read_u8(&mut reader)?;
                    write_u8(&mut writer, local_flags)?;
                    // LZW minimum code size byte follows the local color table
                    copy_bytes(&mut reader, &mut writer, color_table_len(local_flags) + 1)?;
                    Self::copy_sub_blocks(&mut reader, &mut writer)?;
                }
                EXTENSION_INTRODUCER => {
                    let label = read_u8(&mut reader)?;
                    if label == APPLICATION_EXTENSION_LABEL {
                        if read_u8(&mut reader)? != 11 {
                            return Err(XmpError::BadValue(
                                "application extension identifier must be 11 bytes".to_string(),
                            ));
                        }
                        let mut app_id = [0u8; 11];
                        reader.read_exact(&mut app_id)?;
                        if app_id == *XMP_APP_IDENTIFIER {
                            // discard the stale packet and its magic trailer
                            Self::read_until_sentinel(&mut reader)?;
                            Self::check_magic_trailer(&mut reader)?;
                            if !wrote_xmp {
                                Self::write_xmp_extension(&mut writer, xmp, options.padding)?;
                                wrote_xmp = true;
                            }
                        } else {
                            writer.write_all(&[
                                EXTENSION_INTRODUCER,
                                APPLICATION_EXTENSION_LABEL,
                                11,
                            ])?;
                            writer.write_all(&app_id)?;
                            Self::copy_sub_blocks(&mut reader, &mut writer)?;
                        }
                    } else {
                        writer.write_all(&[EXTENSION_INTRODUCER, label])?;
                        Self::copy_sub_blocks(&mut reader, &mut writer)?;
                    }
                }
                other => {
                    return Err(XmpError::BadValue(format!(
                        "invalid GIF block introducer 0x{:02X}",
                        other
                    )))
                }
            }
        }
    }

    /// Skip an image descriptor, its optional local color table, and the
    /// LZW-compressed data sub-blocks
    fn skip_image<R: Read + Seek>(reader: &mut R) -> XmpResult<()> {
        reader.seek(SeekFrom::Current(8))?;
        let local_flags = read_u8(reader)?;
        reader.seek(SeekFrom::Current(color_table_len(local_flags) as i64 + 1))?;
        Self::skip_sub_blocks(reader)
    }

    /// Skip a length-prefixed sub-block chain up to its zero terminator
    fn skip_sub_blocks<R: Read + Seek>(reader: &mut R) -> XmpResult<()> {
        loop {
            let len = read_u8(reader)?;
            if len == 0 {
                return Ok(());
            }
            reader.seek(SeekFrom::Current(len as i64))?;
        }
    }

    /// Copy a length-prefixed sub-block chain including its zero terminator
    fn copy_sub_blocks<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> XmpResult<()> {
        loop {
            let len = read_u8(reader)?;
            write_u8(writer, len)?;
            if len == 0 {
                return Ok(());
            }
            copy_bytes(reader, writer, len as u64)?;
        }
    }

    /// Collect bytes up to (not including) the 0x01 sentinel that opens the
    /// magic trailer; the sentinel itself is consumed
    fn read_until_sentinel<R: Read>(reader: &mut R) -> XmpResult<Vec<u8>> {
        let mut region = Vec::new();
        loop {
            let byte = read_u8(reader)?;
            if byte == 0x01 {
                return Ok(region);
            }
            region.push(byte);
        }
    }

    /// Consume and validate the 257 trailer bytes that follow the 0x01
    /// sentinel: 256 bytes counting down from 0xFF, then a zero terminator
    fn check_magic_trailer<R: Read>(reader: &mut R) -> XmpResult<()> {
        let mut trailer = [0u8; 257];
        reader.read_exact(&mut trailer)?;
        for (i, &byte) in trailer[..256].iter().enumerate() {
            if byte != 0xFF - i as u8 {
                return Err(XmpError::BadValue(
                    "corrupt magic trailer in XMP application extension".to_string(),
                ));
            }
        }
        if trailer[256] != 0 {
            return Err(XmpError::BadValue(
                "XMP application extension not terminated".to_string(),
            ));
        }
        Ok(())
    }

    /// Emit a complete XMP application extension: introducer, label,
    /// identifier, wrapped packet, magic trailer
    fn write_xmp_extension<W: Write>(writer: &mut W, xmp: &str, pad: usize) -> XmpResult<()> {
        writer.write_all(&[EXTENSION_INTRODUCER, APPLICATION_EXTENSION_LABEL, 11])?;
        writer.write_all(XMP_APP_IDENTIFIER)?;
        packet::write_packet(writer, xmp.as_bytes(), true, pad)?;

        let mut trailer = [0u8; 258];
        trailer[0] = 0x01;
        for i in 0..256 {
            trailer[1 + i] = 0xFF - i as u8;
        }
        writer.write_all(&trailer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // 1x1 GIF89a with an empty global color table flag and one image block
    fn minimal_gif(signature: &[u8; 6]) -> Vec<u8> {
        let mut gif = Vec::new();
        gif.extend_from_slice(signature);
        gif.extend_from_slice(&[0x01, 0x00, 0x01, 0x00]); // 1x1 logical screen
        gif.extend_from_slice(&[0x00, 0x00, 0x00]); // flags, background, aspect
        gif.push(IMAGE_SEPARATOR);
        gif.extend_from_slice(&[0x00; 8]); // left, top, width, height
        gif.push(0x00); // no local color table
        gif.push(0x02); // LZW minimum code size
        gif.extend_from_slice(&[0x01, 0x44]); // one data sub-block
        gif.push(0x00); // sub-block terminator
        gif.push(GIF_TRAILER);
        gif
    }

    #[test]
    fn test_read_dimensions_no_xmp() {
        let data = GifHandler::read_xmp(Cursor::new(minimal_gif(GIF_SIGNATURE_89A))).unwrap();
        let dims = data.dimensions.unwrap();
        assert_eq!((dims.width, dims.height), (1, 1));
        assert!(data.packets.is_empty());
    }

    #[test]
    fn test_read_gif87a() {
        let data = GifHandler::read_xmp(Cursor::new(minimal_gif(GIF_SIGNATURE_87A))).unwrap();
        assert_eq!(data.dimensions.unwrap().width, 1);
        assert!(data.packets.is_empty());
    }

    #[test]
    fn test_invalid_signature() {
        let result = GifHandler::read_xmp(Cursor::new(b"NOTGIF".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn test_write_and_read_back() {
        let mut out = Cursor::new(Vec::new());
        GifHandler::write_xmp(
            Cursor::new(minimal_gif(GIF_SIGNATURE_89A)),
            &mut out,
            "<x/>",
            &WriteOptions::default(),
        )
        .unwrap();

        out.set_position(0);
        let data = GifHandler::read_xmp(out).unwrap();
        assert_eq!(data.packets, vec!["<x/>".to_string()]);
        assert_eq!(data.dimensions.unwrap().width, 1);
    }

    #[test]
    fn test_write_promotes_87a() {
        let mut out = Cursor::new(Vec::new());
        GifHandler::write_xmp(
            Cursor::new(minimal_gif(GIF_SIGNATURE_87A)),
            &mut out,
            "<x/>",
            &WriteOptions::default(),
        )
        .unwrap();
        assert!(out.get_ref().starts_with(GIF_SIGNATURE_89A));
    }

    #[test]
    fn test_magic_trailer_layout() {
        let mut out = Cursor::new(Vec::new());
        let pad = 300;
        GifHandler::write_xmp(
            Cursor::new(minimal_gif(GIF_SIGNATURE_89A)),
            &mut out,
            "<x/>",
            &WriteOptions::default().padding(pad),
        )
        .unwrap();

        let bytes = out.into_inner();
        let id_at = bytes
            .windows(XMP_APP_IDENTIFIER.len())
            .position(|w| w == XMP_APP_IDENTIFIER)
            .unwrap();
        let trailer_at = id_at + 11 + packet::packet_len(4, true, pad);
        let trailer = &bytes[trailer_at..trailer_at + 258];
        assert_eq!(trailer[0], 0x01);
        for i in 0..256 {
            assert_eq!(trailer[1 + i], 0xFF - i as u8);
        }
        assert_eq!(trailer[257], 0x00);
    }

    #[test]
    fn test_rewrite_replaces_existing() {
        let mut first = Cursor::new(Vec::new());
        GifHandler::write_xmp(
            Cursor::new(minimal_gif(GIF_SIGNATURE_89A)),
            &mut first,
            "<old/>",
            &WriteOptions::default(),
        )
        .unwrap();

        first.set_position(0);
        let mut second = Cursor::new(Vec::new());
        GifHandler::write_xmp(&mut first, &mut second, "<new/>", &WriteOptions::default())
            .unwrap();

        let bytes = second.get_ref().clone();
        let occurrences = bytes
            .windows(XMP_APP_IDENTIFIER.len())
            .filter(|w| *w == XMP_APP_IDENTIFIER)
            .count();
        assert_eq!(occurrences, 1);

        second.set_position(0);
        let data = GifHandler::read_xmp(second).unwrap();
        assert_eq!(data.packets, vec!["<new/>".to_string()]);
    }

    #[test]
    fn test_empty_xmp_strips_existing() {
        let mut first = Cursor::new(Vec::new());
        GifHandler::write_xmp(
            Cursor::new(minimal_gif(GIF_SIGNATURE_89A)),
            &mut first,
            "<old/>",
            &WriteOptions::default(),
        )
        .unwrap();

        first.set_position(0);
        let mut second = Cursor::new(Vec::new());
        GifHandler::write_xmp(&mut first, &mut second, "", &WriteOptions::default()).unwrap();

        second.set_position(0);
        let data = GifHandler::read_xmp(second).unwrap();
        assert!(data.packets.is_empty());
    }

    #[test]
    fn test_other_extension_copied_intact() {
        // NETSCAPE2.0 looping extension ahead of the image block
        let mut gif = Vec::new();
        gif.extend_from_slice(GIF_SIGNATURE_89A);
        gif.extend_from_slice(&[0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
        gif.extend_from_slice(&[EXTENSION_INTRODUCER, APPLICATION_EXTENSION_LABEL, 11]);
        gif.extend_from_slice(b"NETSCAPE2.0");
        gif.extend_from_slice(&[0x03, 0x01, 0x00, 0x00, 0x00]); // sub-block + terminator
        gif.push(GIF_TRAILER);

        let mut out = Cursor::new(Vec::new());
        GifHandler::write_xmp(
            Cursor::new(gif),
            &mut out,
            "<x/>",
            &WriteOptions::default(),
        )
        .unwrap();

        let bytes = out.get_ref();
        assert!(bytes
            .windows(11)
            .any(|w| w == b"NETSCAPE2.0"));
        let netscape_at = bytes.windows(11).position(|w| w == b"NETSCAPE2.0").unwrap();
        // introducer, label, and size byte precede the identifier
        assert_eq!(&bytes[netscape_at - 3..netscape_at], &[0x21, 0xFF, 11]);
    }

    #[test]
    fn test_can_handle() {
        let handler = GifHandler;
        let mut reader = Cursor::new(minimal_gif(GIF_SIGNATURE_89A));
        assert!(handler.can_handle(&mut reader).unwrap());
        assert_eq!(reader.position(), 0);

        let mut reader = Cursor::new(b"PNG data".to_vec());
        assert!(!handler.can_handle(&mut reader).unwrap());
    }
}
