//! WebP file format handler
//!
//! WebP uses the RIFF container with form type "WEBP". Chunks are a FourCC,
//! a little-endian u32 length, the data, and a pad byte when the length is
//! odd. The first chunk is `VP8 ` (simple lossy), `VP8L` (lossless) or
//! `VP8X` (extended). Only extended files can carry metadata, so writing
//! XMP into a simple file promotes it: a synthetic `VP8X` header chunk goes
//! in front and the original bitstream chunk is copied verbatim after it.
//!
//! XMP lives in an `XMP ` chunk (note the trailing space); its presence is
//! flagged by bit 2 (0x04) of the VP8X flags byte.

use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{FileHandler, WriteOptions, XmpData};
use crate::io::{
    copy_bytes, read_at_most, read_u8, read_u16, read_u24, read_u32, write_u8, write_u24,
    write_u32, Endian,
};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

const XMP_CHUNK: [u8; 4] = *b"XMP ";
const VP8_CHUNK: [u8; 4] = *b"VP8 ";
const VP8L_CHUNK: [u8; 4] = *b"VP8L";
const VP8X_CHUNK: [u8; 4] = *b"VP8X";

/// VP8X flag bits
const VP8X_XMP_FLAG: u8 = 0x04;
const VP8X_ALPHA_FLAG: u8 = 0x10;

/// Tag byte opening a VP8L bitstream
const VP8L_TAG: u8 = 0x2F;

/// WebP file handler for XMP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpHandler;

impl FileHandler for WebpHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let mut header = [0u8; 12];
        let ok = reader.read_exact(&mut header).is_ok()
            && &header[..4] == b"RIFF"
            && &header[8..] == b"WEBP";
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
        "WebP"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["webp"]
    }
}

impl WebpHandler {
    /// Read XMP packets and canvas dimensions from a WebP file.
    ///
    /// Simple lossy and lossless files expose dimensions only; the chunk
    /// scan for `XMP ` runs on extended (VP8X) files.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut four = [0u8; 4];
        reader.read_exact(&mut four)?;
        if four != *b"RIFF" {
            return Err(XmpError::BadValue("not a RIFF file".to_string()));
        }
        if read_u32(&mut reader, Endian::Little)? as u64 != file_size - 8 {
            return Err(XmpError::BadValue(
                "RIFF length disagrees with file size".to_string(),
            ));
        }
        reader.read_exact(&mut four)?;
        if four != *b"WEBP" {
            return Err(XmpError::BadValue("not a WebP file".to_string()));
        }

        reader.read_exact(&mut four)?;
        let length = read_u32(&mut reader, Endian::Little)? as u64;

        let mut data = match four {
            VP8_CHUNK => {
                reader.seek(SeekFrom::Current(6))?;
                let width = read_u16(&mut reader, Endian::Little)? as u32;
                let height = read_u16(&mut reader, Endian::Little)? as u32;
                return Ok(XmpData::with_dimensions(width, height));
            }
            VP8L_CHUNK => {
                if read_u8(&mut reader)? != VP8L_TAG {
                    return Err(XmpError::BadValue("bad VP8L bitstream tag".to_string()));
                }
                let packed = read_u32(&mut reader, Endian::Little)?;
                let width = 1 + (packed & 0x3FFF);
                let height = 1 + ((packed >> 14) & 0x3FFF);
                return Ok(XmpData::with_dimensions(width, height));
            }
            VP8X_CHUNK => {
                // flags byte and three reserved bytes
                reader.seek(SeekFrom::Current(4))?;
                let width = 1 + read_u24(&mut reader, Endian::Little)?;
                let height = 1 + read_u24(&mut reader, Endian::Little)?;
                reader.seek(SeekFrom::Current(length as i64 - 10 + (length & 1) as i64))?;
                XmpData::with_dimensions(width, height)
            }
            _ => return Err(XmpError::BadValue("unknown leading WebP chunk".to_string())),
        };

        loop {
            let mut fourcc = [0u8; 4];
            if read_at_most(&mut reader, &mut fourcc)? != 4 {
                break;
            }
            let length = read_u32(&mut reader, Endian::Little)? as u64;
            if fourcc == XMP_CHUNK {
                let mut region = vec![0u8; length as usize];
                reader.read_exact(&mut region)?;
                if let Some(payload) = packet::strip_packet(&region) {
                    data.packets.push(packet_string(payload)?);
                }
            } else {
                reader.seek(SeekFrom::Current(length as i64))?;
            }
            if length & 1 == 1 {
                reader.seek(SeekFrom::Current(1))?;
            }
        }

        Ok(data)
    }

    /// Stream a reference WebP to `writer` with a fresh `XMP ` chunk.
    ///
    /// Simple (`VP8 `/`VP8L`) references are promoted to VP8X; an existing
    /// VP8X chunk gets the XMP flag OR-ed in and any stale `XMP ` chunk is
    /// dropped. The new chunk is appended last and the outer RIFF length is
    /// patched in place. An empty `xmp` skips promotion and appending, and
    /// instead strips any XMP chunk and clears the flag bit.
    pub fn write_xmp<R: Read + Seek, W: Write + Seek>(
        mut reader: R,
        mut writer: W,
        xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        let mut header = [0u8; 12];
        reader.read_exact(&mut header)?;
        if &header[..4] != b"RIFF" || &header[8..] != b"WEBP" {
            return Err(XmpError::BadValue("not a WebP file".to_string()));
        }
        writer.write_all(&header)?;

        let inject = !xmp.is_empty();

        let mut fourcc = [0u8; 4];
        reader.read_exact(&mut fourcc)?;
        let length = read_u32(&mut reader, Endian::Little)? as u64;

        match fourcc {
            VP8_CHUNK => {
                reader.seek(SeekFrom::Current(6))?;
                let width = read_u16(&mut reader, Endian::Little)? as u32;
                let height = read_u16(&mut reader, Endian::Little)? as u32;
                if inject {
                    Self::write_vp8x_header(&mut writer, VP8X_XMP_FLAG, width, height)?;
                }
                reader.seek(SeekFrom::Start(12))?;
                copy_bytes(&mut reader, &mut writer, 8 + length + (length & 1))?;
            }
            VP8L_CHUNK => {
                if read_u8(&mut reader)? != VP8L_TAG {
                    return Err(XmpError::BadValue("bad VP8L bitstream tag".to_string()));
                }
                let packed = read_u32(&mut reader, Endian::Little)?;
                let width = 1 + (packed & 0x3FFF);
                let height = 1 + ((packed >> 14) & 0x3FFF);
                let alpha = (packed >> 28) & 1 != 0;
                if inject {
                    let flags = VP8X_XMP_FLAG | if alpha { VP8X_ALPHA_FLAG } else { 0 };
                    Self::write_vp8x_header(&mut writer, flags, width, height)?;
                }
                reader.seek(SeekFrom::Start(12))?;
                copy_bytes(&mut reader, &mut writer, 8 + length + (length & 1))?;
            }
            VP8X_CHUNK => {
                if length < 10 {
                    return Err(XmpError::BadValue("VP8X chunk too short".to_string()));
                }
                writer.write_all(&fourcc)?;
                write_u32(&mut writer, length as u32, Endian::Little)?;
                let flags = read_u8(&mut reader)?;
                let flags = if inject {
                    flags | VP8X_XMP_FLAG
                } else {
                    flags & !VP8X_XMP_FLAG
                };
                write_u8(&mut writer, flags)?;
                copy_bytes(&mut reader, &mut writer, length - 1 + (length & 1))?;

                loop {
                    let mut chunk = [0u8; 4];
                    if read_at_most(&mut reader, &mut chunk)? != 4 {
                        break;
                    }
                    let chunk_len = read_u32(&mut reader, Endian::Little)? as u64;
                    if chunk == XMP_CHUNK {
                        reader.seek(SeekFrom::Current((chunk_len + (chunk_len & 1)) as i64))?;
                    } else {
                        reader.seek(SeekFrom::Current(-8))?;
                        copy_bytes(&mut reader, &mut writer, 8 + chunk_len + (chunk_len & 1))?;
                    }
                }
            }
            _ => return Err(XmpError::BadValue("unknown leading WebP chunk".to_string())),
        }

        if inject {
            writer.write_all(&XMP_CHUNK)?;
            let packet_len = packet::packet_len(xmp.len(), true, options.padding);
            write_u32(&mut writer, packet_len as u32, Endian::Little)?;
            packet::write_packet(&mut writer, xmp.as_bytes(), true, options.padding)?;
            if packet_len & 1 == 1 {
                write_u8(&mut writer, 0)?;
            }
        }

        // patch the outer RIFF length now that the total is known
        let final_size = writer.stream_position()?;
        writer.seek(SeekFrom::Start(4))?;
        write_u32(&mut writer, (final_size - 8) as u32, Endian::Little)?;
        Ok(())
    }

    /// Emit a synthetic 10-byte VP8X header chunk
    fn write_vp8x_header<W: Write>(
        writer: &mut W,
        flags: u8,
        width: u32,
        height: u32,
    ) -> XmpResult<()> {
        writer.write_all(&VP8X_CHUNK)?;
        write_u32(writer, 10, Endian::Little)?;
        write_u8(writer, flags)?;
        write_u24(writer, 0, Endian::Little)?;
        write_u24(writer, width.saturating_sub(1), Endian::Little)?;
        write_u24(writer, height.saturating_sub(1), Endian::Little)?;
        Ok(())
    }
}
