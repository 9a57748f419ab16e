//! PNG file format handler
//!
//! PNG XMP Storage:
//! - XMP lives in an `iTXt` chunk whose data begins with the 22-byte prefix
//!   `XML:com.adobe.xmp` + keyword terminator + compression flag 0 +
//!   compression method 0 + empty language tag + empty translated keyword
//! - Every chunk carries a CRC-32 over its type and data; the reader
//!   verifies the IHDR checksum and the writer emits a correct one for the
//!   inserted chunk

use crate::crc32::Crc32;
use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{FileHandler, WriteOptions, XmpData};
use crate::io::{copy_bytes, read_u32, write_u32, Endian};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

/// PNG file signature
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// XMP keyword prefix in an iTXt chunk (22 bytes)
const XMP_KEYWORD: &[u8; 22] = b"XML:com.adobe.xmp\0\0\0\0\0";

/// PNG file handler for XMP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct PngHandler;

impl FileHandler for PngHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let mut signature = [0u8; 8];
        let ok = reader.read_exact(&mut signature).is_ok() && signature == PNG_SIGNATURE;
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
        "PNG"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png"]
    }
}

impl PngHandler {
    /// Read XMP packets and the IHDR dimensions from a PNG file.
    ///
    /// The IHDR chunk must come first, be 13 bytes long, and carry a valid
    /// CRC.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        let mut signature = [0u8; 8];
        reader.read_exact(&mut signature)?;
        if signature != PNG_SIGNATURE {
            return Err(XmpError::BadValue("not a PNG file".to_string()));
        }

        if read_u32(&mut reader, Endian::Big)? != 13 {
            return Err(XmpError::BadValue("IHDR must be the first chunk".to_string()));
        }
        let mut crc = Crc32::new();
        let mut kind = [0u8; 4];
        reader.read_exact(&mut kind)?;
        crc.update(&kind);
        if kind != *b"IHDR" {
            return Err(XmpError::BadValue("IHDR must be the first chunk".to_string()));
        }
        let width = read_u32(&mut reader, Endian::Big)?;
        crc.update_u32(width);
        let height = read_u32(&mut reader, Endian::Big)?;
        crc.update_u32(height);
        let mut rest = [0u8; 5];
        reader.read_exact(&mut rest)?;
        crc.update(&rest);
        if read_u32(&mut reader, Endian::Big)? != crc.finish() {
            return Err(XmpError::BadValue("IHDR checksum mismatch".to_string()));
        }

        let mut data = XmpData::with_dimensions(width, height);

        loop {
            let length = match read_u32(&mut reader, Endian::Big) {
                Ok(length) => length as u64,
                Err(_) => break,
            };
            if length > 0x7FFF_FFFF {
                return Err(XmpError::BadValue("chunk length out of range".to_string()));
            }
            let mut kind = [0u8; 4];
            reader.read_exact(&mut kind)?;

            if kind == *b"iTXt" && length > 22 {
                let mut keyword = [0u8; 22];
                reader.read_exact(&mut keyword)?;
                if keyword == *XMP_KEYWORD {
                    let mut region = vec![0u8; (length - 22) as usize];
                    reader.read_exact(&mut region)?;
                    if let Some(payload) = packet::strip_packet(&region) {
                        data.packets.push(packet_string(payload)?);
                    }
                } else {
                    reader.seek(SeekFrom::Current(length as i64 - 22))?;
                }
            } else {
                reader.seek(SeekFrom::Current(length as i64))?;
            }
            // chunk CRC; only the IHDR checksum is verified
            read_u32(&mut reader, Endian::Big)?;
        }

        Ok(data)
    }

    /// Stream a reference PNG to `writer` with a fresh XMP iTXt chunk.
    ///
    /// The new chunk goes immediately after IHDR; any pre-existing XMP iTXt
    /// is elided. Other chunks are copied verbatim in their original order.
    /// An empty `xmp` skips the insertion, making the output byte-identical
    /// for a reference without XMP.
    pub fn write_xmp<R: Read + Seek, W: Write + Seek>(
        mut reader: R,
        mut writer: W,
        xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        // signature plus the complete 25-byte IHDR chunk
        let mut head = [0u8; 33];
        reader.read_exact(&mut head)?;
        if head[..8] != PNG_SIGNATURE {
            return Err(XmpError::BadValue("not a PNG file".to_string()));
        }
        writer.write_all(&head)?;

        if !xmp.is_empty() {
            let wrapped = packet::wrap_packet(xmp.as_bytes(), true, options.padding);
            write_u32(&mut writer, (22 + wrapped.len()) as u32, Endian::Big)?;
            let mut crc = Crc32::new();
            writer.write_all(b"iTXt")?;
            crc.update(b"iTXt");
            writer.write_all(XMP_KEYWORD)?;
            crc.update(XMP_KEYWORD);
            writer.write_all(&wrapped)?;
            crc.update(&wrapped);
            write_u32(&mut writer, crc.finish(), Endian::Big)?;
        }

        loop {
            let length = match read_u32(&mut reader, Endian::Big) {
                Ok(length) => length as u64,
                Err(_) => break,
            };
            if length > 0x7FFF_FFFF {
                return Err(XmpError::BadValue("chunk length out of range".to_string()));
            }
            let mut kind = [0u8; 4];
            reader.read_exact(&mut kind)?;

            if kind == *b"iTXt" && length > 22 {
                let mut keyword = [0u8; 22];
                reader.read_exact(&mut keyword)?;
                if keyword == *XMP_KEYWORD {
                    // rest of the stale chunk data plus its CRC
                    reader.seek(SeekFrom::Current(length as i64 - 18))?;
                } else {
                    reader.seek(SeekFrom::Current(-30))?;
                    copy_bytes(&mut reader, &mut writer, 12 + length)?;
                }
            } else {
                reader.seek(SeekFrom::Current(-8))?;
                copy_bytes(&mut reader, &mut writer, 12 + length)?;
            }
        }

        Ok(())
    }
}
