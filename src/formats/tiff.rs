//! TIFF file format handler (read only)
//!
//! TIFF XMP Storage:
//! - XMP is tag 700 in an IFD, type BYTE (1) or UNDEFINED (7); payloads
//!   larger than four bytes live at the entry's value offset
//! - Tags 256 and 257 carry width and height, as SHORT (with byte-lane
//!   extraction depending on the file's byte order) or LONG
//!
//! There is no TIFF writer: rewriting an IFD chain safely is out of scope.

use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{Dimensions, FileHandler, WriteOptions, XmpData};
use crate::io::{read_u16, read_u32, Endian};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

/// XMP packet tag
const TAG_XMP: u16 = 700;
/// Image dimension tags
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_HEIGHT: u16 = 257;

/// Byte length of each TIFF value type, indexed by type code 1..=12
const TYPE_SIZES: [u32; 13] = [0, 1, 1, 2, 4, 8, 1, 1, 2, 4, 8, 4, 8];

/// TIFF file handler for XMP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffHandler;

impl FileHandler for TiffHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let mut header = [0u8; 4];
        let ok = reader.read_exact(&mut header).is_ok()
            && (header == [0x49, 0x49, 0x2A, 0x00] || header == [0x4D, 0x4D, 0x00, 0x2A]);
        reader.seek(SeekFrom::Start(pos))?;
        Ok(ok)
    }

    fn read_xmp<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<XmpData> {
        Self::read_xmp(reader)
    }

    fn write_xmp<R: Read + Seek, W: Write + Seek>(
        &self,
        _reader: &mut R,
        _writer: &mut W,
        _xmp: &str,
        _options: &WriteOptions,
    ) -> XmpResult<()> {
        Err(XmpError::NotSupported(
            "writing XMP into TIFF is not implemented".to_string(),
        ))
    }

    fn format_name(&self) -> &'static str {
        "TIFF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["tif", "tiff"]
    }
}

impl TiffHandler {
    /// Read XMP packets and image dimensions from a TIFF file.
    ///
    /// Follows the IFD chain until a zero next-IFD offset; tag 700 packets
    /// from every IFD are collected in encounter order.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        let mut order = [0u8; 2];
        reader.read_exact(&mut order)?;
        let endian = match &order {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return Err(XmpError::BadValue("not a TIFF file".to_string())),
        };
        if read_u16(&mut reader, endian)? != 42 {
            return Err(XmpError::BadValue("bad TIFF magic number".to_string()));
        }

        let mut width = 0u32;
        let mut height = 0u32;
        let mut packets: Vec<String> = Vec::new();

        let mut offset = read_u32(&mut reader, endian)? as u64;
        while offset > 0 {
            reader.seek(SeekFrom::Start(offset))?;
            let entry_count = read_u16(&mut reader, endian)?;

            for _ in 0..entry_count {
                let tag = read_u16(&mut reader, endian)?;
                let kind = read_u16(&mut reader, endian)?;
                if kind == 0 || kind > 12 {
                    return Err(XmpError::BadValue(format!(
                        "unknown TIFF value type {}",
                        kind
                    )));
                }
                let count = read_u32(&mut reader, endian)?;
                let byte_len = count
                    .checked_mul(TYPE_SIZES[kind as usize])
                    .ok_or_else(|| XmpError::BadValue("IFD entry length overflow".to_string()))?;
                let value = read_u32(&mut reader, endian)?;

                match tag {
                    TAG_IMAGE_WIDTH => width = Self::dimension(kind, value, endian)?,
                    TAG_IMAGE_HEIGHT => height = Self::dimension(kind, value, endian)?,
                    TAG_XMP if (kind == 1 || kind == 7) && byte_len > 4 => {
                        let back = reader.stream_position()?;
                        reader.seek(SeekFrom::Start(value as u64))?;
                        let mut region = vec![0u8; byte_len as usize];
                        reader.read_exact(&mut region)?;
                        if let Some(payload) = packet::strip_packet(&region) {
                            packets.push(packet_string(payload)?);
                        }
                        reader.seek(SeekFrom::Start(back))?;
                    }
                    _ => {}
                }
            }

            offset = read_u32(&mut reader, endian)? as u64;
        }

        Ok(XmpData {
            dimensions: Some(Dimensions { width, height }),
            packets,
        })
    }

    /// Extract a dimension from an IFD entry's inline value field.
    ///
    /// A SHORT occupies the first two byte lanes of the field, which are the
    /// high half under big-endian interpretation and the low half under
    /// little-endian.
    fn dimension(kind: u16, value: u32, endian: Endian) -> XmpResult<u32> {
        match kind {
            3 => Ok(match endian {
                Endian::Big => (value >> 16) & 0xFFFF,
                Endian::Little => value & 0xFFFF,
            }),
            4 => Ok(value),
            _ => Err(XmpError::BadValue(format!(
                "unexpected dimension value type {}",
                kind
            ))),
        }
    }
}
