//! ISO Base Media File Format (BMFF) handler for JPEG2000, HEIC and AVIF
//!
//! BMFF files are a sequence of "boxes": 4-byte size, 4-byte type, optional
//! 64-bit extended size, payload. All multi-byte integers are big-endian.
//! A size field of 1 means the 64-bit extended size follows; 0 means the box
//! extends to the end of its enclosing range.
//!
//! XMP lives in a `uuid` box whose payload starts with a fixed 16-byte
//! identifier; the rest of the payload is the wrapped packet. Dimensions
//! come from `jp2h`/`ihdr` (JPEG2000) or from `meta`/`idat` and
//! `meta`/`iprp`/`ipco`/`ispe` (HEIC, AVIF).

use crate::error::{XmpError, XmpResult};
use crate::formats::packet_string;
use crate::handler::{Dimensions, FileHandler, WriteOptions, XmpData};
use crate::io::{copy_bytes, read_u16, read_u32, read_u64, write_u32, write_u64, Endian};
use crate::packet;
use std::io::{Read, Seek, SeekFrom, Write};

/// XMP UUID for BMFF-based formats: BE7ACFCB-97A9-42E8-9C71-999491E3AFAC
pub const XMP_UUID: [u8; 16] = [
    0xBE, 0x7A, 0xCF, 0xCB, 0x97, 0xA9, 0x42, 0xE8, 0x9C, 0x71, 0x99, 0x94, 0x91, 0xE3, 0xAF, 0xAC,
];

/// Payload of the JPEG2000 signature box
const JP2_SIGNATURE_PAYLOAD: [u8; 4] = [0x0D, 0x0A, 0x87, 0x0A];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Jp2,
    Heif,
}

/// A parsed box header: payload length and position, header already consumed
#[derive(Debug, Clone, Copy)]
struct BoxInfo {
    kind: [u8; 4],
    payload_len: u64,
    payload_pos: u64,
}

impl BoxInfo {
    fn end(&self) -> u64 {
        self.payload_pos + self.payload_len
    }
}

/// Read a box header at the current position. `enclosing_end` resolves a
/// zero size field ("extends to the end of the enclosing range").
fn read_box<R: Read + Seek>(reader: &mut R, enclosing_end: u64) -> XmpResult<BoxInfo> {
    let size = read_u32(reader, Endian::Big)? as u64;
    let mut kind = [0u8; 4];
    reader.read_exact(&mut kind)?;

    if size == 1 {
        let extended = read_u64(reader, Endian::Big)?;
        let payload_pos = reader.stream_position()?;
        let payload_len = extended
            .checked_sub(16)
            .ok_or_else(|| XmpError::BadValue("extended box size below header size".to_string()))?;
        return Ok(BoxInfo {
            kind,
            payload_len,
            payload_pos,
        });
    }

    let payload_pos = reader.stream_position()?;
    let payload_len = if size == 0 {
        enclosing_end.checked_sub(payload_pos).ok_or_else(|| {
            XmpError::BadValue("open-ended box begins past its enclosing range".to_string())
        })?
    } else {
        size.checked_sub(8)
            .ok_or_else(|| XmpError::BadValue("box size below header size".to_string()))?
    };

    Ok(BoxInfo {
        kind,
        payload_len,
        payload_pos,
    })
}

/// BMFF file handler for XMP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct BmffHandler;

impl FileHandler for BmffHandler {
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool> {
        let pos = reader.stream_position()?;
        let mut header = [0u8; 8];
        let ok = reader.read_exact(&mut header).is_ok()
            && (&header[4..8] == b"jP  " || &header[4..8] == b"ftyp");
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
        "BMFF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jp2", "heic", "heif", "avif"]
    }
}

impl BmffHandler {
    /// Read XMP packets and image dimensions from a JPEG2000, HEIC or AVIF
    /// file.
    ///
    /// The XMP `uuid` box is recognized at any depth the walker reaches;
    /// multiple boxes yield multiple packets in file order.
    pub fn read_xmp<R: Read + Seek>(mut reader: R) -> XmpResult<XmpData> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let first = read_box(&mut reader, file_size)?;
        let format = if &first.kind == b"jP  " && first.payload_len == 4 {
            let mut bit = [0u8; 4];
            reader.read_exact(&mut bit)?;
            if bit != JP2_SIGNATURE_PAYLOAD {
                return Err(XmpError::BadValue("bad JPEG2000 signature box".to_string()));
            }
            Format::Jp2
        } else if &first.kind == b"ftyp" && first.payload_len >= 12 {
            Self::detect_brand(&mut reader, &first)?
        } else {
            return Err(XmpError::BadValue("not a supported BMFF file".to_string()));
        };

        reader.seek(SeekFrom::Start(first.end()))?;
        let mut data = XmpData::with_dimensions(0, 0);

        loop {
            if reader.stream_position()? >= file_size {
                break;
            }
            let bx = read_box(&mut reader, file_size)?;
            if bx.end() > file_size {
                return Err(XmpError::BadValue("box extends past end of file".to_string()));
            }
            match &bx.kind {
                b"jp2h" if format == Format::Jp2 => {
                    Self::scan_jp2_header(&mut reader, &bx, &mut data)?
                }
                b"meta" if format == Format::Heif => {
                    // version and flags precede the child boxes
                    reader.seek(SeekFrom::Current(4))?;
                    Self::scan_meta(&mut reader, &bx, &mut data)?
                }
                b"uuid" => Self::read_uuid(&mut reader, &bx, &mut data)?,
                _ => {}
            }
            reader.seek(SeekFrom::Start(bx.end()))?;
        }

        Ok(data)
    }

    /// Stream a reference file to `writer`, dropping every XMP `uuid` box
    /// and emitting a fresh one carrying `xmp` exactly once.
    ///
    /// The replacement goes where the first XMP uuid box was; absent one, it
    /// is injected just before the first box whose size field is zero (the
    /// box that extends to end of file, conventionally the media payload),
    /// or appended when no such box exists.
    pub fn write_xmp<R: Read + Seek, W: Write + Seek>(
        mut reader: R,
        mut writer: W,
        xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut wrote_xmp = xmp.is_empty();

        while reader.stream_position()? < file_size {
            let size = read_u32(&mut reader, Endian::Big)?;
            if size == 0 && !wrote_xmp {
                Self::write_xmp_uuid_box(&mut writer, xmp, options.padding)?;
                wrote_xmp = true;
            }
            let mut kind = [0u8; 4];
            reader.read_exact(&mut kind)?;

            let (payload_len, extended) = if size == 1 {
                let extended = read_u64(&mut reader, Endian::Big)?;
                let payload = extended.checked_sub(16).ok_or_else(|| {
                    XmpError::BadValue("extended box size below header size".to_string())
                })?;
                (payload, Some(extended))
            } else if size == 0 {
                (file_size - reader.stream_position()?, None)
            } else {
                let payload = (size as u64).checked_sub(8).ok_or_else(|| {
                    XmpError::BadValue("box size below header size".to_string())
                })?;
                (payload, None)
            };

            if &kind == b"uuid" {
                if payload_len < 16 {
                    return Err(XmpError::BadValue("uuid box too small".to_string()));
                }
                let mut uuid = [0u8; 16];
                reader.read_exact(&mut uuid)?;
                if uuid == XMP_UUID {
                    if !wrote_xmp {
                        Self::write_xmp_uuid_box(&mut writer, xmp, options.padding)?;
                        wrote_xmp = true;
                    }
                    reader.seek(SeekFrom::Current((payload_len - 16) as i64))?;
                } else {
                    write_u32(&mut writer, size, Endian::Big)?;
                    writer.write_all(&kind)?;
                    if let Some(extended) = extended {
                        write_u64(&mut writer, extended, Endian::Big)?;
                    }
                    writer.write_all(&uuid)?;
                    copy_bytes(&mut reader, &mut writer, payload_len - 16)?;
                }
            } else {
                write_u32(&mut writer, size, Endian::Big)?;
                writer.write_all(&kind)?;
                if let Some(extended) = extended {
                    write_u64(&mut writer, extended, Endian::Big)?;
                }
                copy_bytes(&mut reader, &mut writer, payload_len)?;
            }
        }

        if !wrote_xmp {
            Self::write_xmp_uuid_box(&mut writer, xmp, options.padding)?;
        }
        Ok(())
    }

    /// Scan the compatible-brands list of an `ftyp` box for a supported
    /// brand. Major brand and minor version are skipped.
    fn detect_brand<R: Read + Seek>(reader: &mut R, ftyp: &BoxInfo) -> XmpResult<Format> {
        reader.seek(SeekFrom::Start(ftyp.payload_pos + 8))?;
        let brands = (ftyp.payload_len - 8) / 4;
        for _ in 0..brands {
            let mut brand = [0u8; 4];
            reader.read_exact(&mut brand)?;
            if &brand == b"heic" || &brand == b"avif" {
                return Ok(Format::Heif);
            }
        }
        Err(XmpError::BadValue(
            "no supported brand in ftyp box".to_string(),
        ))
    }

    fn scan_jp2_header<R: Read + Seek>(
        reader: &mut R,
        parent: &BoxInfo,
        data: &mut XmpData,
    ) -> XmpResult<()> {
        while reader.stream_position()? < parent.end() {
            let bx = Self::child_box(reader, parent)?;
            match &bx.kind {
                b"ihdr" => {
                    // height precedes width
                    let height = read_u32(reader, Endian::Big)?;
                    let width = read_u32(reader, Endian::Big)?;
                    data.dimensions = Some(Dimensions { width, height });
                }
                b"uuid" => Self::read_uuid(reader, &bx, data)?,
                _ => {}
            }
            reader.seek(SeekFrom::Start(bx.end()))?;
        }
        Ok(())
    }

    fn scan_meta<R: Read + Seek>(
        reader: &mut R,
        parent: &BoxInfo,
        data: &mut XmpData,
    ) -> XmpResult<()> {
        while reader.stream_position()? < parent.end() {
            let bx = Self::child_box(reader, parent)?;
            match &bx.kind {
                b"idat" => {
                    reader.seek(SeekFrom::Start(bx.payload_pos + 4))?;
                    let width = read_u16(reader, Endian::Big)? as u32;
                    let height = read_u16(reader, Endian::Big)? as u32;
                    data.dimensions = Some(Dimensions { width, height });
                }
                b"iprp" => Self::scan_iprp(reader, &bx, data)?,
                b"uuid" => Self::read_uuid(reader, &bx, data)?,
                _ => {}
            }
            reader.seek(SeekFrom::Start(bx.end()))?;
        }
        Ok(())
    }

    fn scan_iprp<R: Read + Seek>(
        reader: &mut R,
        parent: &BoxInfo,
        data: &mut XmpData,
    ) -> XmpResult<()> {
        while reader.stream_position()? < parent.end() {
            let bx = Self::child_box(reader, parent)?;
            match &bx.kind {
                b"ipco" => Self::scan_ipco(reader, &bx, data)?,
                b"uuid" => Self::read_uuid(reader, &bx, data)?,
                _ => {}
            }
            reader.seek(SeekFrom::Start(bx.end()))?;
        }
        Ok(())
    }

    fn scan_ipco<R: Read + Seek>(
        reader: &mut R,
        parent: &BoxInfo,
        data: &mut XmpData,
    ) -> XmpResult<()> {
        while reader.stream_position()? < parent.end() {
            let bx = Self::child_box(reader, parent)?;
            match &bx.kind {
                b"ispe" => {
                    // a later ispe overrides an earlier one
                    reader.seek(SeekFrom::Start(bx.payload_pos + 4))?;
                    let width = read_u32(reader, Endian::Big)?;
                    let height = read_u32(reader, Endian::Big)?;
                    data.dimensions = Some(Dimensions { width, height });
                }
                b"uuid" => Self::read_uuid(reader, &bx, data)?,
                _ => {}
            }
            reader.seek(SeekFrom::Start(bx.end()))?;
        }
        Ok(())
    }

    /// Read a box bounded by its parent, rejecting any box that escapes it
    fn child_box<R: Read + Seek>(reader: &mut R, parent: &BoxInfo) -> XmpResult<BoxInfo> {
        let bx = read_box(reader, parent.end())?;
        if bx.end() > parent.end() {
            return Err(XmpError::BadValue(
                "box extends past its enclosing box".to_string(),
            ));
        }
        Ok(bx)
    }

    /// If `bx` is a `uuid` box with the XMP identifier, collect its packet
    fn read_uuid<R: Read + Seek>(
        reader: &mut R,
        bx: &BoxInfo,
        data: &mut XmpData,
    ) -> XmpResult<()> {
        if bx.payload_len < 16 {
            return Err(XmpError::BadValue("uuid box too small".to_string()));
        }
        let mut uuid = [0u8; 16];
        reader.read_exact(&mut uuid)?;
        if uuid == XMP_UUID {
            let mut region = vec![0u8; (bx.payload_len - 16) as usize];
            reader.read_exact(&mut region)?;
            if let Some(payload) = packet::strip_packet(&region) {
                data.packets.push(packet_string(payload)?);
            }
        }
        Ok(())
    }

    fn write_xmp_uuid_box<W: Write>(writer: &mut W, xmp: &str, pad: usize) -> XmpResult<()> {
        let size = 24 + packet::packet_len(xmp.len(), true, pad);
        let size = u32::try_from(size)
            .map_err(|_| XmpError::BadParam("XMP packet too large for a uuid box".to_string()))?;
        write_u32(writer, size, Endian::Big)?;
        writer.write_all(b"uuid")?;
        writer.write_all(&XMP_UUID)?;
        packet::write_packet(writer, xmp.as_bytes(), true, pad)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn minimal_heic() -> Vec<u8> {
        let mut ftyp = Vec::new();
        ftyp.extend_from_slice(b"mif1"); // major brand
        ftyp.extend_from_slice(&0u32.to_be_bytes()); // minor version
        ftyp.extend_from_slice(b"mif1");
        ftyp.extend_from_slice(b"heic");

        let mut ispe = Vec::new();
        ispe.extend_from_slice(&0u32.to_be_bytes()); // version + flags
        ispe.extend_from_slice(&1024u32.to_be_bytes());
        ispe.extend_from_slice(&768u32.to_be_bytes());
        let ipco = boxed(b"ipco", &boxed(b"ispe", &ispe));
        let iprp = boxed(b"iprp", &ipco);

        let mut meta = Vec::new();
        meta.extend_from_slice(&0u32.to_be_bytes()); // version + flags
        meta.extend_from_slice(&iprp);

        let mut file = Vec::new();
        file.extend_from_slice(&boxed(b"ftyp", &ftyp));
        file.extend_from_slice(&boxed(b"meta", &meta));
        file.extend_from_slice(&boxed(b"mdat", &[0xAA; 16]));
        file
    }

    fn minimal_jp2() -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(&boxed(b"jP  ", &JP2_SIGNATURE_PAYLOAD));

        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&480u32.to_be_bytes()); // height first
        ihdr.extend_from_slice(&640u32.to_be_bytes());
        ihdr.extend_from_slice(&[0u8; 6]); // components, depth, compression
        file.extend_from_slice(&boxed(b"jp2h", &boxed(b"ihdr", &ihdr)));

        // codestream box with a zero size field: extends to end of file
        file.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(b"jp2c");
        file.extend_from_slice(&[0xBB; 20]);
        file
    }

    #[test]
    fn test_read_heic_dimensions() {
        let data = BmffHandler::read_xmp(Cursor::new(minimal_heic())).unwrap();
        let dims = data.dimensions.unwrap();
        assert_eq!((dims.width, dims.height), (1024, 768));
        assert!(data.packets.is_empty());
    }

    #[test]
    fn test_read_jp2_dimensions() {
        let data = BmffHandler::read_xmp(Cursor::new(minimal_jp2())).unwrap();
        let dims = data.dimensions.unwrap();
        assert_eq!((dims.width, dims.height), (640, 480));
    }

    #[test]
    fn test_reject_unknown_brand() {
        let mut ftyp = Vec::new();
        ftyp.extend_from_slice(b"isom");
        ftyp.extend_from_slice(&0u32.to_be_bytes());
        ftyp.extend_from_slice(b"isom");
        let file = boxed(b"ftyp", &ftyp);
        assert!(BmffHandler::read_xmp(Cursor::new(file)).is_err());
    }

    #[test]
    fn test_write_appends_and_reads_back() {
        let mut out = Cursor::new(Vec::new());
        BmffHandler::write_xmp(
            Cursor::new(minimal_heic()),
            &mut out,
            "<x/>",
            &WriteOptions::default(),
        )
        .unwrap();

        out.set_position(0);
        let data = BmffHandler::read_xmp(out).unwrap();
        assert_eq!(data.packets, vec!["<x/>".to_string()]);
        assert_eq!(data.dimensions.unwrap().width, 1024);
    }

    #[test]
    fn test_write_injects_before_open_ended_box() {
        let mut out = Cursor::new(Vec::new());
        BmffHandler::write_xmp(
            Cursor::new(minimal_jp2()),
            &mut out,
            "<x/>",
            &WriteOptions::default(),
        )
        .unwrap();

        let bytes = out.get_ref().clone();
        let uuid_at = bytes
            .windows(16)
            .position(|w| w == XMP_UUID)
            .expect("uuid box present");
        let jp2c_at = bytes.windows(4).position(|w| w == b"jp2c").unwrap();
        assert!(uuid_at < jp2c_at);

        out.set_position(0);
        let data = BmffHandler::read_xmp(out).unwrap();
        assert_eq!(data.packets, vec!["<x/>".to_string()]);
    }

    #[test]
    fn test_rewrite_keeps_single_uuid_box() {
        let mut first = Cursor::new(Vec::new());
        BmffHandler::write_xmp(
            Cursor::new(minimal_heic()),
            &mut first,
            "<old/>",
            &WriteOptions::default(),
        )
        .unwrap();

        first.set_position(0);
        let mut second = Cursor::new(Vec::new());
        BmffHandler::write_xmp(&mut first, &mut second, "<new/>", &WriteOptions::default())
            .unwrap();

        let bytes = second.get_ref().clone();
        let uuid_count = bytes.windows(16).filter(|w| *w == XMP_UUID).count();
        assert_eq!(uuid_count, 1);

        second.set_position(0);
        let data = BmffHandler::read_xmp(second).unwrap();
        assert_eq!(data.packets, vec!["<new/>".to_string()]);
    }

    #[test]
    fn test_box_escaping_file_is_rejected() {
        let mut file = minimal_heic();
        // truncate mid-box
        file.truncate(file.len() - 10);
        assert!(BmffHandler::read_xmp(Cursor::new(file)).is_err());
    }

    #[test]
    fn test_can_handle() {
        let handler = BmffHandler;
        let mut reader = Cursor::new(minimal_heic());
        assert!(handler.can_handle(&mut reader).unwrap());
        let mut reader = Cursor::new(minimal_jp2());
        assert!(handler.can_handle(&mut reader).unwrap());
        let mut reader = Cursor::new(b"GIF89a..".to_vec());
        assert!(!handler.can_handle(&mut reader).unwrap());
    }
}
