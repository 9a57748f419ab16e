//! Path-level API
//!
//! Readers open the file and walk it; writers stream a reference file into
//! a destination created with exclusive semantics. A writer failure of any
//! kind (malformed reference, short read, I/O error) removes the partial
//! destination before the error is returned, so no partial file is ever
//! observable; an already-existing destination fails the create without
//! touching anything.

use crate::error::XmpResult;
use crate::formats::bmff::BmffHandler;
use crate::formats::gif::GifHandler;
use crate::formats::jpeg::JpegHandler;
use crate::formats::png::PngHandler;
use crate::formats::scan::ScanHandler;
use crate::formats::tiff::TiffHandler;
use crate::formats::webp::WebpHandler;
use crate::handler::{FileHandler, WriteOptions, XmpData};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Read XMP packets and dimensions from `path` with the given handler
pub fn read_file<H: FileHandler, P: AsRef<Path>>(handler: &H, path: P) -> XmpResult<XmpData> {
    let mut reader = BufReader::new(File::open(path)?);
    handler.read_xmp(&mut reader)
}

/// Copy `reference` to `destination` with the XMP region replaced by `xmp`.
///
/// The destination must not exist yet.
pub fn write_file<H: FileHandler, P: AsRef<Path>, Q: AsRef<Path>>(
    handler: &H,
    reference: P,
    destination: Q,
    xmp: &str,
    options: &WriteOptions,
) -> XmpResult<()> {
    with_destination(reference, destination, |reader, writer| {
        handler.write_xmp(reader, writer, xmp, options)
    })
}

/// Run a write operation against an exclusively created destination,
/// unlinking it on any failure
fn with_destination<P, Q, F>(reference: P, destination: Q, operation: F) -> XmpResult<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: FnOnce(&mut BufReader<File>, &mut BufWriter<File>) -> XmpResult<()>,
{
    let mut reader = BufReader::new(File::open(reference)?);
    let destination = destination.as_ref();
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;
    let mut writer = BufWriter::new(file);

    let result = operation(&mut reader, &mut writer)
        .and_then(|()| writer.flush().map_err(Into::into));
    if result.is_err() {
        drop(writer);
        let _ = fs::remove_file(destination);
    }
    result
}

/// Read XMP from a GIF file
pub fn read_gif<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&GifHandler, path)
}

/// Write XMP into a copy of a GIF file
pub fn write_gif<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
) -> XmpResult<()> {
    write_file(&GifHandler, reference, destination, xmp, &WriteOptions::default())
}

/// Read XMP from a JPEG2000, HEIC or AVIF file
pub fn read_bmff<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&BmffHandler, path)
}

/// Write XMP into a copy of a JPEG2000, HEIC or AVIF file
pub fn write_bmff<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
) -> XmpResult<()> {
    write_file(&BmffHandler, reference, destination, xmp, &WriteOptions::default())
}

/// Read XMP from a JPEG file
pub fn read_jpeg<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&JpegHandler, path)
}

/// Write XMP into a copy of a JPEG file
pub fn write_jpeg<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
) -> XmpResult<()> {
    write_file(&JpegHandler, reference, destination, xmp, &WriteOptions::default())
}

/// Write standard and extended XMP into a copy of a JPEG file.
///
/// `extended_xmp` may be empty; when present it is split into APP1 segments
/// of at most 65400 payload bytes each, emitted right after the standard
/// packet. The standard packet should name the extension via
/// [`extended_xmp_guid`](crate::formats::jpeg::extended_xmp_guid).
pub fn write_jpeg_ext<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
    extended_xmp: &str,
) -> XmpResult<()> {
    with_destination(reference, destination, |reader, writer| {
        JpegHandler::write_xmp_ext(reader, writer, xmp, extended_xmp, &WriteOptions::default())
    })
}

/// Read XMP from a PNG file
pub fn read_png<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&PngHandler, path)
}

/// Write XMP into a copy of a PNG file
pub fn write_png<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
) -> XmpResult<()> {
    write_file(&PngHandler, reference, destination, xmp, &WriteOptions::default())
}

/// Read XMP from a WebP file
pub fn read_webp<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&WebpHandler, path)
}

/// Write XMP into a copy of a WebP file
pub fn write_webp<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
) -> XmpResult<()> {
    write_file(&WebpHandler, reference, destination, xmp, &WriteOptions::default())
}

/// Read XMP from a TIFF file (TIFF has no writer)
pub fn read_tiff<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&TiffHandler, path)
}

/// Scan any file for an XMP packet
pub fn read_scan<P: AsRef<Path>>(path: P) -> XmpResult<XmpData> {
    read_file(&ScanHandler, path)
}

/// Rewrite a file's XMP packet in place (same total size); the new payload
/// must fit the existing packet region
pub fn write_scan<P: AsRef<Path>, Q: AsRef<Path>>(
    reference: P,
    destination: Q,
    xmp: &str,
) -> XmpResult<()> {
    write_file(&ScanHandler, reference, destination, xmp, &WriteOptions::default())
}
