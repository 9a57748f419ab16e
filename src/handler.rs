//! File handler trait for XMP packet extraction and embedding
//!
//! This module defines the trait that all container format handlers
//! implement, the aggregate readers return, and the options writers take.
//! The trait gives every format the same surface so callers can try each
//! reader in turn when the format of a file is not known up front.

use crate::error::XmpResult;
use std::io::{Read, Seek, Write};

/// Intrinsic image dimensions reported by a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// The aggregate every reader returns.
///
/// `packets` holds the XMP payloads in file order, with the packet wrapper
/// (begin/end processing instructions and trailing padding) already removed.
/// An empty vector means the container carries no XMP. `dimensions` is
/// `None` when a packet was recovered but the carrier exposes no dimensions
/// (the generic packet scanner).
#[derive(Debug, Clone, Default)]
pub struct XmpData {
    pub dimensions: Option<Dimensions>,
    pub packets: Vec<String>,
}

impl XmpData {
    pub(crate) fn with_dimensions(width: u32, height: u32) -> Self {
        XmpData {
            dimensions: Some(Dimensions { width, height }),
            packets: Vec::new(),
        }
    }
}

/// Options for XMP write operations.
///
/// Use the builder pattern to configure options.
///
/// # Example
///
/// ```rust
/// use xmpembed::WriteOptions;
///
/// let options = WriteOptions::default().padding(500);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub(crate) padding: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions { padding: 2000 }
    }
}

impl WriteOptions {
    /// Set the whitespace padding appended inside every written packet.
    ///
    /// The padding is what allows a downstream editor to rewrite the packet
    /// in place without restructuring the host file. Values below the
    /// minimum of 1 are clamped.
    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding.max(1);
        self
    }
}

/// Trait for container format handlers
///
/// All format handlers (GIF, JPEG, PNG, …) implement this trait to provide a
/// unified interface for extracting and embedding XMP packets.
pub trait FileHandler {
    /// Check if this handler recognizes the given file.
    ///
    /// Peeks at the signature and restores the stream position, so callers
    /// can probe handlers in sequence over the same reader.
    fn can_handle<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<bool>;

    /// Walk the container and return its dimensions and XMP packets.
    ///
    /// A structural inconsistency (bad signature, size arithmetic that
    /// escapes the file, a corrupt magic sequence) or a read past the end of
    /// a structured region is an error.
    fn read_xmp<R: Read + Seek>(&self, reader: &mut R) -> XmpResult<XmpData>;

    /// Stream `reader` to `writer`, substituting or inserting exactly one
    /// XMP-bearing region carrying `xmp`.
    ///
    /// All bytes outside that region are preserved, along with the
    /// container's structural invariants (chunk sizes, CRCs, RIFF totals).
    /// An empty `xmp` suppresses the insertion; any stale XMP region is
    /// still dropped.
    fn write_xmp<R: Read + Seek, W: Write + Seek>(
        &self,
        reader: &mut R,
        writer: &mut W,
        xmp: &str,
        options: &WriteOptions,
    ) -> XmpResult<()>;

    /// Name of the format this handler supports (e.g. "PNG")
    fn format_name(&self) -> &'static str;

    /// File extensions this handler supports
    fn extensions(&self) -> &'static [&'static str];
}
