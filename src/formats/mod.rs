//! Container format walkers
//!
//! One module per supported container. Each walker parses its container as a
//! sequence of typed regions (blocks, boxes, markers, chunks, IFD entries),
//! recognizes the XMP-carrying region, and for writes produces a copy of the
//! reference with that region replaced or inserted and every other byte
//! preserved.

pub mod bmff;
pub mod gif;
pub mod jpeg;
pub mod png;
pub mod scan;
pub mod tiff;
pub mod webp;

use crate::error::{XmpError, XmpResult};

/// Convert a stripped packet region into an owned payload string
pub(crate) fn packet_string(bytes: &[u8]) -> XmpResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| XmpError::ParseError(format!("invalid UTF-8 in XMP packet: {}", e)))
}
