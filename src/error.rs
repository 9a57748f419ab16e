//! Error types for XMP packet operations
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Error types for XMP packet operations
#[derive(Debug, Error)]
pub enum XmpError {
    /// Bad parameter provided to a function
    #[error("Bad parameter: {0}")]
    BadParam(String),

    /// Malformed container (wrong signature, size arithmetic, magic mismatch)
    #[error("Bad value: {0}")]
    BadValue(String),

    /// Packet text is not valid UTF-8
    #[error("Parse error: {0}")]
    ParseError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// No XMP packet found where one was required
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

/// Result type alias for XMP packet operations
pub type XmpResult<T> = Result<T, XmpError>;
