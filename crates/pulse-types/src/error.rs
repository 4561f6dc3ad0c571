//! Error types for heart-rate frame decoding.

use thiserror::Error;

/// Errors that can occur when decoding a Heart Rate Measurement frame.
///
/// Decode errors describe a single malformed notification frame. They are
/// recoverable at the session level: the offending frame is dropped and the
/// stream continues.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame ended before a field declared by the flags byte.
    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum frame length implied by the flags byte and the fields
        /// consumed so far.
        expected: usize,
        /// Actual frame length.
        actual: usize,
    },

    /// An RR-interval chunk was zero, which has no defined duration.
    #[error("zero RR-interval chunk at index {index}")]
    DivideByZero {
        /// Zero-based index of the offending RR chunk.
        index: usize,
    },
}

/// Result type alias using pulse-types' `DecodeError` type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
