//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while writing or consuming a buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer holds fewer bytes than the read requires.
    #[error("unexpected end of buffer: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        /// Bytes the read asked for.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A length prefix does not fit the platform's `usize`.
    #[error("length prefix {0} exceeds the addressable range")]
    LengthOverflow(u64),

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A boolean byte other than 0 or 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    /// A `char` field held a value that is not a Unicode scalar.
    #[error("invalid char scalar {0:#x}")]
    InvalidChar(u32),

    /// Failed to encode a row.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a row.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
