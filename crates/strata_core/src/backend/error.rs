//! Error types for backend operations.

use strata_codec::CodecError;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a backend reports to the store.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has not been opened.
    #[error("backend is not open")]
    NotOpen,

    /// The backend does not implement the operation.
    #[error("operation not supported: {operation}")]
    Unsupported {
        /// Name of the operation.
        operation: &'static str,
    },

    /// The backend rejected or failed the operation.
    #[error("backend failure: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// A row could not be encoded or decoded.
    #[error("row codec error: {0}")]
    Codec(#[from] CodecError),

    /// A failure injected for testing.
    #[error("injected failure at {0}")]
    Injected(&'static str),
}

impl BackendError {
    /// Creates a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
