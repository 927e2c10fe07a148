//! Error types for the Strata core.

use crate::backend::BackendError;
use crate::types::{ObjectId, TransactionId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in object store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backup buffer error.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// A backend call failed outside of commit replay.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The type name or Rust type is already attached.
    #[error("type already attached: {name}")]
    DuplicateType {
        /// Name of the type.
        name: String,
    },

    /// The type is not attached to the store.
    #[error("unknown type: {name}")]
    UnknownType {
        /// Type name, or the Rust type path for lookups by type.
        name: String,
    },

    /// Detach of a type that still has attached subtypes.
    #[error("type {name} still has {children} child type(s)")]
    HasChildren {
        /// Name of the type.
        name: String,
        /// Number of attached child types.
        children: usize,
    },

    /// Removal of an object that is still referenced.
    #[error("object {id} is still referenced {ref_count} time(s)")]
    Referenced {
        /// The referenced object.
        id: ObjectId,
        /// References not accounted for by the removal.
        ref_count: u32,
    },

    /// The backend failed while a commit was replaying actions.
    ///
    /// The backend has been asked to roll back; the in-memory graph is left
    /// as mutated and the transaction stays open.
    #[error("commit of {transaction} failed: {source}")]
    CommitFailed {
        /// The transaction being committed.
        transaction: TransactionId,
        /// The backend failure.
        #[source]
        source: BackendError,
    },

    /// Operation not permitted in the current transaction state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// No live object has this id.
    #[error("unknown object: {id}")]
    UnknownObject {
        /// The missing id.
        id: ObjectId,
    },

    /// Typed access with a Rust type that does not match the object.
    #[error("object {id} is not a {expected}")]
    TypeMismatch {
        /// The accessed object.
        id: ObjectId,
        /// The Rust type that was asked for.
        expected: &'static str,
    },

    /// Insert of an object whose type is attached as abstract.
    #[error("type {name} is abstract")]
    AbstractType {
        /// Name of the type.
        name: String,
    },
}

impl CoreError {
    /// Creates a duplicate type error.
    pub fn duplicate_type(name: impl Into<String>) -> Self {
        Self::DuplicateType { name: name.into() }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns true for errors a caller can recover from by changing the
    /// object graph and retrying.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Referenced { .. })
    }
}
