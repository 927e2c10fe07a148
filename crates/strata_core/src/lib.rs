//! # Strata Core
//!
//! Object store engine for Strata.
//!
//! This crate provides:
//! - A prototype tree of attached types with O(1) per-type views
//! - One proxy per live object carrying its id and reference count
//! - Field visitors driving backup, restore, linking and row building
//! - Transactions recording an action log with in-memory rollback
//! - Typed observers of each attached type
//! - Bidirectional relations kept in sync on both ends
//! - The [`Backend`] trait that committed actions are replayed against

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
pub mod backend;
mod config;
mod error;
mod object;
mod observer;
mod prototype;
mod proxy;
mod registry;
mod sequencer;
mod store;
mod transaction;
mod types;

pub use action::{Action, ActionKind, ActionLog, DeleteAction, InsertAction, UpdateAction};
pub use backend::{Backend, BackendError, BackendResult, ResultSet, Statement};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use object::{FieldVisitor, HasMany, ObjectPtr, Persistent, Ref};
pub use observer::StoreObserver;
pub use prototype::{PrototypeIter, PrototypeNode, PrototypeTree, View, ViewIter};
pub use proxy::{ObjectProxy, ProxyHandle};
pub use sequencer::Sequencer;
pub use store::ObjectStore;
pub use transaction::{Transaction, TransactionState};
pub use types::{Cascade, NodeId, ObjectId, TransactionId};

pub use strata_codec::{ByteBuffer, Field, Row, Value};
