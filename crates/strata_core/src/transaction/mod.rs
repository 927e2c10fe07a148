//! Transaction protocol.
//!
//! A [`Transaction`] is threaded explicitly through every mutation it
//! observes. The store only keeps the stack of begun transaction ids, so it
//! can tell which one is current and reject mutations that bypass it.

mod state;

pub use state::{Transaction, TransactionState};
