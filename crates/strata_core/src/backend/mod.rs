//! Storage backend contract.
//!
//! A backend realizes recorded actions in some relational store. The store
//! never inspects backend state; it only calls the visit methods in replay
//! order, bracketed by [`Backend::on_begin`] and [`Backend::on_commit`] or
//! [`Backend::on_rollback`].

mod error;
mod memory;
mod null;

pub use error::{BackendError, BackendResult};
pub use memory::{FailPoint, InMemoryBackend, JournalEntry};
pub use null::NullBackend;

use crate::action::{DeleteAction, InsertAction, UpdateAction};
use crate::prototype::PrototypeNode;
use strata_codec::Value;

/// A relational storage backend.
///
/// # Invariants
///
/// - `visit_*` calls arrive only between `on_begin` and `on_commit` or
///   `on_rollback`
/// - after `on_rollback` the backend holds none of the changes visited
///   since the matching `on_begin`
///
/// # Implementors
///
/// - [`InMemoryBackend`] - For testing
/// - [`NullBackend`] - Accepts and discards everything
pub trait Backend: Send {
    /// Connects to the store described by `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn open(&mut self, connection: &str) -> BackendResult<()>;

    /// Disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to release its connection.
    fn close(&mut self) -> BackendResult<()>;

    /// Returns true while connected.
    fn is_open(&self) -> bool;

    /// Creates the table of one concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    fn create_table(&mut self, node: &PrototypeNode) -> BackendResult<()>;

    /// Drops the table of one concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    fn drop_table(&mut self, node: &PrototypeNode) -> BackendResult<()>;

    /// Runs a raw statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    fn execute(&mut self, sql: &str) -> BackendResult<ResultSet>;

    /// Prepares a statement for repeated execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement cannot be prepared.
    fn create_statement(&mut self, sql: &str) -> BackendResult<Box<dyn Statement>>;

    /// Realizes a batch of inserts.
    ///
    /// # Errors
    ///
    /// Returns an error if any row cannot be written.
    fn visit_insert(&mut self, action: &InsertAction) -> BackendResult<()>;

    /// Realizes an update.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn visit_update(&mut self, action: &UpdateAction) -> BackendResult<()>;

    /// Realizes a delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be removed.
    fn visit_delete(&mut self, action: &DeleteAction) -> BackendResult<()>;

    /// Hook run after a type's table was created.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    fn visit_create(&mut self, _node: &PrototypeNode) -> BackendResult<()> {
        Ok(())
    }

    /// Hook run after a type's table was dropped.
    ///
    /// # Errors
    ///
    /// Backend-specific.
    fn visit_drop(&mut self, _node: &PrototypeNode) -> BackendResult<()> {
        Ok(())
    }

    /// Opens a backend-native transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    fn on_begin(&mut self) -> BackendResult<()>;

    /// Makes every change since `on_begin` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn on_commit(&mut self) -> BackendResult<()>;

    /// Discards every change since `on_begin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn on_rollback(&mut self) -> BackendResult<()>;
}

/// A prepared statement.
pub trait Statement: Send {
    /// The statement text.
    fn sql(&self) -> &str;

    /// Binds a parameter by zero-based position.
    ///
    /// # Errors
    ///
    /// Returns an error if the position is out of range.
    fn bind(&mut self, index: usize, value: Value) -> BackendResult<()>;

    /// Runs the statement with the bound parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if execution fails.
    fn execute(&mut self) -> BackendResult<ResultSet>;

    /// Clears bound parameters.
    fn reset(&mut self);
}

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    affected: u64,
}

impl ResultSet {
    /// A result with columns and rows.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            affected: 0,
        }
    }

    /// A result of a statement that returns no rows.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self {
            affected: count,
            ..Self::default()
        }
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Result rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows the statement changed.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.affected
    }

    /// Returns true if there are no result rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
