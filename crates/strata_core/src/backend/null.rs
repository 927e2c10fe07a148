//! Backend that accepts and discards everything.

use super::{Backend, BackendResult, ResultSet, Statement};
use crate::action::{DeleteAction, InsertAction, UpdateAction};
use crate::prototype::PrototypeNode;
use strata_codec::Value;

/// A backend with no storage.
///
/// Useful to run the store purely in memory while still exercising the
/// commit protocol.
#[derive(Debug, Default)]
pub struct NullBackend {
    open: bool,
}

impl NullBackend {
    /// Creates a closed backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for NullBackend {
    fn open(&mut self, _connection: &str) -> BackendResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn create_table(&mut self, _node: &PrototypeNode) -> BackendResult<()> {
        Ok(())
    }

    fn drop_table(&mut self, _node: &PrototypeNode) -> BackendResult<()> {
        Ok(())
    }

    fn execute(&mut self, _sql: &str) -> BackendResult<ResultSet> {
        Ok(ResultSet::default())
    }

    fn create_statement(&mut self, sql: &str) -> BackendResult<Box<dyn Statement>> {
        Ok(Box::new(NullStatement {
            sql: sql.to_string(),
        }))
    }

    fn visit_insert(&mut self, _action: &InsertAction) -> BackendResult<()> {
        Ok(())
    }

    fn visit_update(&mut self, _action: &UpdateAction) -> BackendResult<()> {
        Ok(())
    }

    fn visit_delete(&mut self, _action: &DeleteAction) -> BackendResult<()> {
        Ok(())
    }

    fn on_begin(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn on_commit(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn on_rollback(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

struct NullStatement {
    sql: String,
}

impl Statement for NullStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, _index: usize, _value: Value) -> BackendResult<()> {
        Ok(())
    }

    fn execute(&mut self) -> BackendResult<ResultSet> {
        Ok(ResultSet::default())
    }

    fn reset(&mut self) {}
}
