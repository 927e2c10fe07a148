//! In-memory backend for testing.

use super::{Backend, BackendError, BackendResult, ResultSet, Statement};
use crate::action::{DeleteAction, InsertAction, UpdateAction};
use crate::prototype::PrototypeNode;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_codec::{Row, Value};

/// A point where [`InMemoryBackend`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// `on_begin`.
    Begin,
    /// `visit_insert`.
    Insert,
    /// `visit_update`.
    Update,
    /// `visit_delete`.
    Delete,
    /// `on_commit`.
    Commit,
}

impl FailPoint {
    fn name(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Commit => "commit",
        }
    }
}

/// One call the backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// `open`.
    Open(String),
    /// `close`.
    Close,
    /// `create_table`.
    CreateTable(String),
    /// `drop_table`.
    DropTable(String),
    /// `on_begin`.
    Begin,
    /// `visit_insert` with the inserted ids.
    Insert {
        /// Target table.
        table: String,
        /// Inserted ids.
        ids: Vec<u64>,
    },
    /// `visit_update`.
    Update {
        /// Target table.
        table: String,
        /// Updated id.
        id: u64,
    },
    /// `visit_delete`.
    Delete {
        /// Target table.
        table: String,
        /// Deleted id.
        id: u64,
    },
    /// `on_commit`.
    Commit,
    /// `on_rollback`.
    Rollback,
    /// `execute` or a prepared statement run.
    Execute(String),
}

#[derive(Debug)]
enum Staged {
    Put {
        table: String,
        id: u64,
        row: Vec<u8>,
    },
    Remove {
        table: String,
        id: u64,
    },
}

#[derive(Debug, Default)]
struct State {
    open: bool,
    in_transaction: bool,
    tables: BTreeMap<String, BTreeMap<u64, Vec<u8>>>,
    staged: Vec<Staged>,
    journal: Vec<JournalEntry>,
    fail_at: Option<(FailPoint, usize)>,
}

impl State {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(BackendError::NotOpen)
        }
    }

    fn ensure_table(&self, table: &str) -> BackendResult<()> {
        if self.tables.contains_key(table) {
            Ok(())
        } else {
            Err(BackendError::failed(format!("no such table: {table}")))
        }
    }

    /// Counts down the armed failure and fires once it reaches zero.
    fn check(&mut self, point: FailPoint) -> BackendResult<()> {
        let Some((armed, remaining)) = self.fail_at else {
            return Ok(());
        };
        if armed != point {
            return Ok(());
        }
        if remaining == 0 {
            self.fail_at = None;
            return Err(BackendError::Injected(point.name()));
        }
        self.fail_at = Some((armed, remaining - 1));
        Ok(())
    }

    fn stage(&mut self, op: Staged) {
        if self.in_transaction {
            self.staged.push(op);
        } else {
            self.apply(op);
        }
    }

    fn apply(&mut self, op: Staged) {
        match op {
            Staged::Put { table, id, row } => {
                self.tables.entry(table).or_default().insert(id, row);
            }
            Staged::Remove { table, id } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    rows.remove(&id);
                }
            }
        }
    }
}

/// A backend keeping tables of CBOR-encoded rows in memory.
///
/// Changes visited inside `on_begin` / `on_commit` are staged and only
/// become visible on commit; `on_rollback` discards them. Every call is
/// appended to a journal, and failures can be armed at chosen points.
///
/// Clones share state, so a test can keep a handle while the store drives
/// another.
///
/// # Example
///
/// ```rust
/// use strata_core::backend::{Backend, InMemoryBackend, JournalEntry};
///
/// let mut backend = InMemoryBackend::new();
/// backend.open("memory").unwrap();
/// assert!(backend.is_open());
/// assert_eq!(backend.journal(), vec![JournalEntry::Open("memory".into())]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<State>>,
}

impl InMemoryBackend {
    /// Creates a new closed backend with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the first call at `point` fail.
    pub fn fail_on(&self, point: FailPoint) {
        self.fail_on_nth(point, 0);
    }

    /// Lets `skip` calls at `point` succeed, then fails the next one.
    pub fn fail_on_nth(&self, point: FailPoint, skip: usize) {
        self.state.write().fail_at = Some((point, skip));
    }

    /// Disarms any pending failure.
    pub fn clear_failure(&self) {
        self.state.write().fail_at = None;
    }

    /// Returns a copy of the call journal.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.read().journal.clone()
    }

    /// Empties the call journal.
    pub fn clear_journal(&self) {
        self.state.write().journal.clear();
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.state.read().tables.contains_key(table)
    }

    /// Number of committed rows in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.state.read().tables.get(table).map_or(0, BTreeMap::len)
    }

    /// A committed row.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored bytes do not decode.
    pub fn row(&self, table: &str, id: u64) -> BackendResult<Option<Row>> {
        let state = self.state.read();
        let Some(bytes) = state.tables.get(table).and_then(|rows| rows.get(&id)) else {
            return Ok(None);
        };
        Ok(Some(Row::from_cbor(bytes)?))
    }

    /// Ids of the committed rows of a table, ascending.
    #[must_use]
    pub fn ids(&self, table: &str) -> Vec<u64> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    fn put_rows<'a>(
        &self,
        table: &str,
        rows: impl Iterator<Item = (u64, &'a Row)>,
    ) -> BackendResult<()> {
        let encoded = rows
            .map(|(id, row)| -> BackendResult<(u64, Vec<u8>)> { Ok((id, row.to_cbor()?)) })
            .collect::<BackendResult<Vec<_>>>()?;
        let mut state = self.state.write();
        for (id, row) in encoded {
            state.stage(Staged::Put {
                table: table.to_string(),
                id,
                row,
            });
        }
        Ok(())
    }
}

impl Backend for InMemoryBackend {
    fn open(&mut self, connection: &str) -> BackendResult<()> {
        let mut state = self.state.write();
        state.open = true;
        state.journal.push(JournalEntry::Open(connection.to_string()));
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        let mut state = self.state.write();
        state.open = false;
        state.in_transaction = false;
        state.staged.clear();
        state.journal.push(JournalEntry::Close);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.read().open
    }

    fn create_table(&mut self, node: &PrototypeNode) -> BackendResult<()> {
        let Some(table) = node.table_name() else {
            return Ok(());
        };
        let mut state = self.state.write();
        state.ensure_open()?;
        state.tables.entry(table.to_string()).or_default();
        state.journal.push(JournalEntry::CreateTable(table.to_string()));
        Ok(())
    }

    fn drop_table(&mut self, node: &PrototypeNode) -> BackendResult<()> {
        let Some(table) = node.table_name() else {
            return Ok(());
        };
        let mut state = self.state.write();
        state.ensure_open()?;
        state.tables.remove(table);
        state.journal.push(JournalEntry::DropTable(table.to_string()));
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> BackendResult<ResultSet> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.journal.push(JournalEntry::Execute(sql.to_string()));
        Ok(ResultSet::default())
    }

    fn create_statement(&mut self, sql: &str) -> BackendResult<Box<dyn Statement>> {
        self.state.read().ensure_open()?;
        Ok(Box::new(MemoryStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
            params: Vec::new(),
        }))
    }

    fn visit_insert(&mut self, action: &InsertAction) -> BackendResult<()> {
        {
            let mut state = self.state.write();
            state.ensure_open()?;
            state.ensure_table(action.table())?;
            state.check(FailPoint::Insert)?;
            state.journal.push(JournalEntry::Insert {
                table: action.table().to_string(),
                ids: action.ids().iter().map(|id| id.as_u64()).collect(),
            });
        }
        self.put_rows(
            action.table(),
            action.rows().map(|(id, row)| (id.as_u64(), row)),
        )
    }

    fn visit_update(&mut self, action: &UpdateAction) -> BackendResult<()> {
        {
            let mut state = self.state.write();
            state.ensure_open()?;
            state.ensure_table(action.table())?;
            state.check(FailPoint::Update)?;
            state.journal.push(JournalEntry::Update {
                table: action.table().to_string(),
                id: action.id().as_u64(),
            });
        }
        self.put_rows(
            action.table(),
            std::iter::once((action.id().as_u64(), action.row())),
        )
    }

    fn visit_delete(&mut self, action: &DeleteAction) -> BackendResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.ensure_table(action.table())?;
        state.check(FailPoint::Delete)?;
        state.journal.push(JournalEntry::Delete {
            table: action.table().to_string(),
            id: action.id().as_u64(),
        });
        state.stage(Staged::Remove {
            table: action.table().to_string(),
            id: action.id().as_u64(),
        });
        Ok(())
    }

    fn on_begin(&mut self) -> BackendResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.check(FailPoint::Begin)?;
        state.in_transaction = true;
        state.staged.clear();
        state.journal.push(JournalEntry::Begin);
        Ok(())
    }

    fn on_commit(&mut self) -> BackendResult<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.check(FailPoint::Commit)?;
        let staged = std::mem::take(&mut state.staged);
        for op in staged {
            state.apply(op);
        }
        state.in_transaction = false;
        state.journal.push(JournalEntry::Commit);
        Ok(())
    }

    fn on_rollback(&mut self) -> BackendResult<()> {
        let mut state = self.state.write();
        state.staged.clear();
        state.in_transaction = false;
        state.journal.push(JournalEntry::Rollback);
        Ok(())
    }
}

struct MemoryStatement {
    state: Arc<RwLock<State>>,
    sql: String,
    params: Vec<Value>,
}

impl Statement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: Value) -> BackendResult<()> {
        if index > self.params.len() {
            return Err(BackendError::failed(format!(
                "parameter {index} bound before parameter {}",
                self.params.len()
            )));
        }
        if index == self.params.len() {
            self.params.push(value);
        } else {
            self.params[index] = value;
        }
        Ok(())
    }

    fn execute(&mut self) -> BackendResult<ResultSet> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.journal.push(JournalEntry::Execute(self.sql.clone()));
        Ok(ResultSet::affected(0))
    }

    fn reset(&mut self) {
        self.params.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    fn insert(table: &str, id: u64, title: &str) -> InsertAction {
        let mut row = Row::new();
        row.push("title", Value::from(title));
        InsertAction {
            type_name: table.into(),
            table: table.into(),
            ids: vec![ObjectId::new(id)],
            rows: vec![row],
        }
    }

    fn open_with_table(table: &str) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let mut state = backend.state.write();
        state.open = true;
        state.tables.insert(table.to_string(), BTreeMap::new());
        drop(state);
        backend
    }

    #[test]
    fn closed_backend_rejects_writes() {
        let mut backend = InMemoryBackend::new();
        let result = backend.visit_insert(&insert("track", 1, "a"));
        assert!(matches!(result, Err(BackendError::NotOpen)));
    }

    #[test]
    fn staged_rows_appear_on_commit() {
        let mut backend = open_with_table("track");
        backend.on_begin().unwrap();
        backend.visit_insert(&insert("track", 1, "Intro")).unwrap();
        assert_eq!(backend.row_count("track"), 0);

        backend.on_commit().unwrap();
        let row = backend.row("track", 1).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::from("Intro")));
    }

    #[test]
    fn rollback_discards_staged_rows() {
        let mut backend = open_with_table("track");
        backend.on_begin().unwrap();
        backend.visit_insert(&insert("track", 1, "Intro")).unwrap();
        backend.on_rollback().unwrap();
        assert_eq!(backend.row_count("track"), 0);
        assert_eq!(backend.journal().last(), Some(&JournalEntry::Rollback));
    }

    #[test]
    fn armed_failure_fires_once() {
        let mut backend = open_with_table("track");
        backend.fail_on_nth(FailPoint::Insert, 1);
        backend.visit_insert(&insert("track", 1, "a")).unwrap();
        let result = backend.visit_insert(&insert("track", 2, "b"));
        assert!(matches!(result, Err(BackendError::Injected("insert"))));
        backend.visit_insert(&insert("track", 3, "c")).unwrap();
        assert_eq!(backend.ids("track"), vec![1, 3]);
    }

    #[test]
    fn missing_table_is_an_error() {
        let mut backend = open_with_table("track");
        let result = backend.visit_insert(&insert("album", 1, "a"));
        assert!(matches!(result, Err(BackendError::Failed { .. })));
    }

    #[test]
    fn clones_share_state() {
        let mut backend = open_with_table("track");
        let observer = backend.clone();
        backend.visit_insert(&insert("track", 7, "x")).unwrap();
        assert_eq!(observer.ids("track"), vec![7]);
    }

    #[test]
    fn statements_bind_in_order() {
        let mut backend = open_with_table("track");
        let mut statement = backend.create_statement("select 1").unwrap();
        statement.bind(0, Value::from(1_i64)).unwrap();
        assert!(statement.bind(5, Value::Null).is_err());
        statement.execute().unwrap();
        assert_eq!(
            backend.journal(),
            vec![JournalEntry::Execute("select 1".into())]
        );
    }
}
