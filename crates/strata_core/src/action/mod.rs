//! Recorded mutations.
//!
//! A transaction records one [`Action`] per mutation. Actions are replayed
//! against a [`Backend`] on commit and consumed in reverse on rollback.

mod log;

pub use self::log::ActionLog;
pub(crate) use self::log::DeleteOutcome;

use crate::backend::{Backend, BackendResult};
use crate::proxy::ProxyHandle;
use crate::types::ObjectId;
use strata_codec::{ByteBuffer, Row, Value};

/// Kind of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Newly inserted objects.
    Insert,
    /// A changed object.
    Update,
    /// A removed object.
    Delete,
}

/// Objects of one type inserted by a transaction.
#[derive(Debug, Clone)]
pub struct InsertAction {
    pub(crate) type_name: String,
    pub(crate) table: String,
    pub(crate) ids: Vec<ObjectId>,
    pub(crate) rows: Vec<Row>,
}

impl InsertAction {
    /// Name of the inserted objects' type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Inserted ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[ObjectId] {
        &self.ids
    }

    /// Pairs of id and column values.
    ///
    /// Rows are captured when the transaction commits, so they reflect the
    /// objects' final in-memory state.
    pub fn rows(&self) -> impl Iterator<Item = (ObjectId, &Row)> {
        self.ids.iter().copied().zip(self.rows.iter())
    }

    /// Number of inserted objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if every insert was pruned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One object changed by a transaction.
#[derive(Debug, Clone)]
pub struct UpdateAction {
    pub(crate) type_name: String,
    pub(crate) table: String,
    pub(crate) id: ObjectId,
    pub(crate) row: Row,
    pub(crate) backup: ByteBuffer,
}

impl UpdateAction {
    /// Name of the object's type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The changed object.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Column values after the change, captured at commit.
    #[must_use]
    pub fn row(&self) -> &Row {
        &self.row
    }
}

/// One object removed by a transaction.
#[derive(Debug, Clone)]
pub struct DeleteAction {
    pub(crate) type_name: String,
    pub(crate) table: String,
    pub(crate) id: ObjectId,
    pub(crate) proxy: ProxyHandle,
    pub(crate) identifier: Option<Value>,
    pub(crate) backup: ByteBuffer,
}

impl DeleteAction {
    /// Name of the object's type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The removed object's surrogate id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Arena handle the object occupied; stale once removed.
    #[must_use]
    pub fn proxy(&self) -> ProxyHandle {
        self.proxy
    }

    /// The removed object's logical primary key.
    #[must_use]
    pub fn identifier(&self) -> Option<&Value> {
        self.identifier.as_ref()
    }
}

/// A recorded mutation.
#[derive(Debug, Clone)]
pub enum Action {
    /// Objects inserted.
    Insert(InsertAction),
    /// Object updated.
    Update(UpdateAction),
    /// Object removed.
    Delete(DeleteAction),
}

impl Action {
    /// Hands the action to the matching backend visit method.
    ///
    /// # Errors
    ///
    /// Propagates the backend's error.
    pub fn accept(&self, backend: &mut dyn Backend) -> BackendResult<()> {
        match self {
            Self::Insert(action) => backend.visit_insert(action),
            Self::Update(action) => backend.visit_update(action),
            Self::Delete(action) => backend.visit_delete(action),
        }
    }

    /// The action's kind.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Insert(_) => ActionKind::Insert,
            Self::Update(_) => ActionKind::Update,
            Self::Delete(_) => ActionKind::Delete,
        }
    }

    /// Name of the type the action applies to.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Insert(action) => action.type_name(),
            Self::Update(action) => action.type_name(),
            Self::Delete(action) => action.type_name(),
        }
    }

    /// Ids of the objects the action covers.
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        match self {
            Self::Insert(action) => action.ids.clone(),
            Self::Update(action) => vec![action.id],
            Self::Delete(action) => vec![action.id],
        }
    }
}
