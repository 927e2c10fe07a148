//! Transaction state and lifecycle.

use crate::action::ActionLog;
use crate::backend::{Backend, BackendResult};
use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectPtr, Persistent};
use crate::store::ObjectStore;
use crate::types::{ObjectId, TransactionId};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created but not begun.
    Idle,
    /// Observing mutations.
    Begun,
    /// Replayed to the backend.
    Committed,
    /// Undone in memory.
    RolledBack,
}

/// A scoped sequence of mutations with in-memory rollback.
///
/// ```text
/// Idle --begin--> Begun --commit--> Committed
///                   |
///                   +---rollback--> RolledBack
/// ```
///
/// Only the most recently begun transaction of a store may mutate it;
/// beginning another one pauses this one until the newer one ends.
///
/// A failed commit leaves the transaction `Begun` and the objects as
/// mutated. The caller decides whether to retry the commit or roll back.
///
/// Dropping a begun transaction loses its log but not its place on the
/// store's stack, which then refuses every other mutation. Release it with
/// [`ObjectStore::abandon_transaction`].
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    pub(crate) log: ActionLog,
    sequencer_snapshot: u64,
}

impl Transaction {
    /// Creates an idle transaction with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)),
            state: TransactionState::Idle,
            log: ActionLog::new(),
            sequencer_snapshot: 0,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is begun and not yet ended.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Begun
    }

    /// The recorded actions.
    #[must_use]
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Starts observing `store`.
    ///
    /// Snapshots the store's id sequencer and pushes the transaction on the
    /// store's stack, pausing the previously current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] unless the transaction is idle,
    /// or if the store's nesting limit is reached.
    pub fn begin(&mut self, store: &mut ObjectStore) -> CoreResult<()> {
        if self.state != TransactionState::Idle {
            return Err(CoreError::invalid_state(format!(
                "{} cannot begin from {:?}",
                self.id, self.state
            )));
        }
        store.push_observer(self.id)?;
        self.sequencer_snapshot = store.last_id().as_u64();
        self.state = TransactionState::Begun;
        debug!(
            transaction = %self.id,
            depth = store.transaction_depth(),
            "transaction begun"
        );
        Ok(())
    }

    /// Inserts an object, recording an Insert action.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if this is not the store's
    /// current transaction, or any error of [`ObjectStore::insert`].
    pub fn insert<T: Persistent>(
        &mut self,
        store: &mut ObjectStore,
        object: T,
    ) -> CoreResult<ObjectPtr<T>> {
        self.ensure_current(store)?;
        store.insert_with(Some(self), object)
    }

    /// Changes an object, recording an Update action and a backup the
    /// first time the object is touched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if this is not the store's
    /// current transaction, or any error of [`ObjectStore::update`].
    pub fn update<T, F, R>(
        &mut self,
        store: &mut ObjectStore,
        ptr: ObjectPtr<T>,
        f: F,
    ) -> CoreResult<R>
    where
        T: Persistent,
        F: FnOnce(&mut T) -> R,
    {
        self.ensure_current(store)?;
        store.update_with(Some(self), ptr, f)
    }

    /// Removes an object and its remove-cascade closure, recording a
    /// Delete action and a backup per removed object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if this is not the store's
    /// current transaction, or any error of [`ObjectStore::remove`].
    pub fn remove<T: Persistent>(
        &mut self,
        store: &mut ObjectStore,
        ptr: ObjectPtr<T>,
    ) -> CoreResult<()> {
        self.remove_id(store, ptr.id())
    }

    /// Removes an object by id.
    ///
    /// # Errors
    ///
    /// See [`Transaction::remove`].
    pub fn remove_id(&mut self, store: &mut ObjectStore, id: ObjectId) -> CoreResult<()> {
        self.ensure_current(store)?;
        store.remove_with(Some(self), id)
    }

    /// Replays the recorded actions against `backend`.
    ///
    /// Inserts go first, then updates, then deletes, each group in
    /// recording order, bracketed by `on_begin` and `on_commit`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if this is not the store's
    /// current transaction. Returns [`CoreError::CommitFailed`] if the
    /// backend fails; the backend has then been rolled back while the
    /// in-memory objects stay as mutated and the transaction stays current.
    pub fn commit(&mut self, store: &mut ObjectStore, backend: &mut dyn Backend) -> CoreResult<()> {
        self.ensure_current(store)?;
        store.prepare_actions(&mut self.log)?;
        store.pop_observer(self.id)?;

        match self.replay(backend) {
            Ok(()) => {
                self.state = TransactionState::Committed;
                debug!(
                    transaction = %self.id,
                    actions = self.log.len(),
                    "transaction committed"
                );
                Ok(())
            }
            Err(source) => {
                warn!(transaction = %self.id, error = %source, "commit failed");
                if let Err(err) = backend.on_rollback() {
                    warn!(transaction = %self.id, error = %err, "backend rollback failed");
                }
                store.push_observer(self.id)?;
                Err(CoreError::CommitFailed {
                    transaction: self.id,
                    source,
                })
            }
        }
    }

    /// Undoes every recorded action in memory, newest first.
    ///
    /// Inserted objects are removed, updated objects restored from their
    /// backups and removed objects recreated under their old ids. The id
    /// sequencer is rewound to its snapshot. The backend is never touched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] unless the transaction is begun
    /// and current, which also rejects a second rollback.
    pub fn rollback(&mut self, store: &mut ObjectStore) -> CoreResult<()> {
        self.ensure_current(store)?;
        let actions = self.log.take();
        let count = actions.len();
        store.rollback_actions(actions, self.sequencer_snapshot)?;
        store.pop_observer(self.id)?;
        self.state = TransactionState::RolledBack;
        debug!(transaction = %self.id, actions = count, "transaction rolled back");
        Ok(())
    }

    fn replay(&self, backend: &mut dyn Backend) -> BackendResult<()> {
        backend.on_begin()?;
        for action in self.log.ordered() {
            action.accept(backend)?;
        }
        backend.on_commit()
    }

    fn ensure_current(&self, store: &ObjectStore) -> CoreResult<()> {
        match self.state {
            TransactionState::Begun => {}
            TransactionState::Idle => {
                return Err(CoreError::invalid_state(format!("{} has not begun", self.id)))
            }
            TransactionState::Committed => {
                return Err(CoreError::invalid_state(format!(
                    "{} already committed",
                    self.id
                )))
            }
            TransactionState::RolledBack => {
                return Err(CoreError::invalid_state(format!(
                    "{} already rolled back",
                    self.id
                )))
            }
        }
        match store.current_transaction() {
            Some(current) if current == self.id => Ok(()),
            Some(current) => Err(CoreError::invalid_state(format!(
                "{} is paused while {current} is active",
                self.id
            ))),
            None => Err(CoreError::invalid_state(format!(
                "{} is not registered with this store",
                self.id
            ))),
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Begun {
            warn!(
                transaction = %self.id,
                "transaction dropped without commit or rollback, the store stays locked until it is abandoned"
            );
        }
    }
}
