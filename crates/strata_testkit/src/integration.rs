//! Store harness for cross-crate tests.
//!
//! Pairs an [`ObjectStore`] with an open [`InMemoryBackend`] whose tables
//! match the attached types.

use crate::fixtures::{Album, Artist, Employee, Gadget, Person, Student, Track};
use crate::init_tracing;
use strata_codec::Value;
use strata_core::backend::{InMemoryBackend, JournalEntry};
use strata_core::{Backend, CoreResult, ObjectId, ObjectStore, Persistent, Transaction};

/// A store with an in-memory backend.
pub struct TestStore {
    /// The store under test.
    pub store: ObjectStore,
    /// The backend transactions commit to.
    pub backend: InMemoryBackend,
}

impl TestStore {
    /// Creates a harness, letting `attach` register the types.
    pub fn new<F>(attach: F) -> Self
    where
        F: FnOnce(&mut ObjectStore) -> CoreResult<()>,
    {
        init_tracing();
        let mut store = ObjectStore::new();
        attach(&mut store).expect("Failed to attach fixture types");

        let mut backend = InMemoryBackend::new();
        backend.open("memory").expect("Failed to open backend");
        store
            .create_tables(&mut backend)
            .expect("Failed to create tables");
        backend.clear_journal();
        Self { store, backend }
    }

    /// Artist, album and track.
    pub fn music() -> Self {
        Self::new(|store| {
            store.attach::<Artist>("artist", None, false)?;
            store.attach::<Album>("album", None, false)?;
            store.attach::<Track>("track", None, false)?;
            Ok(())
        })
    }

    /// Abstract person with student and employee below it.
    pub fn people() -> Self {
        Self::new(|store| {
            store.attach::<Person>("person", None, true)?;
            store.attach::<Student>("student", Some("person"), false)?;
            store.attach::<Employee>("employee", Some("person"), false)?;
            Ok(())
        })
    }

    /// Gadgets only.
    pub fn gadgets() -> Self {
        Self::new(|store| {
            store.attach::<Gadget>("gadget", None, false)?;
            Ok(())
        })
    }

    /// Runs `f` in a transaction and commits it.
    ///
    /// If `f` or the commit fails the transaction is rolled back and the
    /// error returned.
    pub fn transaction<F, R>(&mut self, f: F) -> CoreResult<(Transaction, R)>
    where
        F: FnOnce(&mut Transaction, &mut ObjectStore) -> CoreResult<R>,
    {
        let mut txn = self.store.begin()?;
        match f(&mut txn, &mut self.store) {
            Ok(value) => match txn.commit(&mut self.store, &mut self.backend) {
                Ok(()) => Ok((txn, value)),
                Err(err) => {
                    txn.rollback(&mut self.store)?;
                    Err(err)
                }
            },
            Err(err) => {
                txn.rollback(&mut self.store)?;
                Err(err)
            }
        }
    }

    /// Ids of the committed rows of `table`, ascending.
    pub fn committed_ids(&self, table: &str) -> Vec<u64> {
        self.backend.ids(table)
    }

    /// One committed column value.
    pub fn committed_value(&self, table: &str, id: ObjectId, column: &str) -> Option<Value> {
        self.backend
            .row(table, id.as_u64())
            .expect("Failed to decode committed row")
            .and_then(|row| row.get(column).cloned())
    }

    /// Backend calls since the harness was built or the journal cleared.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.backend.journal()
    }

    /// Asserts that every live object of `T` is committed with its current
    /// column values, and that nothing else is.
    pub fn verify_committed<T: Persistent>(&mut self, table: &str) {
        let ids: Vec<ObjectId> = self
            .store
            .view_of::<T>(true)
            .expect("Type is not attached")
            .ids()
            .collect();

        let mut expected: Vec<u64> = ids.iter().map(|id| id.as_u64()).collect();
        expected.sort_unstable();
        assert_eq!(
            self.committed_ids(table),
            expected,
            "Committed ids of {table} differ from live objects"
        );

        for id in ids {
            let live = self.store.row(id).expect("Failed to build row");
            let committed = self
                .backend
                .row(table, id.as_u64())
                .expect("Failed to decode committed row");
            assert_eq!(committed.as_ref(), Some(&live), "Row mismatch for {id}");
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = ObjectStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::ops::DerefMut for TestStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_creates_tables() {
        let harness = TestStore::people();
        assert!(harness.backend.has_table("student"));
        assert!(harness.backend.has_table("employee"));
        assert!(!harness.backend.has_table("person"));
        assert!(harness.journal().is_empty());
    }

    #[test]
    fn failing_closure_rolls_back() {
        let mut harness = TestStore::music();
        let result = harness.transaction(|txn, store| {
            txn.insert(store, Track::titled("a"))?;
            store.ref_count(ObjectId::new(999))
        });

        assert!(result.is_err());
        assert!(harness.is_empty());
        assert!(harness.current_transaction().is_none());
        assert!(harness.journal().is_empty());
    }

    #[test]
    fn committed_rows_match_live_objects() {
        let mut harness = TestStore::music();
        harness
            .transaction(|txn, store| {
                let artist = txn.insert(store, Artist::named("Nina"))?;
                txn.insert(store, Track::by("Sinnerman", artist))?;
                txn.insert(store, Track::titled("Feeling Good"))
            })
            .unwrap();

        harness.verify_committed::<Track>("track");
        harness.verify_committed::<Artist>("artist");
    }
}
