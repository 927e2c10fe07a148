//! The per-transaction action log.

use super::{Action, ActionKind, DeleteAction, InsertAction, UpdateAction};
use crate::types::ObjectId;
use std::collections::HashMap;
use strata_codec::ByteBuffer;

/// What recording a delete did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteOutcome {
    /// A new Delete entry was appended.
    Recorded,
    /// The object was inserted by this log; its insert was dropped.
    Pruned,
    /// The object's Update entry became a Delete keeping its backup.
    Converted,
}

/// Ordered mutations of one transaction.
///
/// Every object appears in at most one entry: the first mutation of an
/// object decides its entry, later updates are covered by it, and a later
/// delete is folded into the existing entry.
#[derive(Debug, Default)]
pub struct ActionLog {
    actions: Vec<Action>,
    index: HashMap<ObjectId, usize>,
}

impl ActionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns true if an entry covers `id`.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    /// Entries in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Entries in replay order: inserts, then updates, then deletes, each
    /// group in recording order.
    pub fn ordered(&self) -> impl Iterator<Item = &Action> {
        [ActionKind::Insert, ActionKind::Update, ActionKind::Delete]
            .into_iter()
            .flat_map(move |kind| self.actions.iter().filter(move |a| a.kind() == kind))
    }

    /// Number of entries of one kind.
    #[must_use]
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    /// Records an inserted object.
    ///
    /// Consecutive inserts of one type share an entry.
    pub(crate) fn record_insert(&mut self, type_name: &str, table: &str, id: ObjectId) {
        if let Some(Action::Insert(last)) = self.actions.last_mut() {
            if last.type_name == type_name {
                last.ids.push(id);
                self.index.insert(id, self.actions.len() - 1);
                return;
            }
        }
        self.push(
            id,
            Action::Insert(InsertAction {
                type_name: type_name.to_string(),
                table: table.to_string(),
                ids: vec![id],
                rows: Vec::new(),
            }),
        );
    }

    /// Records the first update of an object along with its backup.
    ///
    /// Returns false, recording nothing, if an entry already covers `id`.
    pub(crate) fn record_update(
        &mut self,
        type_name: &str,
        table: &str,
        id: ObjectId,
        backup: ByteBuffer,
    ) -> bool {
        if self.contains(id) {
            return false;
        }
        self.push(
            id,
            Action::Update(UpdateAction {
                type_name: type_name.to_string(),
                table: table.to_string(),
                id,
                row: strata_codec::Row::new(),
                backup,
            }),
        );
        true
    }

    /// Records a removed object.
    pub(crate) fn record_delete(&mut self, action: DeleteAction) -> DeleteOutcome {
        ActionRemover { log: self }.apply(action)
    }

    /// Takes every entry out of the log, leaving it empty.
    pub(crate) fn take(&mut self) -> Vec<Action> {
        self.index.clear();
        std::mem::take(&mut self.actions)
    }

    pub(crate) fn actions_mut(&mut self) -> &mut [Action] {
        &mut self.actions
    }

    /// Drops inserts and updates of objects that are no longer live.
    ///
    /// A nested transaction may remove an object its parent logged; there is
    /// nothing left to write for it when the parent commits.
    pub(crate) fn retain_live(&mut self, live: impl Fn(ObjectId) -> bool) {
        for action in &mut self.actions {
            if let Action::Insert(insert) = action {
                insert.ids.retain(|id| live(*id));
            }
        }
        self.actions.retain(|action| match action {
            Action::Insert(insert) => !insert.ids.is_empty(),
            Action::Update(update) => live(update.id),
            Action::Delete(_) => true,
        });
        self.index.clear();
        for (position, action) in self.actions.iter().enumerate() {
            for id in action.ids() {
                self.index.insert(id, position);
            }
        }
    }

    fn push(&mut self, id: ObjectId, action: Action) {
        self.index.insert(id, self.actions.len());
        self.actions.push(action);
    }
}

/// Folds a delete into the entries already recorded for the object.
///
/// An object inserted in the same transaction simply disappears from its
/// Insert entry, and an emptied entry is dropped. An updated object's entry
/// turns into a Delete that keeps the backup taken before the update. The
/// relative order of all other entries is preserved.
struct ActionRemover<'a> {
    log: &'a mut ActionLog,
}

impl ActionRemover<'_> {
    fn apply(self, mut delete: DeleteAction) -> DeleteOutcome {
        let id = delete.id;
        let Some(&position) = self.log.index.get(&id) else {
            self.log.push(id, Action::Delete(delete));
            return DeleteOutcome::Recorded;
        };

        match &mut self.log.actions[position] {
            Action::Insert(insert) => {
                if let Some(at) = insert.ids.iter().position(|candidate| *candidate == id) {
                    insert.ids.remove(at);
                    if at < insert.rows.len() {
                        insert.rows.remove(at);
                    }
                }
                let emptied = insert.ids.is_empty();
                self.log.index.remove(&id);
                if emptied {
                    self.remove_entry(position);
                }
                DeleteOutcome::Pruned
            }
            Action::Update(update) => {
                delete.backup = std::mem::take(&mut update.backup);
                self.log.actions[position] = Action::Delete(delete);
                DeleteOutcome::Converted
            }
            Action::Delete(_) => DeleteOutcome::Recorded,
        }
    }

    fn remove_entry(self, position: usize) {
        self.log.actions.remove(position);
        for entry in self.log.index.values_mut() {
            if *entry > position {
                *entry -= 1;
            }
        }
    }
}
