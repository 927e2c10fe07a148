//! Lookup of live objects by logical primary key.

use super::ObjectStore;
use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectPtr, Persistent};
use crate::types::{NodeId, ObjectId};
use std::collections::HashMap;
use strata_codec::Value;

/// Per-type maps from CBOR-encoded primary key to id.
///
/// Keys are expected to be unique within a type; when two objects share
/// one, the first registered keeps it.
#[derive(Debug, Default)]
pub(super) struct KeyIndex {
    by_key: HashMap<NodeId, HashMap<Vec<u8>, ObjectId>>,
    by_id: HashMap<ObjectId, (NodeId, Vec<u8>)>,
}

impl KeyIndex {
    fn insert(&mut self, node: NodeId, key: Vec<u8>, id: ObjectId) {
        self.remove(id);
        self.by_key
            .entry(node)
            .or_default()
            .entry(key.clone())
            .or_insert(id);
        self.by_id.insert(id, (node, key));
    }

    pub(super) fn remove(&mut self, id: ObjectId) {
        let Some((node, key)) = self.by_id.remove(&id) else {
            return;
        };
        if let Some(keys) = self.by_key.get_mut(&node) {
            if keys.get(&key) == Some(&id) {
                keys.remove(&key);
            }
        }
    }

    fn find(&self, node: NodeId, key: &[u8]) -> Option<ObjectId> {
        self.by_key.get(&node).and_then(|keys| keys.get(key)).copied()
    }

    pub(super) fn clear(&mut self) {
        self.by_key.clear();
        self.by_id.clear();
    }
}

impl ObjectStore {
    /// Finds a live `T`, or an instance of a subtype, by its logical
    /// primary key.
    ///
    /// The key must have the variant the primary key field converts to:
    /// [`Value::Unsigned`] for a `u64` key, [`Value::Text`] for a `String`
    /// key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if `T` is not attached.
    pub fn find<T: Persistent>(&self, key: impl Into<Value>) -> CoreResult<Option<ObjectPtr<T>>> {
        let entry = self.registry.get::<T>()?;
        let key = key.into().to_cbor()?;
        let found = self
            .tree
            .iter()
            .filter(|node| self.tree.is_derived_from(node.id(), entry.node))
            .find_map(|node| self.keys.find(node.id(), &key));
        Ok(found.map(ObjectPtr::new))
    }

    /// Registers the current primary key of a live object.
    pub(super) fn index_key(&mut self, id: ObjectId) -> CoreResult<()> {
        let node = self.proxy(id)?.node();
        match self.identifier(id)? {
            Some(value) if !value.is_null() => {
                let key = value.to_cbor().map_err(CoreError::from)?;
                self.keys.insert(node, key, id);
            }
            _ => self.keys.remove(id),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_keeps_a_shared_key() {
        let mut index = KeyIndex::default();
        let node = NodeId(1);
        index.insert(node, vec![1], ObjectId::new(1));
        index.insert(node, vec![1], ObjectId::new(2));
        assert_eq!(index.find(node, &[1]), Some(ObjectId::new(1)));

        index.remove(ObjectId::new(2));
        assert_eq!(index.find(node, &[1]), Some(ObjectId::new(1)));
        index.remove(ObjectId::new(1));
        assert_eq!(index.find(node, &[1]), None);
    }

    #[test]
    fn reinserting_moves_the_key() {
        let mut index = KeyIndex::default();
        let node = NodeId(1);
        index.insert(node, vec![1], ObjectId::new(7));
        index.insert(node, vec![2], ObjectId::new(7));
        assert_eq!(index.find(node, &[1]), None);
        assert_eq!(index.find(node, &[2]), Some(ObjectId::new(7)));
        assert_eq!(index.find(NodeId(2), &[2]), None);
    }
}
