//! Per-type dispatch tables.
//!
//! Attaching a type monomorphizes a set of functions over it and stores
//! them as plain function pointers, so the engine can back up, restore,
//! link and serialize an object knowing only its prototype node.

mod visitors;

pub(crate) use visitors::{EndpointChange, Link, LinkSet, RelationField};

use crate::error::{CoreError, CoreResult};
use crate::object::Persistent;
use crate::store::ObjectStore;
use crate::transaction::Transaction;
use crate::types::{NodeId, ObjectId};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use strata_codec::{ByteBuffer, Row, Value};
use visitors::{
    BackupWriter, EndpointLinker, EndpointUnlinker, IdSync, IdentifierResolver, LinkCollector,
    PendingInserter, PendingValidator, RelationLister, RestoreReader, RowBuilder,
};

/// A type-erased stored object.
pub(crate) type Erased = dyn Any + Send;

/// Engine operations bound to one concrete persistent type.
#[derive(Clone, Copy)]
pub(crate) struct TypeRegistryEntry {
    pub node: NodeId,
    pub type_path: &'static str,
    /// Builds a default instance to restore a removed object into.
    pub create: fn() -> Box<Erased>,
    /// Writes the surrogate id into the primary key.
    pub sync_id: fn(&mut Erased, ObjectId) -> CoreResult<()>,
    pub backup: fn(&mut Erased, &mut ByteBuffer) -> CoreResult<()>,
    pub restore: fn(&mut Erased, &mut ByteBuffer) -> CoreResult<()>,
    /// Checks relation targets and transient related objects without
    /// changing anything.
    pub validate: fn(&mut Erased, &ObjectStore) -> CoreResult<()>,
    /// Inserts transient related objects and takes a reference on every
    /// related object.
    pub insert_object: fn(&mut Erased, &mut ObjectStore, Option<&mut Transaction>) -> CoreResult<()>,
    /// Drops the references the object holds.
    pub delete_object: fn(&mut Erased, &mut ObjectStore) -> CoreResult<()>,
    pub links: fn(&mut Erased) -> CoreResult<LinkSet>,
    /// The logical primary key, as opposed to the surrogate id.
    pub resolve_identifier: fn(&mut Erased) -> CoreResult<Option<Value>>,
    pub row: fn(&mut Erased) -> CoreResult<Row>,
    /// Declared relation fields of the type.
    pub relations: fn() -> CoreResult<Vec<RelationField>>,
    pub link_endpoint: fn(&mut Erased, &str, ObjectId) -> CoreResult<EndpointChange>,
    /// Drops an id from one relation field, returning how many links went.
    pub unlink_endpoint: fn(&mut Erased, &str, ObjectId) -> CoreResult<u32>,
}

impl TypeRegistryEntry {
    pub(crate) fn of<T: Persistent>(node: NodeId) -> Self {
        Self {
            node,
            type_path: type_name::<T>(),
            create: create::<T>,
            sync_id: sync_id::<T>,
            backup: backup::<T>,
            restore: restore::<T>,
            validate: validate::<T>,
            insert_object: insert_object::<T>,
            delete_object: delete_object::<T>,
            links: links::<T>,
            resolve_identifier: resolve_identifier::<T>,
            row: row::<T>,
            relations: relations::<T>,
            link_endpoint: link_endpoint::<T>,
            unlink_endpoint: unlink_endpoint::<T>,
        }
    }
}

impl std::fmt::Debug for TypeRegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistryEntry")
            .field("node", &self.node)
            .field("type_path", &self.type_path)
            .finish_non_exhaustive()
    }
}

/// Registry entries keyed by Rust type and by prototype node.
#[derive(Debug, Default)]
pub(crate) struct TypeRegistry {
    entries: HashMap<TypeId, TypeRegistryEntry>,
    by_node: HashMap<NodeId, TypeId>,
}

impl TypeRegistry {
    pub(crate) fn register<T: Persistent>(&mut self, node: NodeId) {
        self.entries
            .insert(TypeId::of::<T>(), TypeRegistryEntry::of::<T>(node));
        self.by_node.insert(node, TypeId::of::<T>());
    }

    pub(crate) fn unregister(&mut self, node: NodeId) -> Option<TypeRegistryEntry> {
        let type_id = self.by_node.remove(&node)?;
        self.entries.remove(&type_id)
    }

    pub(crate) fn get<T: 'static>(&self) -> CoreResult<TypeRegistryEntry> {
        self.entries
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| CoreError::unknown_type(type_name::<T>()))
    }

    pub(crate) fn for_node(&self, node: NodeId) -> CoreResult<TypeRegistryEntry> {
        self.by_node
            .get(&node)
            .and_then(|type_id| self.entries.get(type_id))
            .copied()
            .ok_or_else(|| CoreError::unknown_type(node.to_string()))
    }
}

fn downcast<T: Persistent>(object: &mut Erased) -> CoreResult<&mut T> {
    object.downcast_mut::<T>().ok_or_else(|| {
        CoreError::invalid_state(format!(
            "registry entry of {} applied to another type",
            type_name::<T>()
        ))
    })
}

fn create<T: Persistent>() -> Box<Erased> {
    Box::new(T::default())
}

fn sync_id<T: Persistent>(object: &mut Erased, id: ObjectId) -> CoreResult<()> {
    downcast::<T>(object)?.persist(&mut IdSync { id })
}

fn backup<T: Persistent>(object: &mut Erased, buffer: &mut ByteBuffer) -> CoreResult<()> {
    downcast::<T>(object)?.persist(&mut BackupWriter { buffer })
}

fn restore<T: Persistent>(object: &mut Erased, buffer: &mut ByteBuffer) -> CoreResult<()> {
    downcast::<T>(object)?.persist(&mut RestoreReader { buffer })
}

fn links<T: Persistent>(object: &mut Erased) -> CoreResult<LinkSet> {
    let mut collector = LinkCollector::default();
    downcast::<T>(object)?.persist(&mut collector)?;
    Ok(collector.set)
}

/// Checks an object about to be stored along with every transient object it
/// holds, so that a cascade insert either fails up front or not at all.
pub(crate) fn validate_object<T: Persistent>(object: &mut T, store: &ObjectStore) -> CoreResult<()> {
    store.insertable::<T>()?;
    let mut collector = LinkCollector::default();
    object.persist(&mut collector)?;
    store.validate_links(&collector.set)?;
    if collector.set.pending.is_empty() {
        return Ok(());
    }
    object.persist(&mut PendingValidator { store })
}

fn validate<T: Persistent>(object: &mut Erased, store: &ObjectStore) -> CoreResult<()> {
    validate_object(downcast::<T>(object)?, store)
}

fn insert_object<T: Persistent>(
    object: &mut Erased,
    store: &mut ObjectStore,
    txn: Option<&mut Transaction>,
) -> CoreResult<()> {
    let object = downcast::<T>(object)?;
    let mut collector = LinkCollector::default();
    object.persist(&mut collector)?;

    if !collector.set.pending.is_empty() {
        object.persist(&mut PendingInserter {
            store: &mut *store,
            txn,
        })?;
        collector = LinkCollector::default();
        object.persist(&mut collector)?;
    }
    store.retain_links(&collector.set.links);
    Ok(())
}

fn delete_object<T: Persistent>(object: &mut Erased, store: &mut ObjectStore) -> CoreResult<()> {
    let mut collector = LinkCollector::default();
    downcast::<T>(object)?.persist(&mut collector)?;
    store.release_links(&collector.set.links);
    Ok(())
}

fn resolve_identifier<T: Persistent>(object: &mut Erased) -> CoreResult<Option<Value>> {
    let mut resolver = IdentifierResolver::default();
    downcast::<T>(object)?.persist(&mut resolver)?;
    Ok(resolver.value)
}

fn row<T: Persistent>(object: &mut Erased) -> CoreResult<Row> {
    let mut builder = RowBuilder::default();
    downcast::<T>(object)?.persist(&mut builder)?;
    Ok(builder.row)
}

fn relations<T: Persistent>() -> CoreResult<Vec<RelationField>> {
    let mut lister = RelationLister::default();
    T::default().persist(&mut lister)?;
    Ok(lister.fields)
}

fn link_endpoint<T: Persistent>(
    object: &mut Erased,
    field: &str,
    id: ObjectId,
) -> CoreResult<EndpointChange> {
    let mut linker = EndpointLinker {
        field,
        id,
        change: EndpointChange::Unchanged,
    };
    downcast::<T>(object)?.persist(&mut linker)?;
    Ok(linker.change)
}

fn unlink_endpoint<T: Persistent>(object: &mut Erased, field: &str, id: ObjectId) -> CoreResult<u32> {
    let mut unlinker = EndpointUnlinker {
        field,
        id,
        removed: 0,
    };
    downcast::<T>(object)?.persist(&mut unlinker)?;
    Ok(unlinker.removed)
}
