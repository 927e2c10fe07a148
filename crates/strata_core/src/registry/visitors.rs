//! Field visitors behind the registry entries.

use crate::error::{CoreError, CoreResult};
use crate::object::{FieldVisitor, HasMany, ObjectPtr, Persistent, Ref};
use crate::store::ObjectStore;
use crate::transaction::Transaction;
use crate::types::{Cascade, ObjectId};
use std::any::{type_name, TypeId};
use strata_codec::{ByteBuffer, Field, Row, Value};

/// One relation field pointing at a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub field: &'static str,
    pub target: ObjectId,
    pub target_type: TypeId,
    pub target_name: &'static str,
    pub cascade: Cascade,
}

/// A relation field holding a transient object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingLink {
    pub field: &'static str,
    pub target_name: &'static str,
    pub cascade: Cascade,
}

/// Every relation of one object.
#[derive(Debug, Default)]
pub(crate) struct LinkSet {
    pub links: Vec<Link>,
    pub pending: Vec<PendingLink>,
}

/// Appends field values to a backup buffer.
pub(crate) struct BackupWriter<'a> {
    pub buffer: &'a mut ByteBuffer,
}

impl FieldVisitor for BackupWriter<'_> {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, key: &mut K) -> CoreResult<()> {
        self.buffer.write(key);
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, value: &mut F) -> CoreResult<()> {
        self.buffer.write(value);
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        _name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.buffer.put_reference(target.id().map(ObjectId::as_u64));
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.on_belongs_to(name, target, cascade)
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        _name: &'static str,
        items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        let ids = items.ids();
        self.buffer.put_len(ids.len());
        for id in ids {
            self.buffer.put_reference(Some(id.as_u64()));
        }
        Ok(())
    }
}

/// Consumes field values from a backup buffer.
pub(crate) struct RestoreReader<'a> {
    pub buffer: &'a mut ByteBuffer,
}

impl FieldVisitor for RestoreReader<'_> {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, key: &mut K) -> CoreResult<()> {
        *key = self.buffer.read()?;
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, value: &mut F) -> CoreResult<()> {
        *value = self.buffer.read()?;
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        _name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        let id = self.buffer.get_reference()?.unwrap_or(0);
        *target = Ref::linked(ObjectId::new(id));
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.on_belongs_to(name, target, cascade)
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        _name: &'static str,
        items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        let count = self.buffer.get_len()?;
        let mut ids = Vec::with_capacity(count.min(self.buffer.len() / 8));
        for _ in 0..count {
            if let Some(id) = self.buffer.get_reference()? {
                ids.push(ObjectId::new(id));
            }
        }
        items.replace_ids(ids);
        Ok(())
    }
}

/// Collects relation targets.
#[derive(Default)]
pub(crate) struct LinkCollector {
    pub set: LinkSet,
}

impl LinkCollector {
    fn visit<T: Persistent>(&mut self, field: &'static str, target: &Ref<T>, cascade: Cascade) {
        if let Some(id) = target.id() {
            self.set.links.push(Link {
                field,
                target: id,
                target_type: TypeId::of::<T>(),
                target_name: type_name::<T>(),
                cascade,
            });
        } else if target.is_pending() {
            self.set.pending.push(PendingLink {
                field,
                target_name: type_name::<T>(),
                cascade,
            });
        }
    }
}

impl FieldVisitor for LinkCollector {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, _key: &mut K) -> CoreResult<()> {
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.visit(name, target, cascade);
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.visit(name, target, cascade);
        Ok(())
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        items: &mut HasMany<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        for item in items.items_mut().iter() {
            self.visit(name, item, cascade);
        }
        Ok(())
    }
}

/// Checks every transient related object before any of them is inserted.
pub(crate) struct PendingValidator<'a> {
    pub store: &'a ObjectStore,
}

impl PendingValidator<'_> {
    fn check<T: Persistent>(&mut self, target: &mut Ref<T>) -> CoreResult<()> {
        match target.pending_mut() {
            Some(object) => super::validate_object(object, self.store),
            None => Ok(()),
        }
    }
}

impl FieldVisitor for PendingValidator<'_> {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, _key: &mut K) -> CoreResult<()> {
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        _name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.check(target)
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        _name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.check(target)
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        _name: &'static str,
        items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        for item in items.items_mut() {
            self.check(item)?;
        }
        Ok(())
    }
}

/// Inserts transient related objects along with their owner.
pub(crate) struct PendingInserter<'a> {
    pub store: &'a mut ObjectStore,
    pub txn: Option<&'a mut Transaction>,
}

impl PendingInserter<'_> {
    fn attach<T: Persistent>(
        &mut self,
        field: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        if !target.is_pending() {
            return Ok(());
        }
        if !cascade.contains(Cascade::INSERT) {
            return Err(CoreError::invalid_state(format!(
                "relation {field} holds a transient {} but does not cascade inserts",
                type_name::<T>()
            )));
        }
        if let Some(object) = target.take_pending() {
            let ptr = self.store.insert_with(self.txn.as_deref_mut(), object)?;
            target.set(ptr);
        }
        Ok(())
    }
}

impl FieldVisitor for PendingInserter<'_> {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, _key: &mut K) -> CoreResult<()> {
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.attach(name, target, cascade)
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.attach(name, target, cascade)
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        items: &mut HasMany<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        for item in items.items_mut() {
            self.attach(name, item, cascade)?;
        }
        Ok(())
    }
}

/// Writes the surrogate id into an integer primary key.
pub(crate) struct IdSync {
    pub id: ObjectId,
}

impl FieldVisitor for IdSync {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, key: &mut K) -> CoreResult<()> {
        if let Some(value) = K::from_id(self.id.as_u64()) {
            *key = value;
        }
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        _name: &'static str,
        _target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        _name: &'static str,
        _target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        _name: &'static str,
        _items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Extracts the logical primary key.
#[derive(Default)]
pub(crate) struct IdentifierResolver {
    pub value: Option<Value>,
}

impl FieldVisitor for IdentifierResolver {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, key: &mut K) -> CoreResult<()> {
        self.value = Some(key.to_value());
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        _name: &'static str,
        _target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        _name: &'static str,
        _target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        _name: &'static str,
        _items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Builds the named column values a backend binds.
#[derive(Default)]
pub(crate) struct RowBuilder {
    pub row: Row,
}

impl FieldVisitor for RowBuilder {
    fn on_primary_key<K: Field>(&mut self, name: &'static str, key: &mut K) -> CoreResult<()> {
        self.row.push(name, key.to_value());
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, name: &'static str, value: &mut F) -> CoreResult<()> {
        self.row.push(name, value.to_value());
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.row
            .push(name, Value::reference(target.id().map(ObjectId::as_u64)));
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        cascade: Cascade,
    ) -> CoreResult<()> {
        self.on_belongs_to(name, target, cascade)
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        let ids = items
            .ids()
            .into_iter()
            .map(|id| Value::Reference(id.as_u64()))
            .collect();
        self.row.push(name, Value::Array(ids));
        Ok(())
    }
}

/// A relation field as declared, independent of what it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RelationField {
    pub name: &'static str,
    pub target_type: TypeId,
    pub target_name: &'static str,
    pub many: bool,
}

/// Lists the relation fields of a type.
#[derive(Default)]
pub(crate) struct RelationLister {
    pub fields: Vec<RelationField>,
}

impl RelationLister {
    fn record<T: Persistent>(&mut self, name: &'static str, many: bool) {
        self.fields.push(RelationField {
            name,
            target_type: TypeId::of::<T>(),
            target_name: type_name::<T>(),
            many,
        });
    }
}

impl FieldVisitor for RelationLister {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, _key: &mut K) -> CoreResult<()> {
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        _target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.record::<T>(name, false);
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        _target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.record::<T>(name, false);
        Ok(())
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        _items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.record::<T>(name, true);
        Ok(())
    }
}

/// What linking an endpoint did to the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointChange {
    /// The field already held the object.
    Unchanged,
    /// The object was added.
    Added,
    /// A single reference moved away from the given object.
    Replaced(ObjectId),
}

/// Points one relation field at an object, or adds the object to it.
pub(crate) struct EndpointLinker<'a> {
    pub field: &'a str,
    pub id: ObjectId,
    pub change: EndpointChange,
}

impl EndpointLinker<'_> {
    fn set<T: Persistent>(&mut self, name: &'static str, target: &mut Ref<T>) {
        if name != self.field {
            return;
        }
        self.change = match target.id() {
            Some(current) if current == self.id => EndpointChange::Unchanged,
            Some(previous) => {
                *target = Ref::linked(self.id);
                EndpointChange::Replaced(previous)
            }
            None => {
                *target = Ref::linked(self.id);
                EndpointChange::Added
            }
        };
    }
}

impl FieldVisitor for EndpointLinker<'_> {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, _key: &mut K) -> CoreResult<()> {
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.set(name, target);
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.set(name, target);
        Ok(())
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        if name == self.field {
            self.change = if items.contains(self.id) {
                EndpointChange::Unchanged
            } else {
                items.push(ObjectPtr::new(self.id));
                EndpointChange::Added
            };
        }
        Ok(())
    }
}

/// Drops an object from one relation field.
pub(crate) struct EndpointUnlinker<'a> {
    pub field: &'a str,
    pub id: ObjectId,
    pub removed: u32,
}

impl EndpointUnlinker<'_> {
    fn clear<T: Persistent>(&mut self, name: &'static str, target: &mut Ref<T>) {
        if name == self.field && target.id() == Some(self.id) {
            target.clear();
            self.removed += 1;
        }
    }
}

impl FieldVisitor for EndpointUnlinker<'_> {
    fn on_primary_key<K: Field>(&mut self, _name: &'static str, _key: &mut K) -> CoreResult<()> {
        Ok(())
    }

    fn on_attribute<F: Field>(&mut self, _name: &'static str, _value: &mut F) -> CoreResult<()> {
        Ok(())
    }

    fn on_belongs_to<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.clear(name, target);
        Ok(())
    }

    fn on_has_one<T: Persistent>(
        &mut self,
        name: &'static str,
        target: &mut Ref<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        self.clear(name, target);
        Ok(())
    }

    fn on_has_many<T: Persistent>(
        &mut self,
        name: &'static str,
        items: &mut HasMany<T>,
        _cascade: Cascade,
    ) -> CoreResult<()> {
        if name == self.field {
            self.removed += items.unlink(self.id);
        }
        Ok(())
    }
}
