//! Bidirectional relations.
//!
//! Two relation fields bound with [`ObjectStore::bind`] are the two ends
//! of one relation. Whenever the store links or unlinks one end it
//! mirrors the change on the other, adjusting reference counts and, inside
//! a transaction, recording the far object's pre-image like any update.

use super::ObjectStore;
use crate::error::{CoreError, CoreResult};
use crate::object::Persistent;
use crate::observer::ObjectEvent;
use crate::registry::{EndpointChange, Link, RelationField, TypeRegistryEntry};
use crate::transaction::Transaction;
use crate::types::{NodeId, ObjectId};
use std::collections::{HashMap, HashSet};
use strata_codec::ByteBuffer;
use tracing::{debug, trace};

/// The far end of a bound relation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Endpoint {
    pub node: NodeId,
    pub field: &'static str,
}

impl ObjectStore {
    /// Binds `a_field` of `A` and `b_field` of `B` as the two ends of one
    /// relation.
    ///
    /// Afterwards, pointing an `A` at a `B` through `a_field` also adds the
    /// `A` to the `B`'s `b_field`, and the reverse. A single reference that
    /// moves to another object leaves the old object's collection. Removing
    /// an object unlinks it from the far ends instead of failing with
    /// [`CoreError::Referenced`] over them. Objects already stored are not
    /// reconciled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if either type is not attached,
    /// and [`CoreError::InvalidState`] if a field is missing, does not
    /// point at the other type, is already bound, or while a transaction is
    /// active.
    pub fn bind<A: Persistent, B: Persistent>(
        &mut self,
        a_field: &'static str,
        b_field: &'static str,
    ) -> CoreResult<()> {
        self.ensure_no_transaction("bind")?;
        let a = self.registry.get::<A>()?;
        let b = self.registry.get::<B>()?;
        self.relation_field(a, a_field, b.node)?;
        self.relation_field(b, b_field, a.node)?;

        for (node, field) in [(a.node, a_field), (b.node, b_field)] {
            if self.endpoints.contains_key(&(node, field)) {
                return Err(CoreError::invalid_state(format!(
                    "relation field {field} of {node} is already bound"
                )));
            }
        }
        self.endpoints.insert(
            (a.node, a_field),
            Endpoint {
                node: b.node,
                field: b_field,
            },
        );
        self.endpoints.insert(
            (b.node, b_field),
            Endpoint {
                node: a.node,
                field: a_field,
            },
        );
        debug!(
            a = a.type_path,
            a_field,
            b = b.type_path,
            b_field,
            "bound relation"
        );
        Ok(())
    }

    /// Returns true if the relation field `field` of `T` is bound.
    #[must_use]
    pub fn is_bound<T: Persistent>(&self, field: &str) -> bool {
        self.registry.get::<T>().is_ok_and(|entry| {
            self.endpoints
                .keys()
                .any(|(node, bound)| *node == entry.node && *bound == field)
        })
    }

    fn relation_field(
        &self,
        entry: TypeRegistryEntry,
        field: &str,
        other: NodeId,
    ) -> CoreResult<RelationField> {
        let relation = (entry.relations)()?
            .into_iter()
            .find(|relation| relation.name == field)
            .ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "{} has no relation field {field}",
                    entry.type_path
                ))
            })?;
        let target = self
            .tree
            .node_of_type(relation.target_type)
            .ok_or_else(|| CoreError::unknown_type(relation.target_name))?;
        if !self.tree.is_derived_from(other, target) {
            return Err(CoreError::invalid_state(format!(
                "relation field {field} of {} points at {}, not {other}",
                entry.type_path, relation.target_name
            )));
        }
        Ok(relation)
    }

    pub(super) fn unbind_node(&mut self, node: NodeId) {
        self.endpoints
            .retain(|(owner, _), endpoint| *owner != node && endpoint.node != node);
    }

    fn endpoint(&self, node: NodeId, field: &'static str) -> Option<Endpoint> {
        self.endpoints.get(&(node, field)).copied()
    }

    /// Mirrors the link changes of `id` from `before` to `after` on the
    /// far ends of its bound fields.
    pub(super) fn sync_endpoints(
        &mut self,
        mut txn: Option<&mut Transaction>,
        id: ObjectId,
        before: &[Link],
        after: &[Link],
    ) -> CoreResult<()> {
        if self.endpoints.is_empty() {
            return Ok(());
        }
        let node = self.proxy(id)?.node();
        for link in before.iter().filter(|link| !holds(after, link)) {
            if let Some(endpoint) = self.endpoint(node, link.field) {
                self.unlink_endpoint(txn.as_deref_mut(), link.target, endpoint.field, id)?;
            }
        }
        for link in after.iter().filter(|link| !holds(before, link)) {
            if let Some(endpoint) = self.endpoint(node, link.field) {
                self.link_endpoint(txn.as_deref_mut(), link.target, endpoint.field, id, link.field)?;
            }
        }
        Ok(())
    }

    /// References to the members of a removal closure held by far ends
    /// outside it. Removal unlinks them, so they do not block it.
    pub(super) fn released_references(
        &mut self,
        closure: &[ObjectId],
        members: &HashSet<ObjectId>,
    ) -> CoreResult<HashMap<ObjectId, u32>> {
        let mut released = HashMap::new();
        if self.endpoints.is_empty() {
            return Ok(released);
        }
        for member in closure {
            let node = self.proxy(*member)?.node();
            let mut seen = HashSet::new();
            for link in self.links_of(*member)?.links {
                if members.contains(&link.target)
                    || !self.contains(link.target)
                    || !seen.insert((link.target, link.field))
                {
                    continue;
                }
                let Some(endpoint) = self.endpoint(node, link.field) else {
                    continue;
                };
                let back = self
                    .links_of(link.target)?
                    .links
                    .iter()
                    .filter(|back| back.field == endpoint.field && back.target == *member)
                    .count();
                *released.entry(*member).or_insert(0) += u32::try_from(back).unwrap_or(u32::MAX);
            }
        }
        Ok(released)
    }

    /// Unlinks a departing closure member from every far end outside the
    /// closure.
    pub(super) fn release_endpoints(
        &mut self,
        mut txn: Option<&mut Transaction>,
        id: ObjectId,
        members: &HashSet<ObjectId>,
    ) -> CoreResult<()> {
        if self.endpoints.is_empty() {
            return Ok(());
        }
        let node = self.proxy(id)?.node();
        for link in self.links_of(id)?.links {
            if members.contains(&link.target) {
                continue;
            }
            if let Some(endpoint) = self.endpoint(node, link.field) {
                self.unlink_endpoint(txn.as_deref_mut(), link.target, endpoint.field, id)?;
            }
        }
        Ok(())
    }

    fn link_endpoint(
        &mut self,
        mut txn: Option<&mut Transaction>,
        target: ObjectId,
        field: &str,
        id: ObjectId,
        back_field: &'static str,
    ) -> CoreResult<()> {
        if target == id || !self.contains(target) {
            return Ok(());
        }
        let pre_image = self.pre_image(txn.as_deref(), target)?;
        let (entry, object) = self.object_mut(target)?;
        let change = (entry.link_endpoint)(object, field, id)?;
        if change == EndpointChange::Unchanged {
            return Ok(());
        }
        self.record_touch(txn.as_deref_mut(), target, pre_image)?;
        if let Ok(proxy) = self.proxy_mut(id) {
            proxy.increment();
        }
        if let EndpointChange::Replaced(previous) = change {
            if let Ok(proxy) = self.proxy_mut(previous) {
                proxy.decrement();
            }
            self.unlink_endpoint(txn, previous, back_field, target)?;
        }
        trace!(%target, %id, field, "linked endpoint");
        self.notify(ObjectEvent::Update, target);
        Ok(())
    }

    fn unlink_endpoint(
        &mut self,
        txn: Option<&mut Transaction>,
        target: ObjectId,
        field: &str,
        id: ObjectId,
    ) -> CoreResult<()> {
        if target == id || !self.contains(target) {
            return Ok(());
        }
        let pre_image = self.pre_image(txn.as_deref(), target)?;
        let (entry, object) = self.object_mut(target)?;
        let removed = (entry.unlink_endpoint)(object, field, id)?;
        if removed == 0 {
            return Ok(());
        }
        self.record_touch(txn, target, pre_image)?;
        if let Ok(proxy) = self.proxy_mut(id) {
            proxy.apply_delta(-i64::from(removed));
        }
        trace!(%target, %id, field, "unlinked endpoint");
        self.notify(ObjectEvent::Update, target);
        Ok(())
    }

    /// Backup of an object the transaction has not covered yet.
    fn pre_image(
        &mut self,
        txn: Option<&Transaction>,
        id: ObjectId,
    ) -> CoreResult<Option<ByteBuffer>> {
        match txn {
            Some(txn) if !txn.log.contains(id) => {
                let mut backup = ByteBuffer::with_capacity(self.config.backup_capacity);
                let (entry, object) = self.object_mut(id)?;
                (entry.backup)(object, &mut backup)?;
                Ok(Some(backup))
            }
            _ => Ok(None),
        }
    }

    fn record_touch(
        &mut self,
        txn: Option<&mut Transaction>,
        id: ObjectId,
        pre_image: Option<ByteBuffer>,
    ) -> CoreResult<()> {
        if let (Some(txn), Some(backup)) = (txn, pre_image) {
            let (type_name, table) = self.names(self.proxy(id)?.node())?;
            if txn
                .log
                .record_update(&type_name, &table.unwrap_or_default(), id, backup)
            {
                trace!(%id, type_name = %type_name, "recorded endpoint update");
            }
        }
        Ok(())
    }
}

fn holds(links: &[Link], link: &Link) -> bool {
    links
        .iter()
        .any(|other| other.field == link.field && other.target == link.target)
}
