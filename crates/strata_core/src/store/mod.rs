//! The object store.

mod keys;
mod relations;

use crate::action::{Action, ActionLog, DeleteAction, UpdateAction};
use crate::backend::Backend;
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectPtr, Persistent};
use crate::observer::{self, ErasedObserver, ObjectEvent, StoreObserver};
use crate::prototype::{PrototypeTree, View};
use crate::proxy::{ObjectProxy, ProxyHandle};
use crate::registry::{Erased, Link, LinkSet, TypeRegistry, TypeRegistryEntry};
use crate::sequencer::Sequencer;
use crate::transaction::Transaction;
use crate::types::{Cascade, NodeId, ObjectId, TransactionId};
use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use strata_codec::{ByteBuffer, Row, Value};
use keys::KeyIndex;
use relations::Endpoint;
use tracing::{debug, trace, warn};

/// Owner of every live persistent object.
///
/// The store keeps the prototype tree of attached types, one proxy per
/// live object, and the stack of begun transactions. Objects are reached
/// through [`ObjectPtr`] handles, which carry only the id.
///
/// Mutations made directly on the store are not recorded anywhere; they
/// are rejected while a transaction is active. Use the current
/// [`Transaction`] instead.
///
/// ```
/// use strata_core::{CoreResult, FieldVisitor, ObjectStore, Persistent};
///
/// #[derive(Default)]
/// struct Track {
///     id: u64,
///     title: String,
/// }
///
/// impl Persistent for Track {
///     fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
///         v.on_primary_key("id", &mut self.id)?;
///         v.on_attribute("title", &mut self.title)
///     }
/// }
///
/// let mut store = ObjectStore::new();
/// store.attach::<Track>("track", None, false).unwrap();
///
/// let ptr = store.insert(Track { id: 0, title: "Intro".into() }).unwrap();
/// assert_eq!(store.get(ptr).unwrap().id, ptr.id().as_u64());
/// assert_eq!(store.view("track", true).unwrap().len(), 1);
/// ```
pub struct ObjectStore {
    config: StoreConfig,
    tree: PrototypeTree,
    registry: TypeRegistry,
    ids: HashMap<ObjectId, ProxyHandle>,
    sequencer: Sequencer,
    transactions: Vec<TransactionId>,
    observers: HashMap<NodeId, Vec<Box<dyn ErasedObserver>>>,
    endpoints: HashMap<(NodeId, &'static str), Endpoint>,
    keys: KeyIndex,
}

impl ObjectStore {
    /// Creates an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            sequencer: Sequencer::new(config.first_id),
            config,
            tree: PrototypeTree::new(),
            registry: TypeRegistry::default(),
            ids: HashMap::new(),
            transactions: Vec::new(),
            observers: HashMap::new(),
            endpoints: HashMap::new(),
            keys: KeyIndex::default(),
        }
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The attached types.
    #[must_use]
    pub fn prototypes(&self) -> &PrototypeTree {
        &self.tree
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// Attaches the Rust type `T` under `name`.
    ///
    /// With a `parent`, instances of `T` also show up in the parent's
    /// polymorphic views. Abstract types cannot be instantiated and have no
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateType`] if `name` or `T` is already
    /// attached, and [`CoreError::UnknownType`] if `parent` is not.
    pub fn attach<T: Persistent>(
        &mut self,
        name: &str,
        parent: Option<&str>,
        is_abstract: bool,
    ) -> CoreResult<NodeId> {
        self.attach_with::<T>(name, parent, is_abstract, Vec::new())
    }

    /// Attaches `T` like [`ObjectStore::attach`] and registers observers
    /// for it.
    ///
    /// Each observer hears `on_attach` once the type is attached, then
    /// every insert, update and delete of an instance of exactly `T`.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectStore::attach`].
    pub fn attach_with<T: Persistent>(
        &mut self,
        name: &str,
        parent: Option<&str>,
        is_abstract: bool,
        observers: Vec<Box<dyn StoreObserver<T>>>,
    ) -> CoreResult<NodeId> {
        let node = self
            .tree
            .attach(name, TypeId::of::<T>(), type_name::<T>(), parent, is_abstract)?;
        self.registry.register::<T>(node);
        let mut observers: Vec<Box<dyn ErasedObserver>> =
            observers.into_iter().map(observer::erase).collect();
        if let Some(attached) = self.tree.node(node) {
            for observer in &mut observers {
                observer.on_attach(attached);
            }
        }
        if !observers.is_empty() {
            self.observers.insert(node, observers);
        }
        debug!(
            type_name = name,
            parent = parent.unwrap_or("-"),
            is_abstract,
            "attached type"
        );
        Ok(node)
    }

    /// Detaches a type, removing its live objects from the store.
    ///
    /// Backend rows are left alone. Relations elsewhere that still point at
    /// a removed object read as dangling.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HasChildren`] while subtypes are attached,
    /// [`CoreError::UnknownType`] if `name` is not attached, and
    /// [`CoreError::InvalidState`] while a transaction is active.
    pub fn detach(&mut self, name: &str) -> CoreResult<()> {
        self.ensure_no_transaction("detach")?;
        let node = self
            .tree
            .find(name)
            .ok_or_else(|| CoreError::unknown_type(name))?;
        if !node.children().is_empty() {
            return Err(CoreError::HasChildren {
                name: name.to_string(),
                children: node.children().len(),
            });
        }
        let node_id = node.id();
        let doomed: Vec<ObjectId> = self.tree.view(node_id, true)?.ids().collect();
        for id in &doomed {
            self.drop_object(*id)?;
        }
        if let Some(mut observers) = self.observers.remove(&node_id) {
            if let Some(detached) = self.tree.node(node_id) {
                for observer in &mut observers {
                    observer.on_detach(detached);
                }
            }
        }
        self.unbind_node(node_id);
        self.tree.detach(node_id)?;
        self.registry.unregister(node_id);
        debug!(type_name = name, removed = doomed.len(), "detached type");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if `id` is live.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.ids.contains_key(&id)
    }

    /// The last id handed out.
    #[must_use]
    pub fn last_id(&self) -> ObjectId {
        ObjectId::new(self.sequencer.current())
    }

    /// Typed access to an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if the object is gone and
    /// [`CoreError::TypeMismatch`] if it is not a `T`.
    pub fn get<T: Persistent>(&self, ptr: ObjectPtr<T>) -> CoreResult<&T> {
        self.proxy(ptr.id())?
            .downcast::<T>()
            .ok_or(CoreError::TypeMismatch {
                id: ptr.id(),
                expected: type_name::<T>(),
            })
    }

    /// A typed handle for `id`, checking that the object is a `T`.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectStore::get`].
    pub fn ptr<T: Persistent>(&self, id: ObjectId) -> CoreResult<ObjectPtr<T>> {
        let ptr = ObjectPtr::new(id);
        self.get(ptr)?;
        Ok(ptr)
    }

    /// The proxy of a live object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if `id` is not live.
    pub fn proxy(&self, id: ObjectId) -> CoreResult<&ObjectProxy> {
        self.handle(id)
            .ok()
            .and_then(|handle| self.tree.arena.get(handle))
            .ok_or(CoreError::UnknownObject { id })
    }

    /// View of a type's live objects.
    ///
    /// With `skip_siblings` only instances of exactly this type are
    /// visited; otherwise instances of every subtype follow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if `name` is not attached.
    pub fn view(&self, name: &str, skip_siblings: bool) -> CoreResult<View<'_>> {
        let node = self
            .tree
            .find(name)
            .ok_or_else(|| CoreError::unknown_type(name))?;
        self.tree.view(node.id(), skip_siblings)
    }

    /// View of the live objects of the type `T` is attached as.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if `T` is not attached.
    pub fn view_of<T: Persistent>(&self, skip_siblings: bool) -> CoreResult<View<'_>> {
        let entry = self.registry.get::<T>()?;
        self.tree.view(entry.node, skip_siblings)
    }

    /// Every live object, in list order.
    #[must_use]
    pub fn objects(&self) -> View<'_> {
        self.tree.all()
    }

    // ------------------------------------------------------------------
    // Reference counts
    // ------------------------------------------------------------------

    /// Number of relation fields pointing at an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if `id` is not live.
    pub fn ref_count(&self, id: ObjectId) -> CoreResult<u32> {
        Ok(self.proxy(id)?.ref_count())
    }

    /// Adds an external reference to an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if `id` is not live.
    pub fn increment_reference(&mut self, id: ObjectId) -> CoreResult<u32> {
        Ok(self.proxy_mut(id)?.increment())
    }

    /// Drops a reference to an object. The count never goes below zero.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if `id` is not live.
    pub fn decrement_reference(&mut self, id: ObjectId) -> CoreResult<u32> {
        Ok(self.proxy_mut(id)?.decrement())
    }

    // ------------------------------------------------------------------
    // Backend support
    // ------------------------------------------------------------------

    /// Named column values of an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if `id` is not live.
    pub fn row(&mut self, id: ObjectId) -> CoreResult<Row> {
        let (entry, object) = self.object_mut(id)?;
        (entry.row)(object)
    }

    /// The logical primary key of an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`] if `id` is not live.
    pub fn identifier(&mut self, id: ObjectId) -> CoreResult<Option<Value>> {
        let (entry, object) = self.object_mut(id)?;
        (entry.resolve_identifier)(object)
    }

    /// Creates the table of every concrete type, parents first.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub fn create_tables(&self, backend: &mut dyn Backend) -> CoreResult<()> {
        for node in self.tree.iter().filter(|node| !node.is_abstract()) {
            backend.create_table(node)?;
            backend.visit_create(node)?;
        }
        Ok(())
    }

    /// Drops the table of every concrete type, children first.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub fn drop_tables(&self, backend: &mut dyn Backend) -> CoreResult<()> {
        let nodes: Vec<_> = self.tree.iter().filter(|node| !node.is_abstract()).collect();
        for node in nodes.into_iter().rev() {
            backend.drop_table(node)?;
            backend.visit_drop(node)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Id of the transaction allowed to mutate the store.
    #[must_use]
    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.transactions.last().copied()
    }

    /// Number of begun transactions, paused ones included.
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.transactions.len()
    }

    /// Creates and begins a transaction.
    ///
    /// The transaction must end through [`Transaction::commit`] or
    /// [`Transaction::rollback`]. Dropping it while begun takes its log
    /// with it: the store keeps it as current and rejects every other
    /// mutation until [`ObjectStore::abandon_transaction`] is called.
    ///
    /// # Errors
    ///
    /// See [`Transaction::begin`].
    pub fn begin(&mut self) -> CoreResult<Transaction> {
        let mut txn = Transaction::new();
        txn.begin(self)?;
        Ok(txn)
    }

    /// Forgets the current transaction after its value was dropped.
    ///
    /// Nothing is undone: objects stay as the lost transaction left them,
    /// and the transaction it paused becomes current again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if `id` is not the current
    /// transaction.
    pub fn abandon_transaction(&mut self, id: TransactionId) -> CoreResult<()> {
        self.pop_observer(id)?;
        warn!(transaction = %id, "transaction abandoned, changes kept in memory");
        Ok(())
    }

    pub(crate) fn push_observer(&mut self, id: TransactionId) -> CoreResult<()> {
        if self.transactions.len() >= self.config.max_nesting_depth {
            return Err(CoreError::invalid_state(format!(
                "transaction nesting limit of {} reached",
                self.config.max_nesting_depth
            )));
        }
        self.transactions.push(id);
        Ok(())
    }

    pub(crate) fn pop_observer(&mut self, id: TransactionId) -> CoreResult<()> {
        if self.current_transaction() != Some(id) {
            return Err(CoreError::invalid_state(format!(
                "{id} is not the current transaction"
            )));
        }
        self.transactions.pop();
        Ok(())
    }

    fn ensure_no_transaction(&self, operation: &str) -> CoreResult<()> {
        match self.current_transaction() {
            Some(current) => Err(CoreError::invalid_state(format!(
                "{operation} outside of {current} while it is active"
            ))),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Inserts an object, assigning it the next id.
    ///
    /// Transient objects held by relations that cascade inserts are
    /// inserted first; every related object gains a reference.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if `T` is not attached,
    /// [`CoreError::AbstractType`] if it is abstract,
    /// [`CoreError::UnknownObject`] or [`CoreError::TypeMismatch`] for bad
    /// relation targets, and [`CoreError::InvalidState`] while a
    /// transaction is active.
    pub fn insert<T: Persistent>(&mut self, object: T) -> CoreResult<ObjectPtr<T>> {
        self.ensure_no_transaction("insert")?;
        self.insert_with(None, object)
    }

    /// Changes an object in place.
    ///
    /// Relation changes move references from the old targets to the new
    /// ones. If a new target is invalid the object is restored and the
    /// error returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownObject`], [`CoreError::TypeMismatch`],
    /// relation target errors as for [`ObjectStore::insert`], and
    /// [`CoreError::InvalidState`] while a transaction is active.
    pub fn update<T, F, R>(&mut self, ptr: ObjectPtr<T>, f: F) -> CoreResult<R>
    where
        T: Persistent,
        F: FnOnce(&mut T) -> R,
    {
        self.ensure_no_transaction("update")?;
        self.update_with(None, ptr, f)
    }

    /// Removes an object along with its remove-cascade closure.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Referenced`] if an object of the closure is
    /// referenced from outside it, [`CoreError::UnknownObject`] if the
    /// object is gone, and [`CoreError::InvalidState`] while a transaction
    /// is active.
    pub fn remove<T: Persistent>(&mut self, ptr: ObjectPtr<T>) -> CoreResult<()> {
        self.remove_id(ptr.id())
    }

    /// Removes an object by id.
    ///
    /// # Errors
    ///
    /// See [`ObjectStore::remove`].
    pub fn remove_id(&mut self, id: ObjectId) -> CoreResult<()> {
        self.ensure_no_transaction("remove")?;
        self.remove_with(None, id)
    }

    /// Removes every object, keeping the attached types.
    ///
    /// Observers hear a delete for each object. Nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] while a transaction is active.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.ensure_no_transaction("clear")?;
        let ids: Vec<ObjectId> = self.objects().ids().collect();
        for id in &ids {
            self.notify(ObjectEvent::Delete, *id);
            let handle = self.handle(*id)?;
            self.tree.unlink_object(handle);
            self.tree.arena.release(handle);
        }
        self.ids.clear();
        self.keys.clear();
        debug!(removed = ids.len(), "cleared store");
        Ok(())
    }

    /// Removes every instance of a type and of its subtypes, returning how
    /// many went.
    ///
    /// Unlike [`ObjectStore::remove`] this follows no cascades and checks
    /// no references. The references the cleared objects held are
    /// released; relations elsewhere that point at a cleared object read as
    /// dangling. Nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if `name` is not attached and
    /// [`CoreError::InvalidState`] while a transaction is active.
    pub fn clear_type(&mut self, name: &str) -> CoreResult<usize> {
        self.ensure_no_transaction("clear")?;
        let node = self
            .tree
            .find(name)
            .map(|node| node.id())
            .ok_or_else(|| CoreError::unknown_type(name))?;
        let doomed: Vec<ObjectId> = self.tree.view(node, false)?.ids().collect();
        for id in &doomed {
            self.drop_object(*id)?;
        }
        debug!(type_name = name, removed = doomed.len(), "cleared type");
        Ok(doomed.len())
    }

    /// Adopts an object under the id it already has, as when reading it
    /// back from a backend.
    ///
    /// The id sequencer is raised to `id`, so later inserts never reuse
    /// it. Relation targets must already be live: load referenced objects
    /// first. Transient related objects get fresh ids as with
    /// [`ObjectStore::insert`]. Nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for the transient id, for an id
    /// that is already live and while a transaction is active, plus the
    /// errors of [`ObjectStore::insert`].
    pub fn load<T: Persistent>(&mut self, id: ObjectId, object: T) -> CoreResult<ObjectPtr<T>> {
        self.ensure_no_transaction("load")?;
        if id.is_transient() {
            return Err(CoreError::invalid_state("cannot load an object under id 0"));
        }
        if self.contains(id) {
            return Err(CoreError::invalid_state(format!("{id} is already live")));
        }
        self.adopt(None, Some(id), object)
    }

    pub(crate) fn insert_with<T: Persistent>(
        &mut self,
        txn: Option<&mut Transaction>,
        object: T,
    ) -> CoreResult<ObjectPtr<T>> {
        self.adopt(txn, None, object)
    }

    /// Stores an object under `id`, or under the next id if none is given.
    ///
    /// The object and its transient related objects are validated before
    /// any id is taken or anything is linked.
    fn adopt<T: Persistent>(
        &mut self,
        mut txn: Option<&mut Transaction>,
        id: Option<ObjectId>,
        object: T,
    ) -> CoreResult<ObjectPtr<T>> {
        let (entry, type_name, table) = self.insertable::<T>()?;
        let mut object: Box<Erased> = Box::new(object);
        (entry.validate)(object.as_mut(), self)?;

        let id = match id {
            Some(id) => {
                self.sequencer.update(id.as_u64());
                id
            }
            None => ObjectId::new(self.sequencer.next()),
        };
        (entry.sync_id)(object.as_mut(), id)?;
        (entry.insert_object)(object.as_mut(), self, txn.as_deref_mut())?;

        let handle = self
            .tree
            .arena
            .alloc(ObjectProxy::object(id, entry.node, object));
        self.tree.link_object(handle)?;
        self.ids.insert(id, handle);
        if let Some(txn) = txn.as_deref_mut() {
            txn.log.record_insert(&type_name, &table, id);
        }
        self.index_key(id)?;
        let links = self.links_of(id)?.links;
        self.sync_endpoints(txn, id, &[], &links)?;
        self.notify(ObjectEvent::Insert, id);
        trace!(%id, type_name = %type_name, "inserted object");
        Ok(ObjectPtr::new(id))
    }

    /// The registry entry, type name and table of a concrete type.
    pub(crate) fn insertable<T: Persistent>(
        &self,
    ) -> CoreResult<(TypeRegistryEntry, String, String)> {
        let entry = self.registry.get::<T>()?;
        let (type_name, table) = self.names(entry.node)?;
        let table = table.ok_or(CoreError::AbstractType {
            name: type_name.clone(),
        })?;
        Ok((entry, type_name, table))
    }

    pub(crate) fn update_with<T, F, R>(
        &mut self,
        mut txn: Option<&mut Transaction>,
        ptr: ObjectPtr<T>,
        f: F,
    ) -> CoreResult<R>
    where
        T: Persistent,
        F: FnOnce(&mut T) -> R,
    {
        let id = ptr.id();
        let handle = self.handle(id)?;
        let entry = self.registry.get::<T>()?;
        if self.proxy(id)?.node() != entry.node {
            return Err(CoreError::TypeMismatch {
                id,
                expected: type_name::<T>(),
            });
        }
        let mut object = self.take_object(handle)?;
        let mut before = ByteBuffer::with_capacity(self.config.backup_capacity);
        let outcome = (|| -> CoreResult<(R, Vec<Link>, Vec<Link>)> {
            (entry.backup)(object.as_mut(), &mut before)?;
            let previous = (entry.links)(object.as_mut())?;
            let value = match object.downcast_mut::<T>() {
                Some(typed) => f(typed),
                None => {
                    return Err(CoreError::TypeMismatch {
                        id,
                        expected: type_name::<T>(),
                    })
                }
            };
            (entry.sync_id)(object.as_mut(), id)?;
            let applied = match (entry.validate)(object.as_mut(), self) {
                Ok(()) => (entry.insert_object)(object.as_mut(), self, txn.as_deref_mut()),
                Err(err) => Err(err),
            };
            if let Err(err) = applied {
                (entry.restore)(object.as_mut(), &mut before.clone())?;
                return Err(err);
            }
            self.release_links(&previous.links);
            let current = (entry.links)(object.as_mut())?;
            Ok((value, previous.links, current.links))
        })();
        self.put_object(handle, object);
        let (value, previous, current) = outcome?;

        if let Some(txn) = txn.as_deref_mut() {
            let (type_name, table) = self.names(entry.node)?;
            let table = table.unwrap_or_default();
            if txn.log.record_update(&type_name, &table, id, before) {
                trace!(%id, type_name = %type_name, "recorded update");
            }
        }
        self.index_key(id)?;
        self.sync_endpoints(txn, id, &previous, &current)?;
        self.notify(ObjectEvent::Update, id);
        Ok(value)
    }

    pub(crate) fn remove_with(
        &mut self,
        mut txn: Option<&mut Transaction>,
        id: ObjectId,
    ) -> CoreResult<()> {
        let closure = self.removal_closure(id)?;
        let members: HashSet<ObjectId> = closure.iter().copied().collect();

        let mut internal: HashMap<ObjectId, u32> = HashMap::new();
        for member in &closure {
            for link in self.links_of(*member)?.links {
                if members.contains(&link.target) {
                    *internal.entry(link.target).or_default() += 1;
                }
            }
        }
        let released = self.released_references(&closure, &members)?;
        for member in &closure {
            let ref_count = self.ref_count(*member)?;
            let accounted = internal
                .get(member)
                .copied()
                .unwrap_or(0)
                .saturating_add(released.get(member).copied().unwrap_or(0));
            if ref_count > accounted {
                return Err(CoreError::Referenced {
                    id: *member,
                    ref_count: ref_count - accounted,
                });
            }
        }

        for member in &closure {
            self.release_endpoints(txn.as_deref_mut(), *member, &members)?;
        }
        for member in closure {
            self.remove_one(txn.as_deref_mut(), member)?;
        }
        Ok(())
    }

    fn remove_one(&mut self, txn: Option<&mut Transaction>, id: ObjectId) -> CoreResult<()> {
        let handle = self.handle(id)?;
        let node = self.proxy(id)?.node();
        let entry = self.registry.for_node(node)?;
        let mut object = self.take_object(handle)?;

        if let Some(txn) = txn {
            let (type_name, table) = self.names(node)?;
            let mut backup = ByteBuffer::with_capacity(self.config.backup_capacity);
            let recorded = (entry.backup)(object.as_mut(), &mut backup)
                .and_then(|()| (entry.resolve_identifier)(object.as_mut()));
            let identifier = match recorded {
                Ok(identifier) => identifier,
                Err(err) => {
                    self.put_object(handle, object);
                    return Err(err);
                }
            };
            let outcome = txn.log.record_delete(DeleteAction {
                type_name,
                table: table.unwrap_or_default(),
                id,
                proxy: handle,
                identifier,
                backup,
            });
            trace!(%id, ?outcome, "recorded delete");
        }

        if let Some(observers) = self.observers.get_mut(&node) {
            for observer in observers {
                observer.notify(ObjectEvent::Delete, id, &*object);
            }
        }
        (entry.delete_object)(object.as_mut(), self)?;
        self.tree.unlink_object(handle);
        self.tree.arena.release(handle);
        self.ids.remove(&id);
        self.keys.remove(id);
        trace!(%id, "removed object");
        Ok(())
    }

    /// The object and every object reachable from it over relations that
    /// cascade removal, root first.
    fn removal_closure(&mut self, root: ObjectId) -> CoreResult<Vec<ObjectId>> {
        self.handle(root)?;
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            for link in self.links_of(id)?.links.into_iter().rev() {
                if link.cascade.contains(Cascade::REMOVE)
                    && self.contains(link.target)
                    && !seen.contains(&link.target)
                {
                    stack.push(link.target);
                }
            }
        }
        Ok(order)
    }

    /// Removes an object without cascade checks or recording.
    fn drop_object(&mut self, id: ObjectId) -> CoreResult<()> {
        let handle = self.handle(id)?;
        let entry = self.registry.for_node(self.proxy(id)?.node())?;
        self.notify(ObjectEvent::Delete, id);
        let mut object = self.take_object(handle)?;
        (entry.delete_object)(object.as_mut(), self)?;
        self.tree.unlink_object(handle);
        self.tree.arena.release(handle);
        self.ids.remove(&id);
        self.keys.remove(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Checks that every relation target is live and of a compatible type.
    pub(crate) fn validate_links(&self, set: &LinkSet) -> CoreResult<()> {
        if let Some(pending) = set
            .pending
            .iter()
            .find(|pending| !pending.cascade.contains(Cascade::INSERT))
        {
            return Err(CoreError::invalid_state(format!(
                "relation {} holds a transient {} but does not cascade inserts",
                pending.field, pending.target_name
            )));
        }
        for link in &set.links {
            let actual = self.proxy(link.target)?.node();
            let expected = self
                .tree
                .node_of_type(link.target_type)
                .ok_or_else(|| CoreError::unknown_type(link.target_name))?;
            if !self.tree.is_derived_from(actual, expected) {
                return Err(CoreError::TypeMismatch {
                    id: link.target,
                    expected: link.target_name,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn retain_links(&mut self, links: &[Link]) {
        for link in links {
            if let Ok(proxy) = self.proxy_mut(link.target) {
                proxy.increment();
            }
        }
    }

    /// Drops the references of `links`, skipping targets that are gone.
    pub(crate) fn release_links(&mut self, links: &[Link]) {
        for link in links {
            if let Ok(proxy) = self.proxy_mut(link.target) {
                proxy.decrement();
            }
        }
    }

    fn links_of(&mut self, id: ObjectId) -> CoreResult<LinkSet> {
        let (entry, object) = self.object_mut(id)?;
        (entry.links)(object)
    }

    // ------------------------------------------------------------------
    // Commit and rollback
    // ------------------------------------------------------------------

    /// Fills insert and update actions with the objects' current rows.
    pub(crate) fn prepare_actions(&mut self, log: &mut ActionLog) -> CoreResult<()> {
        log.retain_live(|id| self.ids.contains_key(&id));
        for action in log.actions_mut() {
            match action {
                Action::Insert(insert) => {
                    insert.rows = insert
                        .ids
                        .iter()
                        .map(|id| self.row(*id))
                        .collect::<CoreResult<_>>()?;
                }
                Action::Update(update) => update.row = self.row(update.id)?,
                Action::Delete(_) => {}
            }
        }
        Ok(())
    }

    /// Undoes `actions` newest first and rewinds the sequencer.
    ///
    /// Reference count changes are collected and applied once every object
    /// is back, so restored relations can point at objects that are only
    /// recreated later in the pass.
    pub(crate) fn rollback_actions(&mut self, actions: Vec<Action>, snapshot: u64) -> CoreResult<()> {
        let mut deltas: HashMap<ObjectId, i64> = HashMap::new();
        for action in actions.into_iter().rev() {
            match action {
                Action::Insert(insert) => {
                    for id in insert.ids.iter().rev() {
                        self.discard(*id, &mut deltas)?;
                    }
                }
                Action::Update(update) => self.restore(update, &mut deltas)?,
                Action::Delete(delete) => self.recreate(delete, &mut deltas)?,
            }
        }
        for (id, delta) in deltas {
            if let Ok(proxy) = self.proxy_mut(id) {
                proxy.apply_delta(delta);
            }
        }
        let live_max = self.ids.keys().map(|id| id.as_u64()).max().unwrap_or(0);
        self.sequencer.reset(snapshot.max(live_max));
        Ok(())
    }

    fn discard(&mut self, id: ObjectId, deltas: &mut HashMap<ObjectId, i64>) -> CoreResult<()> {
        if !self.contains(id) {
            trace!(%id, "inserted object already gone");
            return Ok(());
        }
        for link in self.links_of(id)?.links {
            *deltas.entry(link.target).or_default() -= 1;
        }
        self.notify(ObjectEvent::Delete, id);
        let handle = self.handle(id)?;
        self.tree.unlink_object(handle);
        self.tree.arena.release(handle);
        self.ids.remove(&id);
        self.keys.remove(id);
        trace!(%id, "discarded inserted object");
        Ok(())
    }

    fn restore(
        &mut self,
        mut update: UpdateAction,
        deltas: &mut HashMap<ObjectId, i64>,
    ) -> CoreResult<()> {
        let id = update.id;
        if !self.contains(id) {
            trace!(%id, "updated object already gone");
            return Ok(());
        }
        let (entry, object) = self.object_mut(id)?;
        let current = (entry.links)(object)?;
        (entry.restore)(object, &mut update.backup)?;
        let restored = (entry.links)(object)?;
        for link in current.links {
            *deltas.entry(link.target).or_default() -= 1;
        }
        for link in restored.links {
            *deltas.entry(link.target).or_default() += 1;
        }
        self.index_key(id)?;
        self.notify(ObjectEvent::Update, id);
        trace!(%id, "restored object");
        Ok(())
    }

    fn recreate(
        &mut self,
        mut delete: DeleteAction,
        deltas: &mut HashMap<ObjectId, i64>,
    ) -> CoreResult<()> {
        let id = delete.id;
        if self.contains(id) {
            return Err(CoreError::invalid_state(format!(
                "cannot recreate {id}: the id is live"
            )));
        }
        let node = self
            .tree
            .find(&delete.type_name)
            .map(|node| node.id())
            .ok_or_else(|| CoreError::unknown_type(delete.type_name.clone()))?;
        let entry = self.registry.for_node(node)?;

        let mut object = (entry.create)();
        (entry.restore)(object.as_mut(), &mut delete.backup)?;
        (entry.sync_id)(object.as_mut(), id)?;
        for link in (entry.links)(object.as_mut())?.links {
            *deltas.entry(link.target).or_default() += 1;
        }

        let handle = self.tree.arena.alloc(ObjectProxy::object(id, node, object));
        self.tree.link_object(handle)?;
        self.ids.insert(id, handle);
        self.index_key(id)?;
        self.notify(ObjectEvent::Insert, id);
        trace!(%id, "recreated removed object");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    fn handle(&self, id: ObjectId) -> CoreResult<ProxyHandle> {
        self.ids
            .get(&id)
            .copied()
            .ok_or(CoreError::UnknownObject { id })
    }

    fn proxy_mut(&mut self, id: ObjectId) -> CoreResult<&mut ObjectProxy> {
        let handle = self.handle(id)?;
        self.tree
            .arena
            .get_mut(handle)
            .ok_or(CoreError::UnknownObject { id })
    }

    fn object_mut(&mut self, id: ObjectId) -> CoreResult<(TypeRegistryEntry, &mut Erased)> {
        let node = self.proxy(id)?.node();
        let entry = self.registry.for_node(node)?;
        let object = self
            .proxy_mut(id)?
            .object_mut()
            .ok_or_else(|| CoreError::invalid_state(format!("{id} is being mutated")))?;
        Ok((entry, object))
    }

    /// Tells the observers of an object's type about it.
    fn notify(&mut self, event: ObjectEvent, id: ObjectId) {
        let Some(proxy) = self.ids.get(&id).and_then(|handle| self.tree.arena.get(*handle)) else {
            return;
        };
        let (Some(observers), Some(object)) =
            (self.observers.get_mut(&proxy.node()), proxy.object_ref())
        else {
            return;
        };
        for observer in observers {
            observer.notify(event, id, object);
        }
    }

    fn take_object(&mut self, handle: ProxyHandle) -> CoreResult<Box<Erased>> {
        self.tree
            .arena
            .get_mut(handle)
            .and_then(ObjectProxy::take_object)
            .ok_or_else(|| CoreError::invalid_state(format!("{handle} holds no object")))
    }

    fn put_object(&mut self, handle: ProxyHandle, object: Box<Erased>) {
        if let Some(proxy) = self.tree.arena.get_mut(handle) {
            proxy.put_object(object);
        }
    }

    fn names(&self, node: NodeId) -> CoreResult<(String, Option<String>)> {
        let node = self
            .tree
            .node(node)
            .ok_or_else(|| CoreError::unknown_type(node.to_string()))?;
        Ok((
            node.name().to_string(),
            node.table_name().map(str::to_string),
        ))
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("types", &self.tree)
            .field("objects", &self.ids.len())
            .field("last_id", &self.sequencer.current())
            .field("transactions", &self.transactions)
            .field("bound_fields", &self.endpoints.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailPoint, InMemoryBackend, NullBackend};
    use crate::object::{FieldVisitor, HasMany, Ref};
    use crate::transaction::TransactionState;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Album {
        id: u64,
        title: String,
        tracks: HasMany<Track>,
    }

    impl Persistent for Album {
        fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
            v.on_primary_key("id", &mut self.id)?;
            v.on_attribute("title", &mut self.title)?;
            v.on_has_many("tracks", &mut self.tracks, Cascade::ALL)
        }
    }

    #[derive(Default)]
    struct Track {
        id: u64,
        title: String,
        album: Ref<Album>,
    }

    impl Persistent for Track {
        fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
            v.on_primary_key("id", &mut self.id)?;
            v.on_attribute("title", &mut self.title)?;
            v.on_belongs_to("album", &mut self.album, Cascade::NONE)
        }
    }

    #[derive(Default)]
    struct Person {
        id: u64,
        name: String,
    }

    impl Persistent for Person {
        fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
            v.on_primary_key("id", &mut self.id)?;
            v.on_attribute("name", &mut self.name)
        }
    }

    #[derive(Default)]
    struct Student {
        id: u64,
        name: String,
        school: String,
    }

    impl Persistent for Student {
        fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
            v.on_primary_key("id", &mut self.id)?;
            v.on_attribute("name", &mut self.name)?;
            v.on_attribute("school", &mut self.school)
        }
    }

    #[derive(Default)]
    struct Employee {
        id: u64,
        name: String,
        salary: i64,
    }

    impl Persistent for Employee {
        fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
            v.on_primary_key("id", &mut self.id)?;
            v.on_attribute("name", &mut self.name)?;
            v.on_attribute("salary", &mut self.salary)
        }
    }

    #[derive(Default)]
    struct Tag {
        name: String,
    }

    impl Persistent for Tag {
        fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
            v.on_primary_key("name", &mut self.name)
        }
    }

    #[derive(Clone, Default)]
    struct Journal(std::sync::Arc<parking_lot::Mutex<Vec<String>>>);

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl StoreObserver<Track> for Journal {
        fn on_attach(&mut self, node: &crate::prototype::PrototypeNode) {
            self.0.lock().push(format!("attach {}", node.name()));
        }

        fn on_detach(&mut self, node: &crate::prototype::PrototypeNode) {
            self.0.lock().push(format!("detach {}", node.name()));
        }

        fn on_insert(&mut self, _id: ObjectId, track: &Track) {
            self.0.lock().push(format!("insert {}", track.title));
        }

        fn on_update(&mut self, _id: ObjectId, track: &Track) {
            self.0.lock().push(format!("update {}", track.title));
        }

        fn on_delete(&mut self, _id: ObjectId, track: &Track) {
            self.0.lock().push(format!("delete {}", track.title));
        }
    }

    fn track(title: &str) -> Track {
        Track {
            title: title.into(),
            ..Track::default()
        }
    }

    fn album(title: &str, tracks: &[&str]) -> Album {
        let mut album = Album {
            title: title.into(),
            ..Album::default()
        };
        for title in tracks {
            album.tracks.push_pending(track(title));
        }
        album
    }

    fn music_store() -> ObjectStore {
        let mut store = ObjectStore::new();
        store.attach::<Album>("album", None, false).unwrap();
        store.attach::<Track>("track", None, false).unwrap();
        store
    }

    fn people_store() -> ObjectStore {
        let mut store = ObjectStore::new();
        store.attach::<Person>("person", None, true).unwrap();
        store.attach::<Student>("student", Some("person"), false).unwrap();
        store.attach::<Employee>("employee", Some("person"), false).unwrap();
        store.attach::<Track>("track", None, false).unwrap();
        store
    }

    fn bound_music_store() -> ObjectStore {
        let mut store = music_store();
        store.bind::<Track, Album>("album", "tracks").unwrap();
        store
    }

    fn homeless(title: &str) -> Track {
        Track {
            title: title.into(),
            album: Ref::pending(Album::default()),
            ..Track::default()
        }
    }

    fn open_backend(store: &ObjectStore) -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        backend.open("memory").unwrap();
        store.create_tables(&mut backend).unwrap();
        backend
    }

    #[test]
    fn insert_assigns_ids_and_syncs_key() {
        let mut store = music_store();
        let a = store.insert(track("a")).unwrap();
        let b = store.insert(track("b")).unwrap();

        assert_eq!(a.id(), ObjectId::new(1));
        assert_eq!(b.id(), ObjectId::new(2));
        assert_eq!(store.get(b).unwrap().id, 2);
        assert_eq!(store.last_id(), ObjectId::new(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.view("track", true).unwrap().len(), 2);
    }

    #[test]
    fn first_id_comes_from_config() {
        let mut store = ObjectStore::with_config(StoreConfig::new().first_id(100));
        store.attach::<Track>("track", None, false).unwrap();
        let ptr = store.insert(track("a")).unwrap();
        assert_eq!(ptr.id(), ObjectId::new(100));
    }

    #[test]
    fn insert_rejects_unknown_and_abstract_types() {
        let mut store = people_store();
        assert!(matches!(
            store.insert(Person::default()),
            Err(CoreError::AbstractType { .. })
        ));
        assert!(matches!(
            store.insert(Album::default()),
            Err(CoreError::UnknownType { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn typed_access_checks_type() {
        let mut store = music_store();
        let ptr = store.insert(track("a")).unwrap();
        let wrong: ObjectPtr<Album> = ptr.cast();

        assert!(matches!(store.get(wrong), Err(CoreError::TypeMismatch { .. })));
        assert!(store.ptr::<Track>(ptr.id()).is_ok());
        assert!(matches!(
            store.ptr::<Track>(ObjectId::new(99)),
            Err(CoreError::UnknownObject { .. })
        ));
    }

    #[test]
    fn polymorphic_views() {
        let mut store = people_store();
        store.insert(Student::default()).unwrap();
        store.insert(Employee::default()).unwrap();
        store.insert(Student::default()).unwrap();
        store.insert(track("t")).unwrap();

        let students: Vec<u64> = store
            .view("student", true)
            .unwrap()
            .ids()
            .map(ObjectId::as_u64)
            .collect();
        assert_eq!(students, vec![1, 3]);
        assert_eq!(store.view("person", false).unwrap().len(), 3);
        assert!(store.view("person", true).unwrap().is_empty());
        assert_eq!(store.view_of::<Employee>(true).unwrap().len(), 1);
        assert_eq!(store.objects().len(), 4);
        assert!(matches!(store.view("robot", false), Err(CoreError::UnknownType { .. })));
    }

    #[test]
    fn pending_relations_are_inserted_first() {
        let mut store = music_store();
        let ptr = store.insert(album("Blue", &["a", "b"])).unwrap();

        let tracks = store.get(ptr).unwrap().tracks.ids();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|id| *id > ptr.id()));
        for id in tracks {
            assert_eq!(store.ref_count(id).unwrap(), 1);
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn pending_relation_without_insert_cascade_is_rejected() {
        let mut store = music_store();
        let orphan = Track {
            album: Ref::pending(Album::default()),
            ..Track::default()
        };
        let result = store.insert(orphan);
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn links_are_validated() {
        let mut store = music_store();
        let t = store.insert(track("a")).unwrap();

        let dangling = Track {
            album: Ref::to(ObjectPtr::new(ObjectId::new(42))),
            ..Track::default()
        };
        assert!(matches!(
            store.insert(dangling),
            Err(CoreError::UnknownObject { .. })
        ));

        let mistyped = Track {
            album: Ref::to(t.cast()),
            ..Track::default()
        };
        assert!(matches!(
            store.insert(mistyped),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert_eq!(store.ref_count(t.id()).unwrap(), 0);
    }

    #[test]
    fn update_moves_references() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let b = store.insert(album("B", &[])).unwrap();
        let t = store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();
        assert_eq!(store.ref_count(a.id()).unwrap(), 1);

        store.update(t, |track| track.album.set(b)).unwrap();
        assert_eq!(store.ref_count(a.id()).unwrap(), 0);
        assert_eq!(store.ref_count(b.id()).unwrap(), 1);
    }

    #[test]
    fn failed_update_restores_object() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let t = store
            .insert(Track {
                title: "before".into(),
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();

        let result = store.update(t, |track| {
            track.title = "after".into();
            track.album.set(ObjectPtr::new(ObjectId::new(77)));
        });
        assert!(matches!(result, Err(CoreError::UnknownObject { .. })));

        let track = store.get(t).unwrap();
        assert_eq!(track.title, "before");
        assert_eq!(track.album.id(), Some(a.id()));
        assert_eq!(store.ref_count(a.id()).unwrap(), 1);
    }

    #[test]
    fn remove_of_referenced_object_fails() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();

        assert!(matches!(
            store.remove(a),
            Err(CoreError::Referenced { ref_count: 1, .. })
        ));
        assert!(store.contains(a.id()));
    }

    #[test]
    fn remove_cascades_through_owned_relations() {
        let mut store = music_store();
        let a = store.insert(album("A", &["x", "y"])).unwrap();
        store.insert(track("loose")).unwrap();

        store.remove(a).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.view("track", true).unwrap().len(), 1);
        assert!(store.view("album", true).unwrap().is_empty());
    }

    #[test]
    fn cascade_closure_counts_internal_references() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let t = store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();
        store.update(a, |album| album.tracks.push(t)).unwrap();

        assert!(matches!(store.remove(t), Err(CoreError::Referenced { .. })));
        store.remove(a).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn reference_counts_saturate() {
        let mut store = music_store();
        let t = store.insert(track("a")).unwrap();
        assert_eq!(store.increment_reference(t.id()).unwrap(), 1);
        assert_eq!(store.decrement_reference(t.id()).unwrap(), 0);
        assert_eq!(store.decrement_reference(t.id()).unwrap(), 0);
    }

    #[test]
    fn row_and_identifier() {
        let mut store = music_store();
        let t = store.insert(track("a")).unwrap();
        let row = store.row(t.id()).unwrap();
        assert_eq!(row.get("title"), Some(&Value::Text("a".into())));
        assert_eq!(row.get("album"), Some(&Value::Null));
        assert_eq!(
            store.identifier(t.id()).unwrap(),
            Some(Value::Unsigned(t.id().as_u64()))
        );
    }

    #[test]
    fn detach_drops_objects_and_dangles_relations() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let t = store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();

        store.detach("track").unwrap();
        assert!(store.prototypes().find("track").is_none());
        assert!(!store.contains(t.id()));
        assert_eq!(store.ref_count(a.id()).unwrap(), 0);
        assert!(matches!(store.insert(track("b")), Err(CoreError::UnknownType { .. })));

        store.attach::<Track>("track", None, false).unwrap();
        assert!(store.insert(track("b")).is_ok());
    }

    #[test]
    fn detach_requires_leaf() {
        let mut store = people_store();
        assert!(matches!(
            store.detach("person"),
            Err(CoreError::HasChildren { children: 2, .. })
        ));
        store.detach("student").unwrap();
        store.detach("employee").unwrap();
        store.detach("person").unwrap();
        assert_eq!(store.prototypes().len(), 1);
    }

    #[test]
    fn clear_keeps_types() {
        let mut store = music_store();
        store.insert(album("A", &["x"])).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(store.view("album", false).unwrap().is_empty());
        assert_eq!(store.prototypes().len(), 2);
    }

    #[test]
    fn tables_follow_concrete_types() {
        let store = people_store();
        let mut backend = open_backend(&store);
        assert!(backend.has_table("student"));
        assert!(!backend.has_table("person"));

        store.drop_tables(&mut backend).unwrap();
        assert!(!backend.has_table("student"));
    }

    #[test]
    fn direct_mutation_is_rejected_during_transaction() {
        let mut store = music_store();
        let t = store.insert(track("a")).unwrap();
        let mut txn = store.begin().unwrap();

        assert!(matches!(store.insert(track("b")), Err(CoreError::InvalidState { .. })));
        assert!(matches!(
            store.update(t, |track| track.title.clear()),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(store.remove(t), Err(CoreError::InvalidState { .. })));
        assert!(matches!(store.detach("track"), Err(CoreError::InvalidState { .. })));

        txn.rollback(&mut store).unwrap();
        assert!(store.insert(track("b")).is_ok());
    }

    #[test]
    fn commit_writes_rows() {
        let mut store = music_store();
        let mut backend = open_backend(&store);

        let mut txn = store.begin().unwrap();
        let a = txn.insert(&mut store, track("a")).unwrap();
        let b = txn.insert(&mut store, track("b")).unwrap();
        txn.update(&mut store, a, |track| track.title = "a2".into())
            .unwrap();
        txn.commit(&mut store, &mut backend).unwrap();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(backend.ids("track"), vec![a.id().as_u64(), b.id().as_u64()]);
        let row = backend.row("track", a.id().as_u64()).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::Text("a2".into())));

        let mut txn = store.begin().unwrap();
        txn.update(&mut store, b, |track| track.title = "b2".into())
            .unwrap();
        txn.remove(&mut store, a).unwrap();
        txn.commit(&mut store, &mut backend).unwrap();

        assert_eq!(backend.ids("track"), vec![b.id().as_u64()]);
        let row = backend.row("track", b.id().as_u64()).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::Text("b2".into())));
    }

    #[test]
    fn rollback_restores_everything() {
        let mut store = music_store();
        let a = store.insert(album("A", &["x", "y"])).unwrap();
        let loose = store.insert(track("loose")).unwrap();
        let last = store.last_id();

        let mut txn = store.begin().unwrap();
        txn.insert(
            &mut store,
            Track {
                album: Ref::to(a),
                ..Track::default()
            },
        )
        .unwrap();
        txn.update(&mut store, loose, |track| {
            track.title = "changed".into();
            track.album.set(a);
        })
        .unwrap();
        txn.remove(&mut store, a).unwrap_err();
        assert_eq!(store.ref_count(a.id()).unwrap(), 2);
        txn.rollback(&mut store).unwrap();

        assert_eq!(store.last_id(), last);
        assert_eq!(store.len(), 4);
        assert_eq!(store.ref_count(a.id()).unwrap(), 0);
        let restored = store.get(loose).unwrap();
        assert_eq!(restored.title, "loose");
        assert!(restored.album.is_null());
    }

    #[test]
    fn rollback_recreates_removed_closure() {
        let mut store = music_store();
        let a = store.insert(album("A", &["x", "y"])).unwrap();
        let tracks = store.get(a).unwrap().tracks.ids();

        let mut txn = store.begin().unwrap();
        txn.remove(&mut store, a).unwrap();
        assert!(store.is_empty());
        assert_eq!(txn.log().len(), 3);
        txn.rollback(&mut store).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(a).unwrap().title, "A");
        assert_eq!(store.get(a).unwrap().tracks.ids(), tracks);
        for id in tracks {
            assert_eq!(store.ref_count(id).unwrap(), 1);
            assert_eq!(store.ptr::<Track>(id).map(|ptr| ptr.id()).unwrap(), id);
        }
    }

    #[test]
    fn delete_after_update_restores_original() {
        let mut store = music_store();
        let t = store.insert(track("original")).unwrap();

        let mut txn = store.begin().unwrap();
        txn.update(&mut store, t, |track| track.title = "edited".into())
            .unwrap();
        txn.remove(&mut store, t).unwrap();
        assert_eq!(txn.log().count(crate::action::ActionKind::Delete), 1);
        assert_eq!(txn.log().len(), 1);
        txn.rollback(&mut store).unwrap();

        assert_eq!(store.get(t).unwrap().title, "original");
    }

    #[test]
    fn failed_commit_keeps_transaction_current() {
        let mut store = music_store();
        let mut backend = open_backend(&store);
        backend.fail_on(FailPoint::Insert);

        let mut txn = store.begin().unwrap();
        let t = txn.insert(&mut store, track("a")).unwrap();
        let result = txn.commit(&mut store, &mut backend);

        assert!(matches!(result, Err(CoreError::CommitFailed { .. })));
        assert_eq!(txn.state(), TransactionState::Begun);
        assert_eq!(store.current_transaction(), Some(txn.id()));
        assert!(store.contains(t.id()));
        assert_eq!(backend.row_count("track"), 0);

        backend.clear_failure();
        txn.commit(&mut store, &mut backend).unwrap();
        assert_eq!(backend.row_count("track"), 1);
    }

    #[test]
    fn failed_commit_then_rollback() {
        let mut store = music_store();
        let mut backend = open_backend(&store);
        backend.fail_on(FailPoint::Commit);

        let mut txn = store.begin().unwrap();
        txn.insert(&mut store, track("a")).unwrap();
        assert!(txn.commit(&mut store, &mut backend).is_err());
        txn.rollback(&mut store).unwrap();

        assert!(store.is_empty());
        assert_eq!(backend.row_count("track"), 0);
        assert_eq!(store.current_transaction(), None);
    }

    #[test]
    fn nested_transactions() {
        let mut store = music_store();
        let mut backend = NullBackend::new();

        let mut parent = store.begin().unwrap();
        let kept = parent.insert(&mut store, track("kept")).unwrap();
        let dropped = parent.insert(&mut store, track("dropped")).unwrap();

        let mut child = store.begin().unwrap();
        assert!(parent.insert(&mut store, track("x")).is_err());
        child.remove(&mut store, dropped).unwrap();
        child.commit(&mut store, &mut backend).unwrap();

        parent.commit(&mut store, &mut backend).unwrap();
        let logged: Vec<ObjectId> = parent.log().iter().flat_map(|a| a.ids()).collect();
        assert_eq!(logged, vec![kept.id()]);
    }

    #[test]
    fn nested_rollback_then_parent_rollback() {
        let mut store = music_store();

        let mut parent = store.begin().unwrap();
        parent.insert(&mut store, track("a")).unwrap();

        let mut child = store.begin().unwrap();
        child.insert(&mut store, track("b")).unwrap();
        child.rollback(&mut store).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.last_id(), ObjectId::new(1));

        parent.rollback(&mut store).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.last_id(), ObjectId::new(0));
    }

    #[test]
    fn failed_cascade_insert_leaves_nothing_behind() {
        let mut store = music_store();
        let last = store.last_id();
        let mut blue = album("Blue", &["fine"]);
        blue.tracks.push_pending(homeless("orphan"));

        assert!(matches!(store.insert(blue), Err(CoreError::InvalidState { .. })));
        assert!(store.is_empty());
        assert_eq!(store.last_id(), last);
        assert_eq!(store.insert(track("next")).unwrap().id(), ObjectId::new(1));

        let mut red = album("Red", &["fine"]);
        red.tracks.push_pending(homeless("orphan"));
        let mut txn = store.begin().unwrap();
        assert!(txn.insert(&mut store, red).is_err());
        assert!(txn.log().is_empty());
        txn.rollback(&mut store).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.last_id(), ObjectId::new(1));
    }

    #[test]
    fn failed_update_inserts_no_pending_children() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let last = store.last_id();

        let result = store.update(a, |album| {
            album.title = "B".into();
            album.tracks.push_pending(track("fine"));
            album.tracks.push_pending(homeless("orphan"));
        });
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.last_id(), last);
        assert_eq!(store.get(a).unwrap().title, "A");
        assert!(store.get(a).unwrap().tracks.ids().is_empty());
    }

    #[test]
    fn loaded_ids_are_never_reused() {
        let mut store = music_store();
        let seven = store.load(ObjectId::new(7), track("seven")).unwrap();
        assert_eq!(seven.id(), ObjectId::new(7));
        assert_eq!(store.get(seven).unwrap().id, 7);
        assert_eq!(store.last_id(), ObjectId::new(7));
        assert_eq!(store.insert(track("next")).unwrap().id(), ObjectId::new(8));

        store.load(ObjectId::new(3), track("three")).unwrap();
        assert_eq!(store.insert(track("after")).unwrap().id(), ObjectId::new(9));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn load_links_to_loaded_objects() {
        let mut store = music_store();
        let a = store
            .load(
                ObjectId::new(10),
                Album {
                    title: "A".into(),
                    ..Album::default()
                },
            )
            .unwrap();
        store
            .load(
                ObjectId::new(4),
                Track {
                    album: Ref::to(a),
                    ..Track::default()
                },
            )
            .unwrap();
        assert_eq!(store.ref_count(a.id()).unwrap(), 1);

        let b = store.load(ObjectId::new(20), album("B", &["x"])).unwrap();
        assert_eq!(store.get(b).unwrap().tracks.ids(), vec![ObjectId::new(21)]);

        let dangling = Track {
            album: Ref::to(ObjectPtr::new(ObjectId::new(99))),
            ..Track::default()
        };
        assert!(matches!(
            store.load(ObjectId::new(30), dangling),
            Err(CoreError::UnknownObject { .. })
        ));
        assert_eq!(store.last_id(), ObjectId::new(21));
    }

    #[test]
    fn load_rejects_taken_and_transient_ids() {
        let mut store = music_store();
        let t = store.insert(track("a")).unwrap();
        assert!(matches!(
            store.load(t.id(), track("again")),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            store.load(ObjectId::new(0), track("zero")),
            Err(CoreError::InvalidState { .. })
        ));

        let mut txn = store.begin().unwrap();
        assert!(matches!(
            store.load(ObjectId::new(5), track("late")),
            Err(CoreError::InvalidState { .. })
        ));
        txn.rollback(&mut store).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(t).unwrap().title, "a");
    }

    #[test]
    fn observers_follow_the_lifecycle() {
        let journal = Journal::default();
        let observer: Box<dyn StoreObserver<Track>> = Box::new(journal.clone());
        let mut store = ObjectStore::new();
        store.attach::<Album>("album", None, false).unwrap();
        store
            .attach_with::<Track>("track", None, false, vec![observer])
            .unwrap();

        let a = store.insert(album("A", &["x"])).unwrap();
        let t = store.insert(track("t")).unwrap();
        store.update(t, |track| track.title = "t2".into()).unwrap();
        store.update(a, |album| album.title = "A2".into()).unwrap();

        let mut txn = store.begin().unwrap();
        txn.remove(&mut store, t).unwrap();
        txn.rollback(&mut store).unwrap();

        let mut txn = store.begin().unwrap();
        txn.insert(&mut store, track("y")).unwrap();
        txn.rollback(&mut store).unwrap();

        store.detach("track").unwrap();
        assert_eq!(
            journal.entries(),
            vec![
                "attach track",
                "insert x",
                "insert t",
                "update t2",
                "delete t2",
                "insert t2",
                "insert y",
                "delete y",
                "delete x",
                "delete t2",
                "detach track",
            ]
        );
    }

    #[test]
    fn find_by_primary_key() {
        let mut store = music_store();
        store.attach::<Tag>("tag", None, false).unwrap();
        let t = store.insert(track("a")).unwrap();
        assert_eq!(store.find::<Track>(t.id().as_u64()).unwrap(), Some(t));

        let rock = store.insert(Tag { name: "rock".into() }).unwrap();
        let jazz = store.insert(Tag { name: "jazz".into() }).unwrap();
        assert_eq!(store.find::<Tag>("rock").unwrap(), Some(rock));
        assert_eq!(store.find::<Tag>("blues").unwrap(), None);

        store.update(rock, |tag| tag.name = "punk".into()).unwrap();
        assert_eq!(store.find::<Tag>("rock").unwrap(), None);
        assert_eq!(store.find::<Tag>("punk").unwrap(), Some(rock));

        let mut txn = store.begin().unwrap();
        txn.remove(&mut store, jazz).unwrap();
        assert_eq!(store.find::<Tag>("jazz").unwrap(), None);
        txn.rollback(&mut store).unwrap();
        assert_eq!(store.find::<Tag>("jazz").unwrap(), Some(jazz));

        store.clear().unwrap();
        assert_eq!(store.find::<Tag>("punk").unwrap(), None);
        assert!(matches!(
            store.find::<Person>(1u64),
            Err(CoreError::UnknownType { .. })
        ));
    }

    #[test]
    fn find_searches_subtypes() {
        let mut store = people_store();
        let student = store.insert(Student::default()).unwrap();
        let found = store.find::<Person>(student.id().as_u64()).unwrap();
        assert_eq!(found.map(|ptr| ptr.id()), Some(student.id()));
        assert_eq!(store.find::<Employee>(student.id().as_u64()).unwrap(), None);
    }

    #[test]
    fn clear_type_removes_subtree_instances() {
        let mut store = people_store();
        store.insert(Student::default()).unwrap();
        store.insert(Employee::default()).unwrap();
        store.insert(Student::default()).unwrap();
        store.insert(track("t")).unwrap();

        assert_eq!(store.clear_type("person").unwrap(), 3);
        assert_eq!(store.len(), 1);
        assert!(store.view("person", false).unwrap().is_empty());
        assert_eq!(store.prototypes().len(), 4);
        assert!(matches!(store.clear_type("robot"), Err(CoreError::UnknownType { .. })));
    }

    #[test]
    fn clear_type_releases_held_references() {
        let mut store = music_store();
        let a = store.insert(album("A", &[])).unwrap();
        store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();

        assert_eq!(store.clear_type("track").unwrap(), 1);
        assert_eq!(store.ref_count(a.id()).unwrap(), 0);
        store.remove(a).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn bind_checks_fields() {
        let mut store = music_store();
        assert!(matches!(
            store.bind::<Track, Album>("title", "tracks"),
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            store.bind::<Track, Track>("album", "album"),
            Err(CoreError::InvalidState { .. })
        ));
        store.bind::<Track, Album>("album", "tracks").unwrap();
        assert!(store.is_bound::<Album>("tracks"));
        assert!(store.is_bound::<Track>("album"));
        assert!(matches!(
            store.bind::<Album, Track>("tracks", "album"),
            Err(CoreError::InvalidState { .. })
        ));

        store.detach("track").unwrap();
        assert!(!store.is_bound::<Album>("tracks"));
    }

    #[test]
    fn bound_ends_follow_each_other() {
        let mut store = bound_music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let b = store.insert(album("B", &[])).unwrap();
        let t = store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();
        assert_eq!(store.get(a).unwrap().tracks.ids(), vec![t.id()]);
        assert_eq!(store.ref_count(a.id()).unwrap(), 1);
        assert_eq!(store.ref_count(t.id()).unwrap(), 1);

        store.update(t, |track| track.album.set(b)).unwrap();
        assert!(store.get(a).unwrap().tracks.ids().is_empty());
        assert_eq!(store.get(b).unwrap().tracks.ids(), vec![t.id()]);
        assert_eq!(store.ref_count(a.id()).unwrap(), 0);
        assert_eq!(store.ref_count(b.id()).unwrap(), 1);
        assert_eq!(store.ref_count(t.id()).unwrap(), 1);

        store.update(a, |album| album.tracks.push(t)).unwrap();
        assert_eq!(store.get(t).unwrap().album.id(), Some(a.id()));
        assert!(store.get(b).unwrap().tracks.ids().is_empty());
        assert_eq!(store.ref_count(a.id()).unwrap(), 1);
        assert_eq!(store.ref_count(b.id()).unwrap(), 0);
        assert_eq!(store.ref_count(t.id()).unwrap(), 1);

        store.remove(t).unwrap();
        assert!(store.get(a).unwrap().tracks.ids().is_empty());
        assert_eq!(store.ref_count(a.id()).unwrap(), 0);
    }

    #[test]
    fn bound_pending_children_point_back() {
        let mut store = bound_music_store();
        let c = store.insert(album("C", &["x"])).unwrap();
        let x = store.get(c).unwrap().tracks.ids()[0];
        let x = store.ptr::<Track>(x).unwrap();

        assert_eq!(store.get(x).unwrap().album.id(), Some(c.id()));
        assert_eq!(store.ref_count(c.id()).unwrap(), 1);
        assert_eq!(store.ref_count(x.id()).unwrap(), 1);

        store.remove(c).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn rollback_restores_both_ends() {
        let mut store = bound_music_store();
        let a = store.insert(album("A", &[])).unwrap();
        let b = store.insert(album("B", &[])).unwrap();
        let t = store
            .insert(Track {
                album: Ref::to(a),
                ..Track::default()
            })
            .unwrap();

        let mut txn = store.begin().unwrap();
        txn.update(&mut store, t, |track| track.album.set(b)).unwrap();
        assert_eq!(store.get(b).unwrap().tracks.ids(), vec![t.id()]);
        txn.remove(&mut store, t).unwrap();
        assert!(store.get(b).unwrap().tracks.ids().is_empty());
        txn.rollback(&mut store).unwrap();

        assert_eq!(store.get(a).unwrap().tracks.ids(), vec![t.id()]);
        assert!(store.get(b).unwrap().tracks.ids().is_empty());
        assert_eq!(store.get(t).unwrap().album.id(), Some(a.id()));
        assert_eq!(store.ref_count(a.id()).unwrap(), 1);
        assert_eq!(store.ref_count(b.id()).unwrap(), 0);
        assert_eq!(store.ref_count(t.id()).unwrap(), 1);
    }

    #[test]
    fn update_cascade_leaves_related_objects_alone() {
        let mut store = music_store();
        let a = store.insert(album("A", &["x"])).unwrap();

        let mut txn = store.begin().unwrap();
        txn.update(&mut store, a, |album| album.title = "B".into())
            .unwrap();
        let logged: Vec<ObjectId> = txn.log().iter().flat_map(|action| action.ids()).collect();
        assert_eq!(logged, vec![a.id()]);
        txn.rollback(&mut store).unwrap();
    }

    #[test]
    fn dropped_transaction_can_be_abandoned() {
        let mut store = music_store();
        let mut parent = store.begin().unwrap();
        let lost = {
            let mut child = store.begin().unwrap();
            child.insert(&mut store, track("kept in memory")).unwrap();
            child.id()
        };
        assert_eq!(store.current_transaction(), Some(lost));
        assert!(parent.insert(&mut store, track("blocked")).is_err());

        assert!(matches!(
            store.abandon_transaction(parent.id()),
            Err(CoreError::InvalidState { .. })
        ));
        store.abandon_transaction(lost).unwrap();
        assert_eq!(store.current_transaction(), Some(parent.id()));
        assert_eq!(store.len(), 1);

        parent.insert(&mut store, track("after")).unwrap();
        parent.rollback(&mut store).unwrap();
        assert_eq!(store.transaction_depth(), 0);
        assert_eq!(store.len(), 1);
    }

    proptest! {
        #[test]
        fn ids_increase_strictly(
            ops in proptest::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..60)
        ) {
            let mut store = music_store();
            let mut issued: Vec<ObjectId> = Vec::new();
            let mut live: Vec<ObjectId> = Vec::new();
            for (insert, pick) in ops {
                if insert || live.is_empty() {
                    let ptr = store.insert(track("t")).unwrap();
                    prop_assert!(issued.iter().all(|id| *id < ptr.id()));
                    issued.push(ptr.id());
                    live.push(ptr.id());
                } else {
                    let id = live.remove(pick.index(live.len()));
                    store.remove_id(id).unwrap();
                }
                let ids: HashSet<ObjectId> = store.objects().ids().collect();
                prop_assert_eq!(ids.len(), store.len());
                prop_assert_eq!(ids.len(), live.len());
            }
        }

        #[test]
        fn own_view_is_within_subtree_view(kinds in proptest::collection::vec(0u8..3, 0..40)) {
            let mut store = people_store();
            for kind in &kinds {
                match kind {
                    0 => { store.insert(Student::default()).unwrap(); }
                    1 => { store.insert(Employee::default()).unwrap(); }
                    _ => { store.insert(Track::default()).unwrap(); }
                }
            }
            let people = store.view("person", false).unwrap();
            let students = store.view("student", true).unwrap();
            let employees = store.view("employee", true).unwrap();

            prop_assert_eq!(people.len(), students.len() + employees.len());
            prop_assert_eq!(people.iter().count(), people.len());
            prop_assert!(students.ids().all(|id| people.contains(id)));
            prop_assert!(employees.ids().all(|id| people.contains(id)));
            prop_assert_eq!(students.len(), kinds.iter().filter(|k| **k == 0).count());
        }
    }
}
