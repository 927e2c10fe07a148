//! Typed store observers.
//!
//! An observer is registered for one attached type. It hears about the
//! type being attached and detached, and about every change to the set or
//! state of instances of exactly that type.

use crate::object::Persistent;
use crate::prototype::PrototypeNode;
use crate::registry::Erased;
use crate::types::ObjectId;
use std::marker::PhantomData;

/// Receives lifecycle events of one persistent type.
///
/// Every method has an empty default, so an observer implements only what
/// it needs. Rollback and [`ObjectStore::load`] report through the same
/// methods: an object recreated by a rollback is inserted again, one
/// discarded by it is deleted.
///
/// ```
/// use strata_core::{CoreResult, FieldVisitor, ObjectId, ObjectStore, Persistent, StoreObserver};
///
/// #[derive(Default)]
/// struct Track {
///     id: u64,
/// }
///
/// impl Persistent for Track {
///     fn persist<V: FieldVisitor>(&mut self, v: &mut V) -> CoreResult<()> {
///         v.on_primary_key("id", &mut self.id)
///     }
/// }
///
/// struct Count(std::sync::Arc<std::sync::atomic::AtomicUsize>);
///
/// impl StoreObserver<Track> for Count {
///     fn on_insert(&mut self, _id: ObjectId, _track: &Track) {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
///     }
/// }
///
/// let inserted = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
/// let observer: Box<dyn StoreObserver<Track>> = Box::new(Count(inserted.clone()));
/// let mut store = ObjectStore::new();
/// store
///     .attach_with::<Track>("track", None, false, vec![observer])
///     .unwrap();
/// store.insert(Track::default()).unwrap();
/// assert_eq!(inserted.load(std::sync::atomic::Ordering::SeqCst), 1);
/// ```
///
/// [`ObjectStore::load`]: crate::ObjectStore::load
pub trait StoreObserver<T: Persistent>: Send {
    /// The type was attached under `node`.
    fn on_attach(&mut self, _node: &PrototypeNode) {}

    /// The type is about to be detached. Its instances are already gone.
    fn on_detach(&mut self, _node: &PrototypeNode) {}

    /// An instance entered the store.
    fn on_insert(&mut self, _id: ObjectId, _object: &T) {}

    /// An instance changed.
    fn on_update(&mut self, _id: ObjectId, _object: &T) {}

    /// An instance is leaving the store.
    fn on_delete(&mut self, _id: ObjectId, _object: &T) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectEvent {
    Insert,
    Update,
    Delete,
}

/// A [`StoreObserver`] with its type erased.
pub(crate) trait ErasedObserver: Send {
    fn on_attach(&mut self, node: &PrototypeNode);
    fn on_detach(&mut self, node: &PrototypeNode);
    fn notify(&mut self, event: ObjectEvent, id: ObjectId, object: &Erased);
}

struct Typed<T: Persistent> {
    inner: Box<dyn StoreObserver<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistent> ErasedObserver for Typed<T> {
    fn on_attach(&mut self, node: &PrototypeNode) {
        self.inner.on_attach(node);
    }

    fn on_detach(&mut self, node: &PrototypeNode) {
        self.inner.on_detach(node);
    }

    fn notify(&mut self, event: ObjectEvent, id: ObjectId, object: &Erased) {
        let Some(object) = object.downcast_ref::<T>() else {
            return;
        };
        match event {
            ObjectEvent::Insert => self.inner.on_insert(id, object),
            ObjectEvent::Update => self.inner.on_update(id, object),
            ObjectEvent::Delete => self.inner.on_delete(id, object),
        }
    }
}

pub(crate) fn erase<T: Persistent>(observer: Box<dyn StoreObserver<T>>) -> Box<dyn ErasedObserver> {
    Box::new(Typed {
        inner: observer,
        _marker: PhantomData,
    })
}
