//! Object proxies.
//!
//! Every live object is owned by an [`ObjectProxy`] held in the store's
//! [`ProxyArena`]. Proxies are threaded into a single store-wide doubly
//! linked list that the prototype tree partitions into per-type segments
//! using sentinel proxies.

mod arena;

pub(crate) use arena::ProxyArena;

use crate::types::{NodeId, ObjectId};
use std::any::Any;
use std::fmt;

/// Generational handle to a slot of the proxy arena.
///
/// A handle goes stale when its slot is freed; stale handles resolve to
/// nothing instead of aliasing the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyHandle {
    index: u32,
    generation: u32,
}

impl ProxyHandle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy:{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyKind {
    Object,
    First,
    Marker,
    Last,
}

/// Identity wrapper for one live object.
pub struct ObjectProxy {
    id: ObjectId,
    node: NodeId,
    ref_count: u32,
    kind: ProxyKind,
    pub(crate) prev: Option<ProxyHandle>,
    pub(crate) next: Option<ProxyHandle>,
    object: Option<Box<dyn Any + Send>>,
}

impl ObjectProxy {
    pub(crate) fn object(id: ObjectId, node: NodeId, object: Box<dyn Any + Send>) -> Self {
        Self {
            id,
            node,
            ref_count: 0,
            kind: ProxyKind::Object,
            prev: None,
            next: None,
            object: Some(object),
        }
    }

    pub(crate) fn sentinel(node: NodeId, kind: ProxyKind) -> Self {
        Self {
            id: ObjectId::TRANSIENT,
            node,
            ref_count: 0,
            kind,
            prev: None,
            next: None,
            object: None,
        }
    }

    /// The object's surrogate id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The prototype node of the object's concrete type.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Number of relation fields currently pointing at the object.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Typed access to the object.
    ///
    /// Returns `None` if the object is not a `T`.
    #[must_use]
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.object.as_deref().and_then(|object| object.downcast_ref())
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        self.kind != ProxyKind::Object
    }

    pub(crate) fn increment(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    pub(crate) fn decrement(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    pub(crate) fn apply_delta(&mut self, delta: i64) {
        let count = i64::from(self.ref_count).saturating_add(delta).max(0);
        self.ref_count = u32::try_from(count).unwrap_or(u32::MAX);
    }

    pub(crate) fn take_object(&mut self) -> Option<Box<dyn Any + Send>> {
        self.object.take()
    }

    pub(crate) fn put_object(&mut self, object: Box<dyn Any + Send>) {
        self.object = Some(object);
    }

    pub(crate) fn object_ref(&self) -> Option<&(dyn Any + Send)> {
        self.object.as_deref()
    }

    pub(crate) fn object_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.object.as_deref_mut()
    }
}

impl fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("ref_count", &self.ref_count)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
