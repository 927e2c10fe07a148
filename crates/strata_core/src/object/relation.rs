//! Object handles and relation fields.

use crate::types::ObjectId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed handle to an object in a store.
///
/// The handle is only an id: it stays valid across rollbacks that restore
/// the object, and resolves to [`CoreError::UnknownObject`] once the object
/// is gone.
///
/// [`CoreError::UnknownObject`]: crate::CoreError::UnknownObject
pub struct ObjectPtr<T> {
    id: ObjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectPtr<T> {
    /// Handle for an id.
    #[must_use]
    pub const fn new(id: ObjectId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The object's surrogate id.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Reinterpret the handle as pointing at another type.
    ///
    /// Used to view a subtype instance through a handle of its base type.
    #[must_use]
    pub const fn cast<U>(self) -> ObjectPtr<U> {
        ObjectPtr::new(self.id)
    }
}

impl<T> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectPtr<T> {}

impl<T> PartialEq for ObjectPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ObjectPtr<T> {}

impl<T> Hash for ObjectPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({})", self.id)
    }
}

enum RefState<T> {
    Null,
    Pending(Box<T>),
    Linked(ObjectId),
}

/// A belongs-to or has-one relation field.
///
/// A reference is either null, linked to a stored object, or holds a
/// transient object that is inserted together with its owner when the
/// relation cascades inserts.
pub struct Ref<T> {
    state: RefState<T>,
}

impl<T> Ref<T> {
    /// A null reference.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            state: RefState::Null,
        }
    }

    /// A reference holding a transient object.
    #[must_use]
    pub fn pending(object: T) -> Self {
        Self {
            state: RefState::Pending(Box::new(object)),
        }
    }

    /// A reference to a stored object.
    #[must_use]
    pub fn to(ptr: ObjectPtr<T>) -> Self {
        Self::linked(ptr.id())
    }

    pub(crate) fn linked(id: ObjectId) -> Self {
        if id.is_transient() {
            Self::null()
        } else {
            Self {
                state: RefState::Linked(id),
            }
        }
    }

    /// The id of the linked object, if linked.
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        match self.state {
            RefState::Linked(id) => Some(id),
            _ => None,
        }
    }

    /// Typed handle of the linked object, if linked.
    #[must_use]
    pub fn ptr(&self) -> Option<ObjectPtr<T>> {
        self.id().map(ObjectPtr::new)
    }

    /// Returns true if the reference is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.state, RefState::Null)
    }

    /// Returns true if the reference holds a transient object.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state, RefState::Pending(_))
    }

    /// Point the reference at a stored object.
    pub fn set(&mut self, ptr: ObjectPtr<T>) {
        *self = Self::to(ptr);
    }

    /// Reset the reference to null.
    pub fn clear(&mut self) {
        self.state = RefState::Null;
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut T> {
        match &mut self.state {
            RefState::Pending(object) => Some(object),
            _ => None,
        }
    }

    pub(crate) fn take_pending(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.state, RefState::Null) {
            RefState::Pending(object) => Some(*object),
            other => {
                self.state = other;
                None
            }
        }
    }
}

impl<T> Default for Ref<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<ObjectPtr<T>> for Ref<T> {
    fn from(ptr: ObjectPtr<T>) -> Self {
        Self::to(ptr)
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            RefState::Null => write!(f, "Ref(null)"),
            RefState::Pending(_) => write!(f, "Ref(pending)"),
            RefState::Linked(id) => write!(f, "Ref({id})"),
        }
    }
}

/// A has-many relation field.
pub struct HasMany<T> {
    items: Vec<Ref<T>>,
}

impl<T> HasMany<T> {
    /// An empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append a stored object.
    pub fn push(&mut self, ptr: ObjectPtr<T>) {
        self.items.push(Ref::to(ptr));
    }

    /// Append a transient object to be inserted with the owner.
    pub fn push_pending(&mut self, object: T) {
        self.items.push(Ref::pending(object));
    }

    /// Remove every link to `id`. Returns true if one was removed.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id() != Some(id));
        self.items.len() != before
    }

    /// Returns true if the collection links `id`.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.items.iter().any(|item| item.id() == Some(id))
    }

    /// Ids of the linked objects, in order.
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        self.items.iter().filter_map(Ref::id).collect()
    }

    /// Number of entries, transient ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Drops every link to `id`, returning how many there were.
    pub(crate) fn unlink(&mut self, id: ObjectId) -> u32 {
        let before = self.items.len();
        self.items.retain(|item| item.id() != Some(id));
        u32::try_from(before - self.items.len()).unwrap_or(u32::MAX)
    }

    pub(crate) fn items_mut(&mut self) -> &mut [Ref<T>] {
        &mut self.items
    }

    pub(crate) fn replace_ids(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        self.items = ids.into_iter().map(Ref::linked).collect();
    }
}

impl<T> Default for HasMany<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HasMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}
