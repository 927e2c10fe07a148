//! Range views over a node's segment of the proxy list.

use crate::proxy::{ObjectProxy, ProxyArena, ProxyHandle};
use crate::types::ObjectId;
use std::iter::FusedIterator;

/// The live instances of one type, with or without its subtypes.
///
/// Building a view is O(1): it is two sentinel handles and a count.
#[derive(Clone, Copy)]
pub struct View<'a> {
    arena: &'a ProxyArena,
    start: ProxyHandle,
    end: ProxyHandle,
    len: usize,
}

impl<'a> View<'a> {
    pub(crate) fn new(
        arena: &'a ProxyArena,
        start: ProxyHandle,
        end: ProxyHandle,
        len: usize,
    ) -> Self {
        Self {
            arena,
            start,
            end,
            len,
        }
    }

    /// Number of objects in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates the proxies in list order.
    #[must_use]
    pub fn iter(&self) -> ViewIter<'a> {
        ViewIter {
            arena: self.arena,
            cursor: self.arena.next(self.start),
            end: self.end,
            remaining: self.len,
        }
    }

    /// Ids of the objects in list order.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + 'a {
        self.iter().map(ObjectProxy::id)
    }

    /// Returns true if the view contains `id`.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.ids().any(|candidate| candidate == id)
    }

    /// The objects of Rust type `T` in the view.
    ///
    /// Instances of other types, subtypes included, are skipped.
    pub fn objects<T: 'static>(&self) -> impl Iterator<Item = (ObjectId, &'a T)> + 'a {
        self.iter()
            .filter_map(|proxy| proxy.downcast::<T>().map(|object| (proxy.id(), object)))
    }
}

impl std::fmt::Debug for View<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl<'a> IntoIterator for &View<'a> {
    type Item = &'a ObjectProxy;
    type IntoIter = ViewIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the proxies of a [`View`]. Sentinels are never yielded.
pub struct ViewIter<'a> {
    arena: &'a ProxyArena,
    cursor: Option<ProxyHandle>,
    end: ProxyHandle,
    remaining: usize,
}

impl<'a> Iterator for ViewIter<'a> {
    type Item = &'a ObjectProxy;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let handle = self.cursor?;
            if handle == self.end {
                self.cursor = None;
                return None;
            }
            let proxy = self.arena.get(handle)?;
            self.cursor = proxy.next;
            if !proxy.is_sentinel() {
                self.remaining = self.remaining.saturating_sub(1);
                return Some(proxy);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ViewIter<'_> {}

impl FusedIterator for ViewIter<'_> {}
