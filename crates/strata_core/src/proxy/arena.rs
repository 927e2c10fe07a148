//! Generational slot arena holding every proxy of a store.

use super::{ObjectProxy, ProxyHandle};

struct Slot {
    generation: u32,
    proxy: Option<ObjectProxy>,
}

/// Slot storage for proxies plus the links of the store-wide proxy list.
#[derive(Default)]
pub(crate) struct ProxyArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ProxyArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots, sentinels included.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn alloc(&mut self, proxy: ObjectProxy) -> ProxyHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.proxy = Some(proxy);
            return ProxyHandle::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            proxy: Some(proxy),
        });
        ProxyHandle::new(index, 0)
    }

    /// Frees a slot. The proxy must already be unlinked.
    pub(crate) fn release(&mut self, handle: ProxyHandle) -> Option<ObjectProxy> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let proxy = slot.proxy.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(proxy)
    }

    pub(crate) fn get(&self, handle: ProxyHandle) -> Option<&ObjectProxy> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.proxy.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: ProxyHandle) -> Option<&mut ObjectProxy> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.proxy.as_mut())
    }

    pub(crate) fn next(&self, handle: ProxyHandle) -> Option<ProxyHandle> {
        self.get(handle).and_then(|proxy| proxy.next)
    }

    /// Splices `handle` into the list immediately before `before`.
    pub(crate) fn link_before(&mut self, handle: ProxyHandle, before: ProxyHandle) {
        let prev = self.get(before).and_then(|proxy| proxy.prev);
        if let Some(proxy) = self.get_mut(handle) {
            proxy.prev = prev;
            proxy.next = Some(before);
        }
        if let Some(prev) = prev {
            if let Some(proxy) = self.get_mut(prev) {
                proxy.next = Some(handle);
            }
        }
        if let Some(proxy) = self.get_mut(before) {
            proxy.prev = Some(handle);
        }
    }

    /// Links `handle` immediately after `after`.
    pub(crate) fn link_after(&mut self, handle: ProxyHandle, after: ProxyHandle) {
        let next = self.get(after).and_then(|proxy| proxy.next);
        if let Some(proxy) = self.get_mut(handle) {
            proxy.prev = Some(after);
            proxy.next = next;
        }
        if let Some(next) = next {
            if let Some(proxy) = self.get_mut(next) {
                proxy.prev = Some(handle);
            }
        }
        if let Some(proxy) = self.get_mut(after) {
            proxy.next = Some(handle);
        }
    }

    /// Removes `handle` from the list, joining its neighbours.
    pub(crate) fn unlink(&mut self, handle: ProxyHandle) {
        let Some(proxy) = self.get_mut(handle) else {
            return;
        };
        let (prev, next) = (proxy.prev.take(), proxy.next.take());
        if let Some(prev) = prev {
            if let Some(proxy) = self.get_mut(prev) {
                proxy.next = next;
            }
        }
        if let Some(next) = next {
            if let Some(proxy) = self.get_mut(next) {
                proxy.prev = prev;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyKind;
    use crate::types::{NodeId, ObjectId};

    fn object(arena: &mut ProxyArena, id: u64) -> ProxyHandle {
        arena.alloc(ObjectProxy::object(
            ObjectId::new(id),
            NodeId(1),
            Box::new(id),
        ))
    }

    fn ids(arena: &ProxyArena, from: ProxyHandle) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cursor = Some(from);
        while let Some(handle) = cursor {
            out.push(arena.get(handle).map_or(0, |p| p.id().as_u64()));
            cursor = arena.next(handle);
        }
        out
    }

    #[test]
    fn stale_handles_resolve_to_nothing() {
        let mut arena = ProxyArena::new();
        let a = object(&mut arena, 1);
        assert!(arena.release(a).is_some());

        let b = object(&mut arena, 2);
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b).map(|p| p.id()), Some(ObjectId::new(2)));
        assert!(arena.release(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn splice_and_unlink() {
        let mut arena = ProxyArena::new();
        let head = arena.alloc(ObjectProxy::sentinel(NodeId(0), ProxyKind::First));
        let tail = arena.alloc(ObjectProxy::sentinel(NodeId(0), ProxyKind::Last));
        arena.link_after(tail, head);

        let a = object(&mut arena, 1);
        let b = object(&mut arena, 2);
        let c = object(&mut arena, 3);
        arena.link_before(a, tail);
        arena.link_before(b, tail);
        arena.link_after(c, head);
        assert_eq!(ids(&arena, head), vec![0, 3, 1, 2, 0]);

        arena.unlink(a);
        assert_eq!(ids(&arena, head), vec![0, 3, 2, 0]);
        assert!(arena.get(a).is_some_and(|p| p.prev.is_none() && p.next.is_none()));
    }
}
