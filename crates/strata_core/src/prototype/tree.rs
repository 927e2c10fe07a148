//! The prototype tree.

use super::node::PrototypeNode;
use super::view::View;
use crate::error::{CoreError, CoreResult};
use crate::proxy::{ObjectProxy, ProxyArena, ProxyHandle, ProxyKind};
use crate::types::NodeId;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

/// Internal root under which top-level types are attached.
pub(crate) const ROOT: NodeId = NodeId(0);

/// Hierarchy of attached types plus the proxy list they partition.
pub struct PrototypeTree {
    nodes: Vec<Option<PrototypeNode>>,
    by_name: HashMap<String, NodeId>,
    by_type: HashMap<TypeId, NodeId>,
    /// The root's `first` and `last` sentinels.
    bounds: (ProxyHandle, ProxyHandle),
    pub(crate) arena: ProxyArena,
}

impl PrototypeTree {
    pub(crate) fn new() -> Self {
        let mut arena = ProxyArena::new();
        let first = arena.alloc(ObjectProxy::sentinel(ROOT, ProxyKind::First));
        let marker = arena.alloc(ObjectProxy::sentinel(ROOT, ProxyKind::Marker));
        let last = arena.alloc(ObjectProxy::sentinel(ROOT, ProxyKind::Last));
        arena.link_after(marker, first);
        arena.link_after(last, marker);

        let root = PrototypeNode {
            id: ROOT,
            name: String::new(),
            type_id: None,
            type_path: "",
            parent: None,
            children: Vec::new(),
            is_abstract: true,
            depth: 0,
            first,
            marker,
            last,
            own_count: 0,
            subtree_count: 0,
        };

        Self {
            nodes: vec![Some(root)],
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            bounds: (first, last),
            arena,
        }
    }

    /// Adds a type below `parent`, or at the top level.
    ///
    /// The node's sentinels are spliced in just before the parent's `last`
    /// sentinel, which keeps every descendant inside the parent's range.
    pub(crate) fn attach(
        &mut self,
        name: &str,
        type_id: TypeId,
        type_path: &'static str,
        parent: Option<&str>,
        is_abstract: bool,
    ) -> CoreResult<NodeId> {
        if self.by_name.contains_key(name) || self.by_type.contains_key(&type_id) {
            return Err(CoreError::duplicate_type(name));
        }
        let parent_id = match parent {
            Some(parent) => self
                .by_name
                .get(parent)
                .copied()
                .ok_or_else(|| CoreError::unknown_type(parent))?,
            None => ROOT,
        };
        let (before, depth) = {
            let parent = self.root_or_node(parent_id)?;
            let depth = if parent.is_root() { 0 } else { parent.depth + 1 };
            (parent.last, depth)
        };

        let id = NodeId(self.nodes.len());
        let first = self.arena.alloc(ObjectProxy::sentinel(id, ProxyKind::First));
        let marker = self.arena.alloc(ObjectProxy::sentinel(id, ProxyKind::Marker));
        let last = self.arena.alloc(ObjectProxy::sentinel(id, ProxyKind::Last));
        self.arena.link_before(first, before);
        self.arena.link_before(marker, before);
        self.arena.link_before(last, before);

        self.nodes.push(Some(PrototypeNode {
            id,
            name: name.to_string(),
            type_id: Some(type_id),
            type_path,
            parent: (parent_id != ROOT).then_some(parent_id),
            children: Vec::new(),
            is_abstract,
            depth,
            first,
            marker,
            last,
            own_count: 0,
            subtree_count: 0,
        }));
        if let Some(parent) = self.node_slot_mut(parent_id) {
            parent.children.push(id);
        }
        self.by_name.insert(name.to_string(), id);
        self.by_type.insert(type_id, id);
        Ok(id)
    }

    /// Removes an empty leaf node and its sentinels.
    pub(crate) fn detach(&mut self, id: NodeId) -> CoreResult<PrototypeNode> {
        let node = self.root_or_node(id)?;
        if node.is_root() {
            return Err(CoreError::invalid_state("the root node cannot be detached"));
        }
        if !node.children.is_empty() {
            return Err(CoreError::HasChildren {
                name: node.name.clone(),
                children: node.children.len(),
            });
        }
        if node.subtree_count > 0 {
            return Err(CoreError::invalid_state(format!(
                "type {} still has {} live object(s)",
                node.name, node.subtree_count
            )));
        }

        let node = self.nodes[id.index()]
            .take()
            .ok_or_else(|| CoreError::invalid_state(format!("{id} is not attached")))?;
        for sentinel in [node.first, node.marker, node.last] {
            self.arena.unlink(sentinel);
            self.arena.release(sentinel);
        }
        let parent = node.parent.unwrap_or(ROOT);
        if let Some(parent) = self.node_slot_mut(parent) {
            parent.children.retain(|child| *child != id);
        }
        self.by_name.remove(&node.name);
        if let Some(type_id) = node.type_id {
            self.by_type.remove(&type_id);
        }
        Ok(node)
    }

    /// The node with the given id, if attached.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&PrototypeNode> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|node| !node.is_root())
    }

    /// The node attached under `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&PrototypeNode> {
        self.by_name.get(name).and_then(|id| self.node(*id))
    }

    /// The node the Rust type `T` is attached as.
    #[must_use]
    pub fn node_of<T: 'static>(&self) -> Option<&PrototypeNode> {
        self.node_of_type(TypeId::of::<T>())
            .and_then(|id| self.node(id))
    }

    pub(crate) fn node_of_type(&self, type_id: TypeId) -> Option<NodeId> {
        self.by_type.get(&type_id).copied()
    }

    /// Number of attached types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if no type is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Returns true if `node` is a strict descendant of `ancestor`.
    #[must_use]
    pub fn is_child_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.node(node).and_then(PrototypeNode::parent);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.node(id).and_then(PrototypeNode::parent);
        }
        false
    }

    /// Returns true if `node` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn is_derived_from(&self, node: NodeId, ancestor: NodeId) -> bool {
        node == ancestor || self.is_child_of(node, ancestor)
    }

    /// Attached types in pre-order, parents before their children.
    #[must_use]
    pub fn iter(&self) -> PrototypeIter<'_> {
        let mut stack: Vec<NodeId> = self
            .nodes
            .first()
            .and_then(Option::as_ref)
            .map(|root| root.children.clone())
            .unwrap_or_default();
        stack.reverse();
        PrototypeIter { tree: self, stack }
    }

    /// View of a node's instances.
    ///
    /// With `skip_siblings` only the node's own instances are visited,
    /// otherwise its descendants' instances follow them.
    pub(crate) fn view(&self, id: NodeId, skip_siblings: bool) -> CoreResult<View<'_>> {
        let node = self.root_or_node(id)?;
        Ok(if skip_siblings {
            View::new(&self.arena, node.first, node.marker, node.own_count)
        } else {
            View::new(&self.arena, node.first, node.last, node.subtree_count)
        })
    }

    /// View of every live object.
    pub(crate) fn all(&self) -> View<'_> {
        let len = self
            .nodes
            .first()
            .and_then(Option::as_ref)
            .map_or(0, |root| root.subtree_count);
        View::new(&self.arena, self.bounds.0, self.bounds.1, len)
    }

    /// Splices an object proxy just before its node's marker.
    pub(crate) fn link_object(&mut self, handle: ProxyHandle) -> CoreResult<()> {
        let node_id = self
            .arena
            .get(handle)
            .map(ObjectProxy::node)
            .ok_or_else(|| CoreError::invalid_state(format!("{handle} is not allocated")))?;
        let marker = self.root_or_node(node_id)?.marker;
        self.arena.link_before(handle, marker);
        if let Some(node) = self.node_slot_mut(node_id) {
            node.own_count += 1;
        }
        self.adjust_subtree(node_id, true);
        Ok(())
    }

    /// Takes an object proxy out of the list.
    pub(crate) fn unlink_object(&mut self, handle: ProxyHandle) {
        let Some(node_id) = self.arena.get(handle).map(ObjectProxy::node) else {
            return;
        };
        self.arena.unlink(handle);
        if let Some(node) = self.node_slot_mut(node_id) {
            node.own_count = node.own_count.saturating_sub(1);
        }
        self.adjust_subtree(node_id, false);
    }

    fn adjust_subtree(&mut self, from: NodeId, grow: bool) {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let Some(node) = self.node_slot_mut(id) else {
                break;
            };
            node.subtree_count = if grow {
                node.subtree_count + 1
            } else {
                node.subtree_count.saturating_sub(1)
            };
            cursor = if node.is_root() {
                None
            } else {
                Some(node.parent.unwrap_or(ROOT))
            };
        }
    }

    pub(crate) fn root_or_node(&self, id: NodeId) -> CoreResult<&PrototypeNode> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| CoreError::unknown_type(id.to_string()))
    }

    fn node_slot_mut(&mut self, id: NodeId) -> Option<&mut PrototypeNode> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }
}

impl fmt::Debug for PrototypeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(PrototypeNode::name))
            .finish()
    }
}

/// Pre-order iterator over attached types.
pub struct PrototypeIter<'a> {
    tree: &'a PrototypeTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PrototypeIter<'a> {
    type Item = &'a PrototypeNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(node) = self.tree.node(id) {
                self.stack.extend(node.children.iter().rev().copied());
                return Some(node);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    struct Person;
    struct Student;
    struct Employee;
    struct Track;

    fn tree() -> PrototypeTree {
        let mut tree = PrototypeTree::new();
        tree.attach("person", TypeId::of::<Person>(), "Person", None, true)
            .unwrap();
        tree.attach("student", TypeId::of::<Student>(), "Student", Some("person"), false)
            .unwrap();
        tree.attach("employee", TypeId::of::<Employee>(), "Employee", Some("person"), false)
            .unwrap();
        tree.attach("track", TypeId::of::<Track>(), "Track", None, false)
            .unwrap();
        tree
    }

    fn add(tree: &mut PrototypeTree, node: &str, id: u64) -> ProxyHandle {
        let node = tree.find(node).unwrap().id();
        let handle = tree.arena.alloc(ObjectProxy::object(
            ObjectId::new(id),
            node,
            Box::new(id),
        ));
        tree.link_object(handle).unwrap();
        handle
    }

    fn ids(tree: &PrototypeTree, node: &str, skip_siblings: bool) -> Vec<u64> {
        let node = tree.find(node).unwrap().id();
        tree.view(node, skip_siblings)
            .unwrap()
            .ids()
            .map(ObjectId::as_u64)
            .collect()
    }

    #[test]
    fn duplicate_names_and_types_are_rejected() {
        let mut tree = tree();
        let by_name = tree.attach("track", TypeId::of::<u8>(), "u8", None, false);
        assert!(matches!(by_name, Err(CoreError::DuplicateType { .. })));

        let by_type = tree.attach("tracks", TypeId::of::<Track>(), "Track", None, false);
        assert!(matches!(by_type, Err(CoreError::DuplicateType { .. })));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut tree = PrototypeTree::new();
        let result = tree.attach("student", TypeId::of::<Student>(), "Student", Some("person"), false);
        assert!(matches!(result, Err(CoreError::UnknownType { .. })));
    }

    #[test]
    fn views_partition_by_sentinels() {
        let mut tree = tree();
        add(&mut tree, "student", 1);
        add(&mut tree, "employee", 2);
        add(&mut tree, "student", 3);
        add(&mut tree, "track", 4);

        assert_eq!(ids(&tree, "student", true), vec![1, 3]);
        assert_eq!(ids(&tree, "employee", true), vec![2]);
        assert!(ids(&tree, "person", true).is_empty());
        assert_eq!(ids(&tree, "person", false), vec![1, 3, 2]);
        assert_eq!(ids(&tree, "track", false), vec![4]);

        let person = tree.find("person").unwrap();
        assert_eq!(person.len(), 3);
        assert_eq!(person.own_len(), 0);
        assert_eq!(tree.view(ROOT, false).unwrap().len(), 4);
        assert_eq!(tree.all().ids().count(), 4);
    }

    #[test]
    fn unlink_updates_counts() {
        let mut tree = tree();
        let a = add(&mut tree, "student", 1);
        add(&mut tree, "student", 2);

        tree.unlink_object(a);
        assert_eq!(ids(&tree, "person", false), vec![2]);
        assert_eq!(tree.find("student").unwrap().own_len(), 1);
        assert_eq!(tree.find("person").unwrap().len(), 1);
    }

    #[test]
    fn detach_requires_leaf_and_empty() {
        let mut tree = tree();
        let person = tree.find("person").unwrap().id();
        assert!(matches!(tree.detach(person), Err(CoreError::HasChildren { children: 2, .. })));

        let track = tree.find("track").unwrap().id();
        let handle = add(&mut tree, "track", 1);
        assert!(matches!(tree.detach(track), Err(CoreError::InvalidState { .. })));

        tree.unlink_object(handle);
        tree.detach(track).unwrap();
        assert!(tree.find("track").is_none());
        assert!(tree.node_of::<Track>().is_none());
    }

    #[test]
    fn pre_order_iteration() {
        let tree = tree();
        let names: Vec<&str> = tree.iter().map(PrototypeNode::name).collect();
        assert_eq!(names, vec!["person", "student", "employee", "track"]);

        let student = tree.find("student").unwrap();
        let person = tree.find("person").unwrap().id();
        assert_eq!(student.depth(), 1);
        assert!(tree.is_child_of(student.id(), person));
        assert!(!tree.is_child_of(person, person));
        assert!(tree.is_derived_from(person, person));
        assert_eq!(student.table_name(), Some("student"));
        assert_eq!(tree.find("person").unwrap().table_name(), None);
    }
}
