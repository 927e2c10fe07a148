//! Prototype nodes.

use crate::proxy::ProxyHandle;
use crate::types::NodeId;
use std::any::TypeId;

/// Metadata and live-instance anchors for one attached type.
///
/// A node owns no objects; it only marks where its objects sit in the
/// store-wide proxy list. Within that list the node occupies
///
/// ```text
/// first, own objects…, marker, child₁ block, child₂ block, …, last
/// ```
///
/// so `(first, marker)` holds the node's own instances and `(first, last)`
/// additionally holds every descendant's instances.
#[derive(Debug, Clone)]
pub struct PrototypeNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) type_id: Option<TypeId>,
    pub(crate) type_path: &'static str,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) is_abstract: bool,
    pub(crate) depth: usize,
    pub(crate) first: ProxyHandle,
    pub(crate) marker: ProxyHandle,
    pub(crate) last: ProxyHandle,
    pub(crate) own_count: usize,
    pub(crate) subtree_count: usize,
}

impl PrototypeNode {
    /// The node's id within its tree.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The name the type was attached under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend table of the type; abstract types have none.
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        (!self.is_abstract).then_some(self.name.as_str())
    }

    /// Rust type path of the attached type.
    #[must_use]
    pub fn type_path(&self) -> &'static str {
        self.type_path
    }

    /// Parent type node, if attached below another type.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Directly attached child type nodes.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Returns true if the type has no instances of its own.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Distance from the tree root; top-level types have depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of live instances of exactly this type.
    #[must_use]
    pub fn own_len(&self) -> usize {
        self.own_count
    }

    /// Number of live instances of this type and all its subtypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subtree_count
    }

    /// Returns true if neither the type nor its subtypes have instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subtree_count == 0
    }

    pub(crate) fn is_root(&self) -> bool {
        self.type_id.is_none()
    }
}
