//! Persisted type hierarchy.
//!
//! Attached types form a tree mirroring table inheritance. Each node owns
//! three sentinel proxies in the store-wide proxy list, which gives O(1)
//! insertion and O(1) construction of per-type views with or without
//! subtypes.

mod node;
mod tree;
mod view;

pub use node::PrototypeNode;
pub use tree::{PrototypeIter, PrototypeTree};
pub use view::{View, ViewIter};
