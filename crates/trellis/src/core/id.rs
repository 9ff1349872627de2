//! Node identifiers.

use slotmap::new_key_type;

new_key_type! {
    /// Opaque identifier for a node stored in the tree arena.
    pub struct NodeId;
}
