//! Host element lookup.
//!
//! Rendered nodes correspond to elements owned by the host environment. The
//! core only needs to find an element by node display id and to focus it;
//! non-visual hosts use [`NoopHost`].

use std::fmt;

/// Opaque reference to a host element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// Display id of the node the element renders.
    node_id: String,
}

impl ElementHandle {
    /// A handle for the element rendering a node.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    /// Display id of the node the element renders.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.node_id)
    }
}

/// Element lookup and focus, supplied by the host.
pub trait HostElements {
    /// The element rendering a node, if mounted.
    fn element(&self, node_id: &str) -> Option<ElementHandle>;

    /// Focus an element. Returns false if the element could not take focus.
    fn focus(&self, element: &ElementHandle) -> bool;
}

/// Host without elements.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostElements for NoopHost {
    fn element(&self, _node_id: &str) -> Option<ElementHandle> {
        None
    }

    fn focus(&self, _element: &ElementHandle) -> bool {
        false
    }
}
