#![allow(clippy::new_without_default)]
//! Core types for the Trellis plugin framework.

// Core modules - public
/// Data type registry.
pub mod datatypes;
/// Debug dump utilities.
pub mod dump;
/// Core error types.
pub mod error;
/// Process-wide registry slot.
pub mod global;
/// Handler registry and invocation pipeline.
pub mod handlers;
/// Host element lookup.
pub mod host;
/// Logging setup.
pub mod logging;
/// Per-node reaction tracking.
pub mod observer;
/// Reactive primitive and the default reactor.
pub mod reactor;
/// Render strategies and host element descriptions.
pub mod render;
/// Scripting support.
pub mod script;
/// Style templates and the styled-object cache.
pub mod style;
/// Testing utilities.
#[cfg(any(test, feature = "testing"))]
pub mod testing;
/// Transaction wrappers for handler invocation.
pub mod transaction;
/// Dynamic values.
pub mod value;

// Core modules - internal
/// Node ID types.
pub mod id;
/// Node state.
pub mod node;
/// Plugin descriptors and type references.
pub mod plugin;
/// Plugin registry.
pub mod registry;
/// Runtime settings.
pub mod settings;
/// Live tree and reactive machinery.
pub mod store;
/// Node arena.
pub mod tree;

// Public exports from internal modules
pub use id::NodeId;
pub use node::{DisableEvents, Node};
pub use plugin::{Field, FieldKind, Plugin, PluginRef, TypeRef};
pub use registry::Registry;
pub use settings::Settings;
pub use store::{Store, StoreBuilder};
pub use style::CssSlot;
pub use tree::Tree;
pub use value::{Props, Value};
