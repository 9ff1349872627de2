//! Trellis: pluggable node types over an observable model tree.
//!
//! Trellis lets applications declare node types ("plugins") with typed
//! fields, views, actions, reactions, event handlers and styling, then
//! instantiate them into an arena-backed tree whose changes drive reactive
//! side effects.
//!
//! # Quick Start
//!
//! The main entry points are:
//! - [`Plugin`] - A declarative node type built up with chained calls
//! - [`Registry`] - The name-indexed plugin and handler registry
//! - [`Store`] - The live tree plus its reactive machinery
//!
//! # Module Organization
//!
//! - [`handlers`] - Handler registry and the asynchronous invocation pipeline
//! - [`observer`] - Per-node reaction tracking
//! - [`style`] - Style templates, decoding and the styled-object cache

#![warn(missing_docs)]

// Internal core module - re-export specific items below
mod core;

#[cfg(any(test, feature = "testing"))]
pub use core::testing;
pub use core::{
    CssSlot, DisableEvents, Field, FieldKind, Node, NodeId, Plugin, PluginRef, Props, Registry,
    Settings, Store, StoreBuilder, Tree, TypeRef, Value,
};
pub use core::{
    datatypes, dump, error, global, handlers, host, logging, observer, plugin, reactor, render,
    script, style, transaction, value,
};
