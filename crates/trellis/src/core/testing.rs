/*! A standard set of instrumented plugins for testing. */
use std::{cell::RefCell, rc::Rc};

use crate::core::{
    Field, Plugin, Registry, Settings, Store, TypeRef,
    error::Result,
    handlers::Handler,
    render::TextRender,
    value::Value,
};

thread_local! {
    static LOG: RefCell<Vec<String>> = const { RefCell::new(vec![]) };
}

/// Append an entry to the thread-local call log.
pub fn record(entry: impl Into<String>) {
    LOG.with(|l| l.borrow_mut().push(entry.into()));
}

/// The recorded call log.
pub fn log() -> Vec<String> {
    LOG.with(|l| l.borrow().clone())
}

/// Clear the call log.
pub fn reset_log() {
    LOG.with(|l| l.borrow_mut().clear());
}

/// A button with a click counter. `onClick` increments `count` and is bound
/// by default.
pub fn btn() -> Plugin {
    Plugin::new("Btn")
        .field("count", Field::int(0))
        .field("label", Field::string("Btn"))
        .views("doubled", |tree, node| {
            let count = tree.node(node)?.get("count").and_then(Value::as_int);
            Ok(Value::Int(count.unwrap_or_default() * 2))
        })
        .actions("reset", |tree, node, _| {
            tree.set(node, "count", Value::Int(0))?;
            Ok(Value::Null)
        })
        .events([(
            "onClick",
            Handler::sync(|ctx, _| {
                let node = ctx.node()?;
                let store = ctx.store();
                let count = store.get(node, "count")?.as_int().unwrap_or_default() + 1;
                store.set(node, "count", Value::Int(count))?;
                record(format!("Btn.onClick {count}"));
                Ok(Value::Int(count))
            }),
        )])
        .bind_event("onClick", "Btn.onClick")
}

/// A container with an optional single child and a child list.
pub fn panel() -> Plugin {
    Plugin::new("Panel")
        .field("content", Field::node(TypeRef::any_registered()).optional())
        .field("items", Field::nodes(TypeRef::any_registered()))
}

/// A text leaf.
pub fn label() -> Plugin {
    Plugin::new("Label")
        .field("text", Field::string(""))
        .extend(TextRender::new("text"))
}

/// A registry holding the test plugins.
pub fn registry() -> Result<Rc<Registry>> {
    let registry = Registry::new(Settings::default());
    for plugin in [btn(), panel(), label()] {
        registry.register(plugin)?;
    }
    Ok(Rc::new(registry))
}

/// A fresh store over [`registry`].
pub fn store() -> Result<Store> {
    reset_log();
    Ok(Store::new(registry()?))
}
