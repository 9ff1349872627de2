//! Per-node reaction tracking.
//!
//! Every node owns an [`Observer`] that holds the disposers of the reactions
//! registered against it. Reactions are identified by name plus the identity
//! of their observe and effect closures, so registering the same reaction
//! twice is a no-op. Effects only run while the node is alive and the tree is
//! protected; everything still registered is disposed when the node is
//! destroyed.

use std::{any::TypeId, collections::BTreeMap, fmt, mem, rc::Rc, time::Instant};

use tracing::{debug, error};

use crate::core::{
    NodeId, Store, Tree,
    error::{Error, Result},
    reactor::{Disposer, TrackOptions},
    value::Value,
};

/// Identity of a tracked reaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReactionHandle(String);

impl ReactionHandle {
    /// Handle text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reaction disposers owned by a node.
#[derive(Default)]
pub struct Observer {
    /// Disposers by reaction identity.
    disposers: BTreeMap<ReactionHandle, Disposer>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.disposers.keys()).finish()
    }
}

impl Observer {
    /// Is this reaction registered?
    pub fn contains(&self, handle: &ReactionHandle) -> bool {
        self.disposers.contains_key(handle)
    }

    /// Registered reaction handles.
    pub fn handles(&self) -> Vec<ReactionHandle> {
        self.disposers.keys().cloned().collect()
    }

    /// Number of registered reactions.
    pub fn len(&self) -> usize {
        self.disposers.len()
    }

    /// Are no reactions registered?
    pub fn is_empty(&self) -> bool {
        self.disposers.is_empty()
    }

    /// Take every disposer, leaving the observer empty.
    pub(crate) fn take_all(&mut self) -> Vec<Disposer> {
        mem::take(&mut self.disposers).into_values().collect()
    }
}

/// Observe function of a node reaction.
pub type NodeObserveFn = Rc<dyn Fn(&Tree, NodeId) -> anyhow::Result<Value>>;

/// Effect function of a node reaction.
pub type NodeEffectFn = Rc<dyn Fn(&Store, NodeId, Value) -> anyhow::Result<()>>;

/// A reaction to register against a node.
#[derive(Clone)]
pub struct ReactionSpec {
    /// Observe function.
    observe: NodeObserveFn,
    /// Effect function.
    effect: NodeEffectFn,
    /// Identity of the observe closure.
    observe_key: TypeId,
    /// Identity of the effect closure.
    effect_key: TypeId,
    /// Options.
    options: TrackOptions,
}

impl fmt::Debug for ReactionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionSpec")
            .field("options", &self.options)
            .finish()
    }
}

impl ReactionSpec {
    /// Pair an observe function with an effect.
    pub fn new<O, E>(observe: O, effect: E) -> Self
    where
        O: Fn(&Tree, NodeId) -> anyhow::Result<Value> + 'static,
        E: Fn(&Store, NodeId, Value) -> anyhow::Result<()> + 'static,
    {
        Self {
            observe: Rc::new(observe),
            effect: Rc::new(effect),
            observe_key: TypeId::of::<O>(),
            effect_key: TypeId::of::<E>(),
            options: TrackOptions::default(),
        }
    }

    /// Builder: reaction name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Builder: run the effect once with the initial value.
    pub fn fire_immediately(mut self) -> Self {
        self.options.fire_immediately = true;
        self
    }

    /// Reaction name.
    pub fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    /// Identity of this reaction.
    pub fn handle(&self) -> ReactionHandle {
        ReactionHandle(format!(
            "{} {:?} {:?}",
            self.name().unwrap_or_default(),
            self.observe_key,
            self.effect_key
        ))
    }
}

/// Register a reaction against a node. Registering a reaction whose identity
/// is already tracked on the node returns the existing handle.
pub fn on_track(store: &Store, node: NodeId, spec: ReactionSpec) -> Result<ReactionHandle> {
    let handle = spec.handle();
    let known = store.read(|tree| Ok(tree.node(node)?.observer.contains(&handle)))?;
    if known {
        return Ok(handle);
    }
    let name = spec.name().unwrap_or_default().to_string();
    let weak = store.downgrade();
    let observe = {
        let weak = weak.clone();
        let name = name.clone();
        let f = spec.observe.clone();
        Box::new(move || -> Result<Value> {
            let Some(store) = weak.upgrade() else {
                return Ok(Value::Null);
            };
            store
                .read(|tree| {
                    if tree.is_alive(node) {
                        f(tree, node).map_err(Error::Exec)
                    } else {
                        Ok(Value::Null)
                    }
                })
                .map_err(|e| reaction_error(&name, "value", e))
        })
    };
    let settings = store.registry().settings().clone();
    let effect = {
        let f = spec.effect.clone();
        Box::new(move |value: Value| -> Result<()> {
            let Some(store) = weak.upgrade() else {
                return Ok(());
            };
            let ready = store.read(|tree| Ok(tree.is_alive(node) && tree.is_protected()))?;
            if !ready {
                return Ok(());
            }
            let start = Instant::now();
            f(&store, node, value).map_err(|e| reaction_error(&name, "reaction", Error::Exec(e)))?;
            let elapsed = start.elapsed();
            if settings.dev_mode && elapsed >= settings.slow_reaction {
                debug!("reaction '{name}' took {}ms", elapsed.as_millis());
            }
            Ok(())
        })
    };
    let disposer = store.reactor().reaction(observe, effect, &spec.options)?;
    let stale = store.update(|tree| match tree.get_mut(node) {
        Some(n) => Ok(n.observer.disposers.insert(handle.clone(), disposer)),
        None => Ok(Some(disposer)),
    })?;
    if let Some(stale) = stale {
        stale();
    }
    Ok(handle)
}

/// Log a reaction failure and wrap it with the reaction's name.
fn reaction_error(name: &str, kind: &'static str, err: Error) -> Error {
    let source = match err {
        Error::Exec(e) => e,
        other => anyhow::Error::new(other),
    };
    error!("Error in tracked reaction {kind} '{name}': {source}");
    Error::Reaction {
        name: name.to_string(),
        kind,
        source,
    }
}

/// Run `callback` when the node is destroyed.
pub fn on_destroy<F>(store: &Store, node: NodeId, name: &str, callback: F) -> Result<ReactionHandle>
where
    F: FnOnce() + 'static,
{
    let handle = ReactionHandle(format!("{name} {:?}", TypeId::of::<F>()));
    let disposer: Disposer = Box::new(callback);
    store.update(|tree| {
        let n = tree.node_mut(node)?;
        if !n.observer.contains(&handle) {
            n.observer.disposers.insert(handle.clone(), disposer);
        }
        Ok(())
    })?;
    Ok(handle)
}

/// Dispose a tracked reaction. Unknown handles and repeated calls are
/// ignored.
pub fn stop_tracking(store: &Store, node: NodeId, handle: &ReactionHandle) -> Result<()> {
    let disposer = store.update(|tree| {
        Ok(tree
            .get_mut(node)
            .and_then(|n| n.observer.disposers.remove(handle)))
    })?;
    if let Some(disposer) = disposer {
        disposer();
    }
    Ok(())
}

/// Dispose every reaction tracked on a node.
pub(crate) fn before_destroy(store: &Store, node: NodeId) -> Result<()> {
    let disposers = store.update_quiet(|tree| {
        Ok(tree
            .get_mut(node)
            .map(|n| n.observer.take_all())
            .unwrap_or_default())
    })?;
    for dispose in disposers {
        dispose();
    }
    Ok(())
}
