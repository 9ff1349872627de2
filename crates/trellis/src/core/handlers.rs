//! Handler registry and the asynchronous invocation pipeline.
//!
//! Handlers are registered under dotted ids such as `Btn.onClick`. A handler
//! receives a [`HandlerContext`] carrying the store, the tree root, the node
//! the event concerns and any extra parameters, plus positional arguments.
//! Handlers declared by plugins are wrapped so that they resolve their own
//! node, respect disabled events, run inside the store's transaction wrapper
//! and route failures through registered error handlers.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::core::{
    NodeId, Store,
    error::{Error, Result},
    value::{ToValue, Value},
};

/// Event name fired when a rendered element mounts. It is dispatched even
/// when the event payload asks to cancel bubbling.
pub const MOUNT_EVENT: &str = "onComponentDidMount";

/// Future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>>>>;

/// Deferred handler invocation passed to a transaction wrapper.
pub type TaskFn = Box<dyn FnOnce() -> HandlerFuture>;

/// A callable handler.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn(HandlerContext, Vec<Value>) -> HandlerFuture>);

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

impl Handler {
    /// An asynchronous handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HandlerContext, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + 'static,
    {
        Self(Rc::new(
            move |ctx: HandlerContext, args: Vec<Value>| -> HandlerFuture { Box::pin(f(ctx, args)) },
        ))
    }

    /// A handler whose body completes synchronously.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&HandlerContext, &[Value]) -> anyhow::Result<Value> + 'static,
    {
        Self(Rc::new(
            move |ctx: HandlerContext, args: Vec<Value>| -> HandlerFuture {
                let result = f(&ctx, &args);
                Box::pin(async move { result })
            },
        ))
    }

    /// Invoke the handler.
    pub fn call(&self, ctx: HandlerContext, args: Vec<Value>) -> HandlerFuture {
        (self.0)(ctx, args)
    }
}

/// Persisted reference to a registered handler, by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerRef(String);

impl HandlerRef {
    /// Reference a handler id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Handler id.
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Owning plugin, for ids of the form `plugin.function`.
    pub fn plugin(&self) -> Option<&str> {
        let mut segments = self.0.split('.');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(plugin), Some(_), None) => Some(plugin),
            _ => None,
        }
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HandlerRef {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A registered handler.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    /// Registered id.
    id: String,
    /// The callable.
    handler: Handler,
}

impl HandlerEntry {
    /// Registered id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display alias; the registered id.
    pub fn alias(&self) -> &str {
        &self.id
    }

    /// The callable.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// Handler side table, keyed by id.
#[derive(Debug, Default)]
pub(crate) struct HandlerTable {
    /// Entries by id.
    entries: RefCell<BTreeMap<String, HandlerEntry>>,
}

impl HandlerTable {
    /// Register a handler, replacing any previous entry with the same id.
    pub(crate) fn add(&self, id: &str, handler: Handler) {
        trace!("handler registered: {id}");
        self.entries.borrow_mut().insert(
            id.to_string(),
            HandlerEntry {
                id: id.to_string(),
                handler,
            },
        );
    }

    /// Look up an entry.
    pub(crate) fn get(&self, id: &str) -> Option<HandlerEntry> {
        self.entries.borrow().get(id).cloned()
    }

    /// Every registered id.
    pub(crate) fn ids(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Function names registered under `plugin.`.
    pub(crate) fn plugin_names(&self, plugin: &str) -> Vec<String> {
        let prefix = format!("{plugin}.");
        self.entries
            .borrow()
            .keys()
            .filter_map(|id| id.strip_prefix(&prefix))
            .map(str::to_string)
            .collect()
    }
}

/// Body of a plugin-declared handler.
#[derive(Debug, Clone)]
pub enum HandlerSource {
    /// A Rust handler.
    Native(Handler),
    /// A script closure source, compiled at registration.
    Script(String),
}

impl HandlerSource {
    /// A script closure source.
    pub fn script(source: impl Into<String>) -> Self {
        Self::Script(source.into())
    }
}

impl From<Handler> for HandlerSource {
    fn from(handler: Handler) -> Self {
        Self::Native(handler)
    }
}

/// Error callback invoked when a wrapped handler fails. Returning true marks
/// the error as handled.
#[derive(Clone)]
pub struct ErrHandler {
    /// Callback.
    func: Rc<dyn Fn(&anyhow::Error, &[Value]) -> bool>,
    /// Extra arguments passed to the callback.
    args: Vec<Value>,
}

impl fmt::Debug for ErrHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrHandler")
            .field("args", &self.args)
            .finish()
    }
}

impl ErrHandler {
    /// Wrap a callback.
    pub fn new(func: impl Fn(&anyhow::Error, &[Value]) -> bool + 'static) -> Self {
        Self {
            func: Rc::new(func),
            args: vec![],
        }
    }

    /// Builder: extra arguments passed after the error.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Run the callback.
    fn handle(&self, err: &anyhow::Error) -> bool {
        (self.func)(err, &self.args)
    }
}

/// Parameters supplied by the caller of a handler.
#[derive(Debug, Clone, Default)]
pub struct Params {
    /// Node the event concerns.
    data: Option<NodeId>,
    /// Node the handler acts on.
    self_node: Option<NodeId>,
    /// Event name.
    event_name: Option<String>,
    /// Event payload.
    event: Option<Value>,
    /// Extra named parameters.
    values: BTreeMap<String, Value>,
    /// Error handlers.
    err_handlers: Vec<ErrHandler>,
}

impl Params {
    /// Empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: the node the event concerns.
    pub fn data(mut self, node: NodeId) -> Self {
        self.data = Some(node);
        self
    }

    /// Builder: the node the handler acts on.
    pub fn self_node(mut self, node: NodeId) -> Self {
        self.self_node = Some(node);
        self
    }

    /// Builder: event name.
    pub fn event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    /// Builder: event payload.
    pub fn event(mut self, event: impl ToValue) -> Self {
        self.event = Some(event.to_value());
        self
    }

    /// Builder: an extra named parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl ToValue) -> Self {
        self.values.insert(key.into(), value.to_value());
        self
    }

    /// Builder: an error handler.
    pub fn on_error(mut self, handler: ErrHandler) -> Self {
        self.err_handlers.push(handler);
        self
    }
}

/// Everything a handler receives besides its positional arguments.
#[derive(Clone)]
pub struct HandlerContext {
    /// Store the handler runs against.
    store: Store,
    /// Tree root at invocation time.
    root: Option<NodeId>,
    /// Node the event concerns.
    data: Option<NodeId>,
    /// Node the handler acts on.
    self_node: Option<NodeId>,
    /// Event name.
    event_name: Option<String>,
    /// Event payload.
    event: Option<Value>,
    /// Extra named parameters.
    values: BTreeMap<String, Value>,
    /// Error handlers, shared so handlers can register more.
    err_handlers: Rc<RefCell<Vec<ErrHandler>>>,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("root", &self.root)
            .field("data", &self.data)
            .field("self_node", &self.self_node)
            .field("event_name", &self.event_name)
            .field("values", &self.values)
            .finish()
    }
}

impl HandlerContext {
    /// Build a context from caller parameters.
    pub fn new(store: Store, params: Params) -> Self {
        Self {
            root: store.root(),
            store,
            data: params.data,
            self_node: params.self_node,
            event_name: params.event_name,
            event: params.event,
            values: params.values,
            err_handlers: Rc::new(RefCell::new(params.err_handlers)),
        }
    }

    /// The store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The tree root at invocation time.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// The node the event concerns.
    pub fn data(&self) -> Option<NodeId> {
        self.data
    }

    /// The node the handler acts on.
    pub fn self_node(&self) -> Option<NodeId> {
        self.self_node
    }

    /// The node to act on: `self_node`, falling back to `data`.
    pub fn node(&self) -> anyhow::Result<NodeId> {
        self.self_node
            .or(self.data)
            .ok_or_else(|| anyhow::anyhow!("handler invoked without a node"))
    }

    /// Event name.
    pub fn event_name(&self) -> Option<&str> {
        self.event_name.as_deref()
    }

    /// Event payload.
    pub fn event(&self) -> Option<&Value> {
        self.event.as_ref()
    }

    /// An extra named parameter.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Every extra named parameter.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Register an error handler for this invocation.
    pub fn on_error(&self, handler: ErrHandler) {
        self.err_handlers.borrow_mut().push(handler);
    }

    /// Set the node the handler acts on.
    pub(crate) fn set_self_node(&mut self, node: Option<NodeId>) {
        self.self_node = node;
    }

    /// Argument map handed to script handlers.
    pub(crate) fn script_arg(&self, args: &[Value]) -> Value {
        let mut map = self.values.clone();
        map.insert("event_name".into(), self.event_name.clone().to_value());
        map.insert("event".into(), self.event.clone().unwrap_or_default());
        map.insert("args".into(), Value::Array(args.to_vec()));
        map.insert("data".into(), self.data.to_value());
        map.insert("self".into(), self.self_node.to_value());
        Value::Map(map)
    }
}

/// What to invoke: a handler id or an already resolved entry.
#[derive(Debug, Clone)]
pub enum HandlerTarget {
    /// Registered handler id.
    Id(String),
    /// Resolved entry.
    Entry(HandlerEntry),
}

impl From<&str> for HandlerTarget {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for HandlerTarget {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<&HandlerRef> for HandlerTarget {
    fn from(r: &HandlerRef) -> Self {
        Self::Id(r.id().to_string())
    }
}

impl From<HandlerEntry> for HandlerTarget {
    fn from(entry: HandlerEntry) -> Self {
        Self::Entry(entry)
    }
}

/// Invoke a handler by id or entry.
///
/// For ids of the form `plugin.function`, when the caller supplies `data` but
/// no `self_node`, the owning plugin is asked to locate its node from `data`;
/// a failed lookup leaves `self_node` unset.
pub async fn call_ui_handler(
    store: &Store,
    target: impl Into<HandlerTarget>,
    params: Params,
    args: Vec<Value>,
) -> Result<Value> {
    let registry = store.registry();
    let entry = match target.into() {
        HandlerTarget::Entry(entry) => entry,
        HandlerTarget::Id(id) => registry.event_handler_node(&id)?,
    };
    let mut ctx = HandlerContext::new(store.clone(), params);
    let owner = HandlerRef::new(entry.id());
    if ctx.self_node.is_none() {
        if let (Some(data), Some(plugin)) = (ctx.data, owner.plugin()) {
            if let Ok(plugin) = registry.get(plugin) {
                ctx.self_node = store
                    .read(|tree| Ok(plugin.self_node(tree, data)))
                    .ok()
                    .flatten();
            }
        }
    }
    entry
        .handler()
        .call(ctx, args)
        .await
        .map_err(Error::from_anyhow)
}

/// Dispatch a host event to the handler a node binds for it.
///
/// Returns `None` when nothing ran: the node is gone, the event is disabled
/// or unbound, its handler cannot be resolved, or the payload cancels
/// bubbling (except for [`MOUNT_EVENT`]).
pub async fn dispatch_event(
    store: &Store,
    node: NodeId,
    event_name: &str,
    event: Option<Value>,
    args: Vec<Value>,
) -> Result<Option<Value>> {
    let lookup = store.read(|tree| {
        let Some(n) = tree.get(node) else {
            return Ok(None);
        };
        if n.disable_events().blocks(event_name) {
            return Ok(None);
        }
        Ok(n.events()
            .get(event_name)
            .cloned()
            .map(|r| (r, n.node_id().to_string())))
    })?;
    let Some((handler_ref, node_id)) = lookup else {
        return Ok(None);
    };
    let cancelled = event
        .as_ref()
        .and_then(|e| e.get("cancelBubble"))
        .is_some_and(Value::is_truthy);
    if event_name != MOUNT_EVENT && cancelled {
        debug!("{event_name} on {node_id} cancelled");
        return Ok(None);
    }
    let Some(entry) = store.registry().resolve_handler(&handler_ref) else {
        return Ok(None);
    };
    let mut params = Params::new()
        .data(node)
        .event_name(event_name)
        .with("id", node_id);
    if let Some(event) = event {
        params = params.event(event);
    }
    let ctx = HandlerContext::new(store.clone(), params);
    entry
        .handler()
        .call(ctx, args)
        .await
        .map(Some)
        .map_err(Error::from_anyhow)
}

/// Debug names, `event@alias`, of a node's resolvable event bindings.
pub fn event_bindings(store: &Store, node: NodeId) -> Result<BTreeMap<String, String>> {
    let events = store.read(|tree| Ok(tree.node(node)?.events().clone()))?;
    let registry = store.registry();
    Ok(events
        .into_iter()
        .filter_map(|(event, r)| {
            registry
                .resolve_handler(&r)
                .map(|entry| (event.clone(), format!("{event}@{}", entry.alias())))
        })
        .collect())
}

/// Wrap a plugin-declared handler with node resolution, the disabled-events
/// check, the transaction wrapper and error handler routing.
pub(crate) fn wrap_plugin_handler(
    plugin: &str,
    name: &str,
    callback: Handler,
    no_tx: bool,
) -> Handler {
    let plugin: Rc<str> = plugin.into();
    let debug_cmd: Rc<str> = format!("{plugin}.{name}").into();
    Handler::new(move |mut ctx: HandlerContext, args: Vec<Value>| {
        let plugin = plugin.clone();
        let debug_cmd = debug_cmd.clone();
        let callback = callback.clone();
        async move {
            let store = ctx.store().clone();
            let data = ctx.data();
            if let Some(data) = data {
                if ctx.self_node().is_none() {
                    ctx.set_self_node(store.resolve_self(&plugin, data));
                }
                let enabled = store.read(|tree| {
                    Ok(tree.get(data).is_some_and(|n| {
                        let disabled = n.disable_events();
                        match ctx.event_name() {
                            Some(event) => !disabled.blocks(event),
                            None => !disabled.blocks_all(),
                        }
                    }))
                })?;
                if !enabled {
                    trace!("{debug_cmd} skipped: node gone or events disabled");
                    return Ok(Value::Null);
                }
            }
            let err_handlers = ctx.err_handlers.clone();
            let event = ctx.event_name().unwrap_or_default().to_string();
            let wrapper = if no_tx {
                None
            } else {
                store.transaction_wrapper()
            };
            let result = match wrapper {
                Some(wrapper) => {
                    let task_ctx = ctx.clone();
                    let cb = callback.clone();
                    wrapper
                        .wrap(&store, Box::new(move || cb.call(task_ctx, args)))
                        .await
                }
                None => callback.call(ctx, args).await,
            };
            let err = match result {
                Ok(v) => return Ok(v),
                Err(err) => err,
            };
            let handlers = err_handlers.borrow().clone();
            let mut handled = false;
            for h in &handlers {
                handled |= h.handle(&err);
            }
            if handled {
                return Ok(Value::Null);
            }
            let node = data
                .and_then(|d| store.display_id(d))
                .unwrap_or_default();
            error!("Error handling {event} command: '{debug_cmd}' on node {node}");
            Err(anyhow::Error::new(Error::Handler {
                node,
                event,
                handler: debug_cmd.to_string(),
                source: err,
            }))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_ref_plugin() {
        assert_eq!(HandlerRef::new("Btn.onClick").plugin(), Some("Btn"));
        assert_eq!(HandlerRef::new("onClick").plugin(), None);
        assert_eq!(HandlerRef::new("a.b.c").plugin(), None);
    }

    #[test]
    fn handler_table_names() {
        let table = HandlerTable::default();
        let h = Handler::sync(|_, _| Ok(Value::Null));
        table.add("Btn.onClick", h.clone());
        table.add("Btn.onHover", h.clone());
        table.add("Panel.onClick", h);
        assert_eq!(table.plugin_names("Btn"), vec!["onClick", "onHover"]);
        assert_eq!(table.ids().len(), 3);
        assert!(table.get("Panel.onClick").is_some());
        assert!(table.get("Panel.onHover").is_none());
    }

    #[test]
    fn err_handler_receives_args() {
        let h = ErrHandler::new(|err, args| {
            err.to_string() == "boom" && args == [Value::Int(7)]
        })
        .with_args(vec![Value::Int(7)]);
        assert!(h.handle(&anyhow::anyhow!("boom")));
        assert!(!h.handle(&anyhow::anyhow!("other")));
    }
}
