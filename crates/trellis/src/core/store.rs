//! The store: a tree of nodes bound to a registry.
//!
//! Every mutation goes through [`Store::update`], which flushes reactions
//! once the mutation turn ends. Reads borrow the tree through
//! [`Store::read`]. Both fail with [`Error::Reentrant`] instead of panicking
//! if the tree is already mutably borrowed.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use tracing::{debug, warn};

use crate::core::{
    NodeId, Registry, Tree,
    error::{Error, Result},
    handlers::{self, HandlerTarget, Params},
    host::{HostElements, NoopHost},
    node::{BASE_KEYS, Node, collect_nodes},
    observer::{before_destroy, on_track},
    plugin::{Field, FieldKind, Phase, Plugin, TypeRef},
    reactor::{ReactivePrimitive, Reactor},
    style::{self, CssSlot, StyleTemplate, Styled},
    transaction::{SnapshotTransaction, TransactionWrapper},
    tree::TreeCapture,
    value::{Props, Value},
};

/// Shared store state.
struct StoreInner {
    /// Registry the store's nodes are typed by.
    registry: Rc<Registry>,
    /// Node arena.
    tree: RefCell<Tree>,
    /// Root node.
    root: Cell<Option<NodeId>>,
    /// Reactive primitive.
    reactor: Rc<dyn ReactivePrimitive>,
    /// Brackets plugin handler execution.
    transaction: Option<Rc<dyn TransactionWrapper>>,
    /// Host element lookup.
    host: Rc<dyn HostElements>,
}

/// A tree of nodes bound to a registry. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct Store {
    /// Shared state.
    inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.inner.root.get())
            .field("reactions", &self.inner.reactor.len())
            .finish()
    }
}

/// Non-owning reference to a store.
#[derive(Clone)]
pub struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    /// The store, if still alive.
    pub fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

/// Configures the collaborators of a new store.
pub struct StoreBuilder {
    /// Registry.
    registry: Rc<Registry>,
    /// Reactive primitive; a [`Reactor`] if unset.
    reactor: Option<Rc<dyn ReactivePrimitive>>,
    /// Transaction wrapper.
    transaction: Option<Rc<dyn TransactionWrapper>>,
    /// Host element lookup; [`NoopHost`] if unset.
    host: Option<Rc<dyn HostElements>>,
}

impl StoreBuilder {
    /// Builder: reactive primitive.
    pub fn reactor(mut self, reactor: impl ReactivePrimitive + 'static) -> Self {
        self.reactor = Some(Rc::new(reactor));
        self
    }

    /// Builder: transaction wrapper.
    pub fn transaction(mut self, wrapper: impl TransactionWrapper + 'static) -> Self {
        self.transaction = Some(Rc::new(wrapper));
        self
    }

    /// Builder: run plugin handlers without a transaction wrapper.
    pub fn without_transaction(mut self) -> Self {
        self.transaction = None;
        self
    }

    /// Builder: host element lookup.
    pub fn host(mut self, host: impl HostElements + 'static) -> Self {
        self.host = Some(Rc::new(host));
        self
    }

    /// Build the store.
    pub fn build(self) -> Store {
        let passes = self.registry.settings().max_reaction_passes;
        Store {
            inner: Rc::new(StoreInner {
                registry: self.registry,
                tree: RefCell::new(Tree::new()),
                root: Cell::new(None),
                reactor: self
                    .reactor
                    .unwrap_or_else(|| Rc::new(Reactor::new(passes))),
                transaction: self.transaction,
                host: self.host.unwrap_or_else(|| Rc::new(NoopHost)),
            }),
        }
    }
}

impl Store {
    /// A store with the default collaborators.
    pub fn new(registry: Rc<Registry>) -> Self {
        Self::builder(registry).build()
    }

    /// Configure a store. Plugin handlers run inside a
    /// [`SnapshotTransaction`] unless configured otherwise.
    pub fn builder(registry: Rc<Registry>) -> StoreBuilder {
        StoreBuilder {
            registry,
            reactor: None,
            transaction: Some(Rc::new(SnapshotTransaction)),
            host: None,
        }
    }

    /// The registry.
    pub fn registry(&self) -> &Rc<Registry> {
        &self.inner.registry
    }

    /// The reactive primitive.
    pub fn reactor(&self) -> &Rc<dyn ReactivePrimitive> {
        &self.inner.reactor
    }

    /// Host element lookup.
    pub fn host(&self) -> &Rc<dyn HostElements> {
        &self.inner.host
    }

    /// The transaction wrapper, if any.
    pub fn transaction_wrapper(&self) -> Option<Rc<dyn TransactionWrapper>> {
        self.inner.transaction.clone()
    }

    /// A non-owning reference.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Rc::downgrade(&self.inner))
    }

    /// The root node.
    pub fn root(&self) -> Option<NodeId> {
        self.inner.root.get()
    }

    /// Make a detached node the root.
    pub fn set_root(&self, node: NodeId) -> Result<()> {
        self.read(|tree| {
            tree.node(node)?;
            if tree.parent(node).is_some() {
                return Err(Error::Internal("root must not have a parent".into()));
            }
            Ok(())
        })?;
        self.inner.root.set(Some(node));
        Ok(())
    }

    /// Borrow the tree.
    pub fn read<R>(&self, f: impl FnOnce(&Tree) -> Result<R>) -> Result<R> {
        let tree = self.inner.tree.try_borrow().map_err(|_| Error::Reentrant)?;
        f(&tree)
    }

    /// Mutate the tree, then flush reactions. Reactions are flushed even if
    /// the mutation fails part way; the mutation's error wins.
    pub fn update<R>(&self, f: impl FnOnce(&mut Tree) -> Result<R>) -> Result<R> {
        let result = self.update_quiet(f);
        let flushed = self.inner.reactor.flush();
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Mutate the tree without flushing reactions.
    pub(crate) fn update_quiet<R>(&self, f: impl FnOnce(&mut Tree) -> Result<R>) -> Result<R> {
        let mut tree = self
            .inner
            .tree
            .try_borrow_mut()
            .map_err(|_| Error::Reentrant)?;
        f(&mut tree)
    }

    /// Display id of a live node.
    pub fn display_id(&self, node: NodeId) -> Option<String> {
        self.read(|tree| Ok(tree.get(node).map(|n| n.node_id().to_string())))
            .ok()
            .flatten()
    }

    /// The node instantiating `plugin` at or above `data`.
    pub fn resolve_self(&self, plugin: &str, data: NodeId) -> Option<NodeId> {
        let plugin = self.registry().find(plugin)?;
        self.read(|tree| Ok(plugin.self_node(tree, data)))
            .ok()
            .flatten()
    }

    /// Plugin descriptor of a live node.
    fn plugin_of(&self, node: NodeId) -> Result<Rc<Plugin>> {
        let name = self.read(|tree| Ok(tree.node(node)?.plugin_type().to_string()))?;
        self.registry().get(&name)
    }

    /// Create a node of a registered plugin.
    pub fn create(&self, plugin: &str, props: Props) -> Result<NodeId> {
        self.registry().get(plugin)?.create(self, props)
    }

    /// Default node creation: validate props against the plugin's fields,
    /// create child nodes from nested snapshots, install the node and its
    /// after-create reactions. Constructor overrides call this.
    pub fn create_model(&self, plugin: &Plugin, mut props: Props) -> Result<NodeId> {
        let name = plugin.name();
        match props.remove("type") {
            None | Some(Value::Null) => {}
            Some(Value::String(t)) if t == name => {}
            Some(other) => {
                return Err(Error::InvalidProps {
                    plugin: name.to_string(),
                    message: format!("type {} does not match", other.to_css_string()),
                });
            }
        }

        let mut created = vec![];
        let result = self.build_node(plugin, &mut props, &mut created);
        let id = match result {
            Ok(id) => id,
            Err(err) => {
                for child in created {
                    if self.read(|tree| Ok(tree.is_alive(child)))? {
                        self.destroy(child)?;
                    }
                }
                return Err(err);
            }
        };

        let ignored: Vec<&str> = props
            .keys()
            .map(String::as_str)
            .filter(|k| !BASE_KEYS.contains(k))
            .collect();
        if self.registry().settings().dev_mode && !ignored.is_empty() {
            warn!(
                "'{name}.create(...)' ignores following fields: {}",
                ignored.join(", ")
            );
        }

        self.update(|tree| {
            let n = tree.node_mut(id)?;
            for (event, handler) in plugin.default_events() {
                n.events
                    .entry(event.clone())
                    .or_insert_with(|| handler.clone());
            }
            n.merge_default_events();
            Ok(())
        })?;
        self.install_reactions(plugin, id, Phase::AfterCreate)?;
        let children = self.read(|tree| Ok(tree.children(id)))?;
        for child in children {
            self.after_attach(child)?;
        }
        debug!("created {name} node {}", self.display_id(id).unwrap_or_default());
        Ok(id)
    }

    /// Resolve field values and insert the node. Child nodes created along
    /// the way are recorded in `created`.
    fn build_node(
        &self,
        plugin: &Plugin,
        props: &mut Props,
        created: &mut Vec<NodeId>,
    ) -> Result<NodeId> {
        let name = plugin.name();
        let mut fields = vec![];
        for (field_name, field) in plugin.fields() {
            let value = match props.remove(field_name) {
                Some(value) => self.coerce(name, field_name, field, value, created)?,
                None => self.default_field(name, field_name, field, created)?,
            };
            fields.push((field_name.clone(), value));
        }

        let mut node = Node::new(name);
        node.inner_css = plugin.css(CssSlot::Inner).clone();
        node.outer_css = plugin.css(CssSlot::Outer).clone();
        for key in BASE_KEYS {
            if let Some(value) = props.remove(*key) {
                node.apply_base(key, &value)
                    .map_err(|e| Error::InvalidProps {
                        plugin: name.to_string(),
                        message: format!("{key}: {e}"),
                    })?;
            }
        }
        for (event, handler) in plugin.event_bindings() {
            node.events
                .entry(event.clone())
                .or_insert_with(|| handler.clone());
        }
        for (field_name, _) in &fields {
            node.fields.insert(field_name.clone(), Value::Null);
        }

        self.update(|tree| {
            let id = tree.insert(node);
            for (field_name, value) in fields {
                if let Err(e) = tree.set(id, &field_name, value) {
                    tree.remove(id);
                    return Err(e);
                }
            }
            Ok(id)
        })
    }

    /// Value of a field absent from creation props.
    fn default_field(
        &self,
        plugin: &str,
        field_name: &str,
        field: &Field,
        created: &mut Vec<NodeId>,
    ) -> Result<Value> {
        let missing = || Error::InvalidProps {
            plugin: plugin.to_string(),
            message: format!("missing required field '{field_name}'"),
        };
        match field.kind() {
            FieldKind::Node(t) if !field.is_optional() => {
                let Some(factory) = t.factory() else {
                    return Err(missing());
                };
                let target = t.resolve(self.registry())?.select(None).ok_or_else(missing)?;
                let id = factory(self, &target)?;
                created.push(id);
                Ok(Value::Node(id))
            }
            _ => Ok(field.default_value().clone()),
        }
    }

    /// Check a field value and instantiate nested snapshots.
    fn coerce(
        &self,
        plugin: &str,
        field_name: &str,
        field: &Field,
        value: Value,
        created: &mut Vec<NodeId>,
    ) -> Result<Value> {
        field.check(&value).map_err(|message| Error::InvalidProps {
            plugin: plugin.to_string(),
            message: format!("{field_name}: {message}"),
        })?;
        match (field.kind(), value) {
            (FieldKind::Node(t), value) => self.coerce_node(t, value, created),
            (FieldKind::Nodes(t), Value::Array(items)) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|v| self.coerce_node(t, v, created))
                    .collect::<Result<_>>()?,
            )),
            (FieldKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (_, value) => Ok(value),
        }
    }

    /// Check a node reference against a type, creating the node if the value
    /// is a snapshot.
    fn coerce_node(&self, t: &TypeRef, value: Value, created: &mut Vec<NodeId>) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Map(map) => {
                let resolved = t.resolve(self.registry())?;
                let type_name = map.get("type").and_then(Value::as_str);
                let plugin = resolved
                    .select(type_name)
                    .ok_or_else(|| Error::InvalidProps {
                        plugin: t.label().to_string(),
                        message: format!(
                            "snapshot type {type_name:?} is not one of {:?}",
                            resolved.names()
                        ),
                    })?;
                let id = plugin.create(self, map)?;
                created.push(id);
                Ok(Value::Node(id))
            }
            Value::Node(id) => {
                let found = self.read(|tree| Ok(tree.node(id)?.plugin_type().to_string()))?;
                let resolved = t.resolve(self.registry())?;
                if !resolved.admits(&found) {
                    return Err(Error::InvalidProps {
                        plugin: t.label().to_string(),
                        message: format!("{found} is not one of {:?}", resolved.names()),
                    });
                }
                Ok(Value::Node(id))
            }
            other => Err(Error::TypeMismatch {
                expected: "Node",
                got: other.kind_name(),
            }),
        }
    }

    /// Register a node's reactions for a phase. Unnamed reactions are named
    /// `Type[index]`.
    fn install_reactions(&self, plugin: &Plugin, node: NodeId, phase: Phase) -> Result<()> {
        let decls: Vec<_> = plugin
            .reactions
            .iter()
            .filter(|d| d.phase == phase)
            .cloned()
            .collect();
        if decls.is_empty() {
            return Ok(());
        }
        let specs = self.read(|tree| {
            Ok(decls
                .iter()
                .flat_map(|d| (d.build)(tree, node))
                .collect::<Vec<_>>())
        })?;
        for (idx, spec) in specs.into_iter().enumerate() {
            let spec = if spec.name().is_none() {
                spec.named(format!("{}[{idx}]", plugin.name()))
            } else {
                spec
            };
            on_track(self, node, spec)?;
        }
        Ok(())
    }

    /// Run a node's after-attach reactions.
    fn after_attach(&self, node: NodeId) -> Result<()> {
        let plugin = self.plugin_of(node)?;
        self.install_reactions(&plugin, node, Phase::AfterAttach)
    }

    /// Value of a declared field.
    pub fn get(&self, node: NodeId, field: &str) -> Result<Value> {
        self.read(|tree| {
            let n = tree.node(node)?;
            n.get(field).cloned().ok_or_else(|| Error::UnknownField {
                plugin: n.plugin_type().to_string(),
                field: field.to_string(),
            })
        })
    }

    /// Assign a declared field. Snapshots in node-typed fields are
    /// instantiated; nodes released from the field are destroyed; nodes that
    /// gain a parent run their after-attach reactions.
    pub fn set(&self, node: NodeId, field: &str, value: Value) -> Result<()> {
        let plugin = self.plugin_of(node)?;
        let Some(declared) = plugin.fields().get(field) else {
            return Err(Error::UnknownField {
                plugin: plugin.name().to_string(),
                field: field.to_string(),
            });
        };
        let mut created = vec![];
        let value = self.coerce(plugin.name(), field, declared, value, &mut created)?;
        let (before, orphans) = self.read(|tree| {
            let n = tree.node(node)?;
            let mut before = vec![];
            if let Some(old) = n.get(field) {
                collect_nodes(old, &mut before);
            }
            let mut incoming = vec![];
            collect_nodes(&value, &mut incoming);
            let orphans: Vec<NodeId> = incoming
                .into_iter()
                .filter(|c| tree.parent(*c).is_none())
                .collect();
            Ok((before, orphans))
        })?;
        self.update(|tree| tree.set(node, field, value))?;
        let released = self.read(|tree| {
            Ok(before
                .into_iter()
                .filter(|c| tree.is_alive(*c) && tree.parent(*c).is_none())
                .collect::<Vec<_>>())
        })?;
        for child in released {
            self.destroy(child)?;
        }
        for child in orphans {
            self.after_attach(child)?;
        }
        Ok(())
    }

    /// Attach a detached node under a parent field: appended for node-list
    /// fields, replacing the previous child otherwise.
    pub fn attach(&self, parent: NodeId, field: &str, child: NodeId) -> Result<()> {
        let plugin = self.plugin_of(parent)?;
        let value = match plugin.fields().get(field).map(Field::kind) {
            Some(FieldKind::Nodes(_)) => {
                let mut items = self
                    .get(parent, field)?
                    .as_array()
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default();
                items.push(Value::Node(child));
                Value::Array(items)
            }
            _ => Value::Node(child),
        };
        self.set(parent, field, value)
    }

    /// Destroy a node and its subtree: dispose every reaction and teardown
    /// callback, bottom up, then remove the nodes and unlink the subtree from
    /// its parent.
    pub fn destroy(&self, node: NodeId) -> Result<()> {
        let order = self.read(|tree| {
            tree.node(node)?;
            Ok(tree.subtree_post_order(node))
        })?;
        for n in &order {
            before_destroy(self, *n)?;
        }
        self.update(|tree| {
            if let Some(parent) = tree.parent(node) {
                tree.unlink(parent, node);
            }
            for n in order {
                tree.remove(n);
            }
            Ok(())
        })?;
        if self.root() == Some(node) {
            self.inner.root.set(None);
        }
        Ok(())
    }

    /// Evaluate a view.
    pub fn view(&self, node: NodeId, name: &str) -> Result<Value> {
        let plugin = self.plugin_of(node)?;
        let view = plugin.view(name).cloned().ok_or_else(|| Error::UnknownMember {
            plugin: plugin.name().to_string(),
            member: "view",
            name: name.to_string(),
        })?;
        self.read(|tree| view(tree, node).map_err(Error::from_anyhow))
    }

    /// Run an action.
    pub fn action(&self, node: NodeId, name: &str, args: &[Value]) -> Result<Value> {
        let plugin = self.plugin_of(node)?;
        let action = plugin
            .action(name)
            .cloned()
            .ok_or_else(|| Error::UnknownMember {
                plugin: plugin.name().to_string(),
                member: "action",
                name: name.to_string(),
            })?;
        self.update(|tree| action(tree, node, args).map_err(Error::from_anyhow))
    }

    /// Plain-data snapshot of a node and its subtree.
    pub fn snapshot(&self, node: NodeId) -> Result<Value> {
        self.read(|tree| tree.snapshot(node))
    }

    /// Copy the persisted state of every node and the root. The capture
    /// must be closed with [`Store::commit`] or [`Store::rollback`]; until
    /// then destroyed nodes are kept so a rollback can bring them back.
    pub fn capture(&self) -> Result<TreeCapture> {
        let mut capture = self.update_quiet(|tree| Ok(tree.capture()))?;
        capture.root = self.root();
        Ok(capture)
    }

    /// Close a capture, keeping every change made since.
    pub fn commit(&self, capture: TreeCapture) -> Result<()> {
        self.update_quiet(|tree| {
            tree.commit(capture);
            Ok(())
        })
    }

    /// Restore captured state, destroy nodes created since and bring back
    /// nodes destroyed since. Restoration runs with the tree unprotected, so
    /// reactions record restored values without running effects. Revived
    /// nodes get their reactions reinstalled; their destroy callbacks have
    /// already run.
    pub fn rollback(&self, capture: TreeCapture) -> Result<()> {
        let root = capture.root;
        let restored = self.update_quiet(|tree| {
            tree.set_protected(false);
            Ok(tree.restore(capture))
        })?;
        let mut result = Ok(());
        for node in restored.created {
            if result.is_ok() && self.read(|tree| Ok(tree.is_alive(node)))? {
                result = self.destroy(node);
            }
        }
        let flushed = self.inner.reactor.flush();
        let root = self.update_quiet(|tree| {
            tree.set_protected(true);
            Ok(root.filter(|r| tree.is_alive(*r)))
        })?;
        self.inner.root.set(root);
        for node in restored.revived {
            if result.is_ok() {
                result = self.revive(node);
            }
        }
        result.and(flushed)
    }

    /// Reinstall the reactions of a node brought back by a rollback.
    fn revive(&self, node: NodeId) -> Result<()> {
        let plugin = self.plugin_of(node)?;
        self.install_reactions(&plugin, node, Phase::AfterCreate)?;
        if self.read(|tree| Ok(tree.parent(node).is_some()))? {
            self.install_reactions(&plugin, node, Phase::AfterAttach)?;
        }
        Ok(())
    }

    /// Replace a node's style slot and rebuild its styled object.
    pub fn set_css_template(
        &self,
        node: NodeId,
        slot: CssSlot,
        template: StyleTemplate,
    ) -> Result<Option<Rc<Styled>>> {
        style::set_template(self, node, slot, template)
    }

    /// Replace a node's inner style.
    pub fn set_inner_css(&self, node: NodeId, template: StyleTemplate) -> Result<Option<Rc<Styled>>> {
        self.set_css_template(node, CssSlot::Inner, template)
    }

    /// Replace a node's outer style.
    pub fn set_outer_css(&self, node: NodeId, template: StyleTemplate) -> Result<Option<Rc<Styled>>> {
        self.set_css_template(node, CssSlot::Outer, template)
    }

    /// Invoke a handler by id or entry.
    pub async fn call(
        &self,
        target: impl Into<HandlerTarget>,
        params: Params,
        args: Vec<Value>,
    ) -> Result<Value> {
        handlers::call_ui_handler(self, target, params, args).await
    }

    /// Dispatch a host event to the handler a node binds for it.
    pub async fn dispatch_event(
        &self,
        node: NodeId,
        event_name: &str,
        event: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        handlers::dispatch_event(self, node, event_name, event, args).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{props, testing};

    #[test]
    fn create_applies_defaults_and_base_keys() -> Result<()> {
        let store = testing::store()?;
        let btn = store.create("Btn", props! { label: "Go", visible: false, testkey: "k" })?;
        assert_eq!(store.get(btn, "count")?, Value::Int(0));
        assert_eq!(store.get(btn, "label")?, Value::String("Go".into()));
        store.read(|tree| {
            let n = tree.node(btn)?;
            assert!(!n.is_visible());
            assert_eq!(n.testkey(), Some("k"));
            assert_eq!(n.testid(), Some("Btn"));
            assert!(n.node_id().starts_with('_'));
            Ok(())
        })?;
        assert!(matches!(
            store.create("Btn", props! { type: "Label" }),
            Err(Error::InvalidProps { .. })
        ));
        assert!(matches!(
            store.create("Btn", props! { count: "x" }),
            Err(Error::InvalidProps { .. })
        ));
        Ok(())
    }

    #[test]
    fn nested_snapshots_create_children() -> Result<()> {
        let store = testing::store()?;
        let panel = store.create(
            "Panel",
            props! {
                items: vec![
                    Value::Map(props! { type: "Label", text: "a" }),
                    Value::Map(props! { type: "Btn" }),
                ],
            },
        )?;
        let children = store.read(|tree| Ok(tree.children(panel)))?;
        assert_eq!(children.len(), 2);
        assert_eq!(store.read(|tree| Ok(tree.parent(children[0])))?, Some(panel));
        let snapshot = store.snapshot(panel)?;
        let items = snapshot.get("items").and_then(Value::as_array).map(<[Value]>::len);
        assert_eq!(items, Some(2));
        Ok(())
    }

    #[test]
    fn set_replaces_and_destroys_released_children() -> Result<()> {
        let store = testing::store()?;
        let a = store.create("Label", props! {})?;
        let panel = store.create("Panel", props! {})?;
        store.attach(panel, "content", a)?;
        assert_eq!(store.read(|tree| Ok(tree.parent(a)))?, Some(panel));
        let b = store.create("Label", props! {})?;
        store.attach(panel, "content", b)?;
        assert!(!store.read(|tree| Ok(tree.is_alive(a)))?);
        assert!(store.attach(panel, "items", a).is_err());
        Ok(())
    }

    #[test]
    fn nodes_can_not_contain_their_ancestors() -> Result<()> {
        let store = testing::store()?;
        let outer = store.create("Panel", props! {})?;
        let inner = store.create("Panel", props! {})?;
        store.attach(outer, "content", inner)?;
        let err = store.attach(inner, "content", outer).unwrap_err();
        assert!(matches!(err, Error::InvalidProps { .. }));
        assert!(store.attach(inner, "items", outer).is_err());
        assert_eq!(store.read(|tree| Ok(tree.parent(outer)))?, None);
        assert_eq!(store.read(|tree| Ok(tree.parent(inner)))?, Some(outer));
        store.destroy(outer)?;
        assert!(store.read(|tree| Ok(tree.is_empty()))?);
        Ok(())
    }

    #[test]
    fn display_ids_are_unique_across_stores() -> Result<()> {
        let first = testing::store()?;
        let second = testing::store()?;
        let a = first.create("Btn", props! {})?;
        let b = second.create("Btn", props! {})?;
        assert_ne!(first.display_id(a), second.display_id(b));
        Ok(())
    }

    #[test]
    fn destroy_unlinks() -> Result<()> {
        let store = testing::store()?;
        let panel = store.create("Panel", props! {})?;
        let label = store.create("Label", props! {})?;
        store.attach(panel, "items", label)?;
        store.destroy(label)?;
        assert_eq!(store.get(panel, "items")?, Value::Array(vec![]));
        store.set_root(panel)?;
        store.destroy(panel)?;
        assert_eq!(store.root(), None);
        assert!(store.read(|tree| Ok(tree.is_empty()))?);
        Ok(())
    }

    #[test]
    fn rollback_restores_and_removes() -> Result<()> {
        let store = testing::store()?;
        let btn = store.create("Btn", props! {})?;
        let capture = store.capture()?;
        store.set(btn, "count", Value::Int(3))?;
        let extra = store.create("Label", props! {})?;
        store.rollback(capture)?;
        assert_eq!(store.get(btn, "count")?, Value::Int(0));
        assert!(!store.read(|tree| Ok(tree.is_alive(extra)))?);
        assert!(store.read(|tree| Ok(tree.is_protected()))?);
        Ok(())
    }

    #[test]
    fn rollback_revives_destroyed_nodes() -> Result<()> {
        let store = testing::store()?;
        let label = store.create("Label", props! { text: "kept" })?;
        let panel = store.create("Panel", props! {})?;
        store.attach(panel, "items", label)?;
        store.set_root(panel)?;
        let before = store.snapshot(panel)?;

        let capture = store.capture()?;
        store.destroy(panel)?;
        assert_eq!(store.root(), None);
        assert!(!store.read(|tree| Ok(tree.is_alive(label)))?);
        store.rollback(capture)?;

        assert_eq!(store.root(), Some(panel));
        assert_eq!(store.snapshot(panel)?, before);
        assert_eq!(store.get(label, "text")?, Value::String("kept".into()));
        assert_eq!(store.read(|tree| Ok(tree.parent(label)))?, Some(panel));

        let capture = store.capture()?;
        store.destroy(label)?;
        store.commit(capture)?;
        assert!(!store.read(|tree| Ok(tree.is_alive(label)))?);
        assert_eq!(store.read(|tree| Ok(tree.len()))?, 1);
        Ok(())
    }

    #[test]
    fn views_and_actions() -> Result<()> {
        let store = testing::store()?;
        let btn = store.create("Btn", props! { count: 2 })?;
        assert_eq!(store.view(btn, "doubled")?, Value::Int(4));
        store.action(btn, "reset", &[])?;
        assert_eq!(store.get(btn, "count")?, Value::Int(0));
        assert!(matches!(
            store.view(btn, "missing"),
            Err(Error::UnknownMember { member: "view", .. })
        ));
        Ok(())
    }
}
