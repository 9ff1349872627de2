//! Plugin descriptors.
//!
//! A [`Plugin`] is an immutable value describing a node type: its fields,
//! views, actions, reactions, event handlers, dependencies, styling defaults
//! and render strategy. Builder methods consume the descriptor and return an
//! extended copy, so partially built plugins can be shared and composed.

use std::{
    cell::{Cell, OnceCell},
    collections::BTreeMap,
    fmt,
    rc::Rc,
    result::Result as StdResult,
};

use scopeguard::defer;
use tracing::error;

use crate::core::{
    NodeId, Registry, Store, Tree,
    error::{Error, Result},
    handlers::{HandlerRef, HandlerSource},
    node::BASE_KEYS,
    observer::ReactionSpec,
    render::RenderStrategy,
    style::{CssSlot, StyleTemplate},
    value::{Props, Value},
};

/// A computed view over a node.
pub type ViewFn = Rc<dyn Fn(&Tree, NodeId) -> anyhow::Result<Value>>;

/// A mutating action on a node.
pub type ActionFn = Rc<dyn Fn(&mut Tree, NodeId, &[Value]) -> anyhow::Result<Value>>;

/// Replacement for default node creation.
pub type ConstructorFn = Rc<dyn Fn(&Store, &Plugin, Props) -> Result<NodeId>>;

/// Builds the reactions a node registers.
pub type ReactionsFn = Rc<dyn Fn(&Tree, NodeId) -> Vec<ReactionSpec>>;

/// Creates a default instance for an absent node-typed field.
pub type FactoryFn = Rc<dyn Fn(&Store, &Rc<Plugin>) -> Result<NodeId>>;

/// Resolves a lazily computed type.
pub type ResolveFn = Rc<dyn Fn(&Registry) -> Result<ResolvedType>>;

/// Validate a plugin or handler name segment.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Reference to a plugin: by registered name, through a thunk, or directly.
#[derive(Clone)]
pub enum PluginRef {
    /// A registered plugin, by name.
    Name(String),
    /// A thunk producing the plugin, for forward and recursive references.
    Lazy(Rc<dyn Fn() -> Plugin>),
    /// A plugin value.
    Direct(Rc<Plugin>),
}

impl fmt::Debug for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginRef({})", self.label())
    }
}

impl PluginRef {
    /// A thunk reference.
    pub fn lazy(f: impl Fn() -> Plugin + 'static) -> Self {
        Self::Lazy(Rc::new(f))
    }

    /// Name for diagnostics.
    pub fn label(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Lazy(_) => "<lazy>".to_string(),
            Self::Direct(p) => p.name.clone(),
        }
    }

    /// Resolve to a descriptor, preferring the registered copy of a plugin.
    pub fn resolve(&self, registry: &Registry) -> Result<Rc<Plugin>> {
        match self {
            Self::Name(name) => registry.get(name),
            Self::Lazy(f) => {
                let plugin = f();
                Ok(registry
                    .find(&plugin.name)
                    .unwrap_or_else(|| Rc::new(plugin)))
            }
            Self::Direct(p) => Ok(registry.find(&p.name).unwrap_or_else(|| p.clone())),
        }
    }
}

impl From<&str> for PluginRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PluginRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Plugin> for PluginRef {
    fn from(plugin: Plugin) -> Self {
        Self::Direct(Rc::new(plugin))
    }
}

impl From<Rc<Plugin>> for PluginRef {
    fn from(plugin: Rc<Plugin>) -> Self {
        Self::Direct(plugin)
    }
}

impl From<&Rc<Plugin>> for PluginRef {
    fn from(plugin: &Rc<Plugin>) -> Self {
        Self::Direct(plugin.clone())
    }
}

/// A resolved node type.
#[derive(Clone)]
pub enum ResolvedType {
    /// A single plugin.
    Plugin(Rc<Plugin>),
    /// Any of several plugins, chosen by snapshot `type`.
    Union(Vec<Rc<Plugin>>),
}

impl fmt::Debug for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ResolvedType {
    /// Member plugin names.
    pub fn names(&self) -> Vec<String> {
        self.plugins().iter().map(|p| p.name.clone()).collect()
    }

    /// Member plugins.
    pub fn plugins(&self) -> Vec<Rc<Plugin>> {
        match self {
            Self::Plugin(p) => vec![p.clone()],
            Self::Union(ps) => ps.clone(),
        }
    }

    /// Pick the member for a snapshot's `type`. Without a type, only a
    /// single-member type is unambiguous.
    pub fn select(&self, type_name: Option<&str>) -> Option<Rc<Plugin>> {
        let plugins = self.plugins();
        match type_name {
            Some(name) => plugins.into_iter().find(|p| p.name == name),
            None if plugins.len() == 1 => plugins.into_iter().next(),
            None => None,
        }
    }

    /// Does the type admit this plugin?
    pub fn admits(&self, name: &str) -> bool {
        self.plugins().iter().any(|p| p.name == name)
    }
}

/// What a type reference points at.
enum TypeTarget {
    /// A plugin reference.
    Plugin(PluginRef),
    /// A computed type.
    Thunk(ResolveFn),
}

/// Shared state of a type reference.
struct TypeRefInner {
    /// Name for diagnostics.
    label: String,
    /// Target.
    target: TypeTarget,
    /// Default instance factory.
    factory: Option<FactoryFn>,
    /// Memoized resolution.
    resolved: OnceCell<ResolvedType>,
    /// Set while resolving, to detect cycles.
    resolving: Cell<bool>,
}

/// A lazily resolved, memoized reference to a node type, used for node-typed
/// fields.
#[derive(Clone)]
pub struct TypeRef {
    /// Shared state.
    inner: Rc<TypeRefInner>,
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.inner.label)
    }
}

impl TypeRef {
    /// Build a reference.
    fn build(label: String, target: TypeTarget, factory: Option<FactoryFn>) -> Self {
        Self {
            inner: Rc::new(TypeRefInner {
                label,
                target,
                factory,
                resolved: OnceCell::new(),
                resolving: Cell::new(false),
            }),
        }
    }

    /// Reference a plugin.
    pub fn plugin(r: impl Into<PluginRef>) -> Self {
        let r = r.into();
        Self::build(r.label(), TypeTarget::Plugin(r), None)
    }

    /// Reference a plugin, creating an instance with `factory` when the
    /// field is absent.
    pub fn plugin_with_factory(
        r: impl Into<PluginRef>,
        factory: impl Fn(&Store, &Rc<Plugin>) -> Result<NodeId> + 'static,
    ) -> Self {
        let r = r.into();
        Self::build(r.label(), TypeTarget::Plugin(r), Some(Rc::new(factory)))
    }

    /// Reference a plugin, creating a default instance when the field is
    /// absent.
    pub fn plugin_or_default(r: impl Into<PluginRef>) -> Self {
        Self::plugin_with_factory(r, |store, plugin| plugin.create(store, Props::new()))
    }

    /// A computed type.
    pub fn lazy(
        label: impl Into<String>,
        f: impl Fn(&Registry) -> Result<ResolvedType> + 'static,
    ) -> Self {
        Self::build(label.into(), TypeTarget::Thunk(Rc::new(f)), None)
    }

    /// Union of every plugin registered at first resolution.
    pub fn any_registered() -> Self {
        Self::lazy("<any registered>", Registry::plugin_type_any)
    }

    /// Name for diagnostics.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Default instance factory.
    pub fn factory(&self) -> Option<&FactoryFn> {
        self.inner.factory.as_ref()
    }

    /// Resolve and memoize. Failures are not memoized; a resolution that
    /// reaches itself fails with [`Error::TypeCycle`].
    pub fn resolve(&self, registry: &Registry) -> Result<ResolvedType> {
        if let Some(resolved) = self.inner.resolved.get() {
            return Ok(resolved.clone());
        }
        if self.inner.resolving.get() {
            return Err(Error::TypeCycle(self.inner.label.clone()));
        }
        self.inner.resolving.set(true);
        defer! {
            self.inner.resolving.set(false);
        }
        let resolved = match &self.inner.target {
            TypeTarget::Plugin(r) => ResolvedType::Plugin(r.resolve(registry)?),
            TypeTarget::Thunk(f) => f(registry)?,
        };
        Ok(self.inner.resolved.get_or_init(|| resolved).clone())
    }
}

/// Reference a plugin, optionally with a default instance factory.
pub fn type_plugin(r: impl Into<PluginRef>, factory: Option<FactoryFn>) -> TypeRef {
    let r = r.into();
    TypeRef::build(r.label(), TypeTarget::Plugin(r), factory)
}

/// Union of every registered plugin, resolved on first use.
pub fn dynamic_models_types() -> TypeRef {
    TypeRef::any_registered()
}

/// Shape of a declared field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Any value.
    Any,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Number; integers are accepted.
    Float,
    /// String.
    String,
    /// Map.
    Map,
    /// Array.
    Array,
    /// A child node.
    Node(TypeRef),
    /// An ordered list of child nodes.
    Nodes(TypeRef),
}

/// A declared field: shape, default and nullability.
#[derive(Debug, Clone)]
pub struct Field {
    /// Shape.
    kind: FieldKind,
    /// Value used when creation props omit the field.
    default: Value,
    /// Is null accepted?
    optional: bool,
}

impl Field {
    /// Build a field.
    fn new(kind: FieldKind, default: Value) -> Self {
        Self {
            kind,
            default,
            optional: false,
        }
    }

    /// Any value, null by default.
    pub fn any() -> Self {
        Self::new(FieldKind::Any, Value::Null).optional()
    }

    /// A boolean.
    pub fn bool(default: bool) -> Self {
        Self::new(FieldKind::Bool, Value::Bool(default))
    }

    /// An integer.
    pub fn int(default: i64) -> Self {
        Self::new(FieldKind::Int, Value::Int(default))
    }

    /// A number.
    pub fn float(default: f64) -> Self {
        Self::new(FieldKind::Float, Value::Float(default))
    }

    /// A string.
    pub fn string(default: impl Into<String>) -> Self {
        Self::new(FieldKind::String, Value::String(default.into()))
    }

    /// A map, empty by default.
    pub fn map() -> Self {
        Self::new(FieldKind::Map, Value::Map(BTreeMap::new()))
    }

    /// An array, empty by default.
    pub fn array() -> Self {
        Self::new(FieldKind::Array, Value::Array(vec![]))
    }

    /// A child node. Required unless the type has a factory or the field is
    /// made optional.
    pub fn node(t: TypeRef) -> Self {
        Self::new(FieldKind::Node(t), Value::Null)
    }

    /// A list of child nodes, empty by default.
    pub fn nodes(t: TypeRef) -> Self {
        Self::new(FieldKind::Nodes(t), Value::Array(vec![]))
    }

    /// Builder: accept null.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Builder: default value.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    /// Shape.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Default value.
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Is null accepted?
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Check a scalar value against the field's shape.
    pub(crate) fn check(&self, value: &Value) -> StdResult<(), String> {
        let ok = match (&self.kind, value) {
            (_, Value::Null) => self.optional,
            (FieldKind::Any, _) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Int, Value::Int(_)) => true,
            (FieldKind::Float, Value::Float(_) | Value::Int(_)) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Map, Value::Map(_)) => true,
            (FieldKind::Array, Value::Array(_)) => true,
            (FieldKind::Node(_), Value::Node(_) | Value::Map(_)) => true,
            (FieldKind::Nodes(_), Value::Array(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {:?}, got {}", self.kind_label(), value.kind_name()))
        }
    }

    /// Shape name for diagnostics.
    fn kind_label(&self) -> &'static str {
        match self.kind {
            FieldKind::Any => "Any",
            FieldKind::Bool => "Bool",
            FieldKind::Int => "Int",
            FieldKind::Float => "Float",
            FieldKind::String => "String",
            FieldKind::Map => "Map",
            FieldKind::Array => "Array",
            FieldKind::Node(_) => "Node",
            FieldKind::Nodes(_) => "Nodes",
        }
    }
}

/// When a node's reactions are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Right after creation.
    AfterCreate,
    /// When the node gains a parent.
    AfterAttach,
}

/// A reactions declaration.
#[derive(Clone)]
pub(crate) struct ReactionsDecl {
    /// Registration phase.
    pub(crate) phase: Phase,
    /// Builder.
    pub(crate) build: ReactionsFn,
}

/// A plugin-declared handler.
#[derive(Debug, Clone)]
pub struct PluginHandler {
    /// Body.
    pub(crate) source: HandlerSource,
    /// Skip the store's transaction wrapper.
    pub(crate) no_tx: bool,
}

impl PluginHandler {
    /// Body.
    pub fn source(&self) -> &HandlerSource {
        &self.source
    }

    /// Does the handler bypass the transaction wrapper?
    pub fn no_tx(&self) -> bool {
        self.no_tx
    }
}

/// A node type.
#[derive(Clone)]
pub struct Plugin {
    /// Registered name.
    pub(crate) name: String,
    /// Declared fields.
    fields: BTreeMap<String, Field>,
    /// Views by name.
    views: BTreeMap<String, ViewFn>,
    /// Actions by name.
    actions: BTreeMap<String, ActionFn>,
    /// Reaction declarations.
    pub(crate) reactions: Vec<ReactionsDecl>,
    /// Handlers by function name.
    handlers: BTreeMap<String, PluginHandler>,
    /// Plugins registered before this one.
    deps: Vec<PluginRef>,
    /// Creation override.
    constructor: Option<ConstructorFn>,
    /// Render strategy.
    render: Option<Rc<dyn RenderStrategy>>,
    /// Default inner style.
    inner_css: StyleTemplate,
    /// Default outer style.
    outer_css: StyleTemplate,
    /// Default event bindings.
    events: BTreeMap<String, HandlerRef>,
    /// Bindings merged into instances after creation.
    default_events: BTreeMap<String, HandlerRef>,
    /// Names of composed base plugins.
    composed: Vec<String>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Plugin {
    /// An empty plugin.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            views: BTreeMap::new(),
            actions: BTreeMap::new(),
            reactions: vec![],
            handlers: BTreeMap::new(),
            deps: vec![],
            constructor: None,
            render: None,
            inner_css: StyleTemplate::default(),
            outer_css: StyleTemplate::default(),
            events: BTreeMap::new(),
            default_events: BTreeMap::new(),
            composed: vec![],
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builder: merge another plugin's fields, views, actions, reactions,
    /// styles and event bindings. Declarations already present win.
    pub fn compose(mut self, base: &Self) -> Self {
        for (k, v) in &base.fields {
            self.fields.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &base.views {
            self.views.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &base.actions {
            self.actions.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &base.events {
            self.events.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &base.default_events {
            self.default_events
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        let mut reactions = base.reactions.clone();
        reactions.append(&mut self.reactions);
        self.reactions = reactions;
        if self.inner_css.is_empty() {
            self.inner_css = base.inner_css.clone();
        }
        if self.outer_css.is_empty() {
            self.outer_css = base.outer_css.clone();
        }
        self.composed.push(base.name.clone());
        self
    }

    /// Builder: declare a field.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Builder: declare a view.
    pub fn views(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Tree, NodeId) -> anyhow::Result<Value> + 'static,
    ) -> Self {
        self.views.insert(name.into(), Rc::new(f));
        self
    }

    /// Builder: declare the `links` view.
    pub fn links(self, f: impl Fn(&Tree, NodeId) -> anyhow::Result<Value> + 'static) -> Self {
        self.views("links", f)
    }

    /// Builder: declare an action.
    pub fn actions(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Tree, NodeId, &[Value]) -> anyhow::Result<Value> + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Rc::new(f));
        self
    }

    /// Builder: reactions registered right after creation.
    pub fn reactions(mut self, f: impl Fn(&Tree, NodeId) -> Vec<ReactionSpec> + 'static) -> Self {
        self.reactions.push(ReactionsDecl {
            phase: Phase::AfterCreate,
            build: Rc::new(f),
        });
        self
    }

    /// Builder: reactions registered when the node gains a parent.
    pub fn reactions_attached(
        mut self,
        f: impl Fn(&Tree, NodeId) -> Vec<ReactionSpec> + 'static,
    ) -> Self {
        self.reactions.push(ReactionsDecl {
            phase: Phase::AfterAttach,
            build: Rc::new(f),
        });
        self
    }

    /// Insert handler declarations.
    fn add_handlers<S, H>(mut self, handlers: impl IntoIterator<Item = (S, H)>, no_tx: bool) -> Self
    where
        S: Into<String>,
        H: Into<HandlerSource>,
    {
        for (name, source) in handlers {
            self.handlers.insert(
                name.into(),
                PluginHandler {
                    source: source.into(),
                    no_tx,
                },
            );
        }
        self
    }

    /// Builder: declare handlers, registered as `plugin.name`.
    pub fn events<S, H>(self, handlers: impl IntoIterator<Item = (S, H)>) -> Self
    where
        S: Into<String>,
        H: Into<HandlerSource>,
    {
        self.add_handlers(handlers, false)
    }

    /// Builder: declare handlers that bypass the transaction wrapper.
    pub fn events_no_tx<S, H>(self, handlers: impl IntoIterator<Item = (S, H)>) -> Self
    where
        S: Into<String>,
        H: Into<HandlerSource>,
    {
        self.add_handlers(handlers, true)
    }

    /// Builder: plugins registered before this one.
    pub fn register(mut self, deps: impl IntoIterator<Item = impl Into<PluginRef>>) -> Self {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder: replace default creation.
    pub fn constructor(
        mut self,
        f: impl Fn(&Store, &Self, Props) -> Result<NodeId> + 'static,
    ) -> Self {
        self.constructor = Some(Rc::new(f));
        self
    }

    /// Builder: render strategy.
    pub fn extend(mut self, strategy: impl RenderStrategy + 'static) -> Self {
        self.render = Some(Rc::new(strategy));
        self
    }

    /// Builder: default inner style.
    pub fn inner_css(mut self, template: StyleTemplate) -> Self {
        self.inner_css = template;
        self
    }

    /// Builder: default outer style.
    pub fn outer_css(mut self, template: StyleTemplate) -> Self {
        self.outer_css = template;
        self
    }

    /// Builder: default binding for an event.
    pub fn bind_event(mut self, event: impl Into<String>, handler: impl Into<HandlerRef>) -> Self {
        self.events.insert(event.into(), handler.into());
        self
    }

    /// Builder: binding merged into instances after creation, unless the
    /// instance already binds the event.
    pub fn default_event(
        mut self,
        event: impl Into<String>,
        handler: impl Into<HandlerRef>,
    ) -> Self {
        self.default_events.insert(event.into(), handler.into());
        self
    }

    /// Declared fields.
    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    /// A view.
    pub fn view(&self, name: &str) -> Option<&ViewFn> {
        self.views.get(name)
    }

    /// View names.
    pub fn view_names(&self) -> Vec<&str> {
        self.views.keys().map(String::as_str).collect()
    }

    /// An action.
    pub fn action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    /// Action names.
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    /// Declared handlers.
    pub fn handlers(&self) -> &BTreeMap<String, PluginHandler> {
        &self.handlers
    }

    /// Dependencies.
    pub fn deps(&self) -> &[PluginRef] {
        &self.deps
    }

    /// Render strategy.
    pub fn render_strategy(&self) -> Option<&Rc<dyn RenderStrategy>> {
        self.render.as_ref()
    }

    /// Default style for a slot.
    pub fn css(&self, slot: CssSlot) -> &StyleTemplate {
        match slot {
            CssSlot::Inner => &self.inner_css,
            CssSlot::Outer => &self.outer_css,
        }
    }

    /// Default event bindings.
    pub fn event_bindings(&self) -> &BTreeMap<String, HandlerRef> {
        &self.events
    }

    /// Bindings merged into instances after creation.
    pub fn default_events(&self) -> &BTreeMap<String, HandlerRef> {
        &self.default_events
    }

    /// Names of composed base plugins.
    pub fn composed(&self) -> &[String] {
        &self.composed
    }

    /// Check the name and field declarations.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        for field in self.fields.keys() {
            if BASE_KEYS.contains(&field.as_str()) {
                return Err(Error::ReservedField {
                    plugin: self.name.clone(),
                    field: field.clone(),
                });
            }
        }
        for handler in self.handlers.keys() {
            validate_name(handler)?;
        }
        Ok(())
    }

    /// Create an instance, through the constructor override if declared.
    pub fn create(&self, store: &Store, props: Props) -> Result<NodeId> {
        let shown = Value::Map(props.clone()).to_json();
        let result = match &self.constructor {
            Some(constructor) => constructor(store, self, props),
            None => store.create_model(self, props),
        };
        result.inspect_err(|e| {
            error!(
                "Error creating a '{}' plugin instance using {shown}: {e}",
                self.name
            );
        })
    }

    /// The node itself if it instantiates this plugin, otherwise the
    /// nearest ancestor that does.
    pub fn self_node(&self, tree: &Tree, node: NodeId) -> Option<NodeId> {
        tree.ancestor_of_type(node, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::settings::Settings;

    #[test]
    fn builder_is_immutable() {
        let base = Plugin::new("Base").field("a", Field::int(1));
        let derived = base.clone().field("b", Field::string("x"));
        assert_eq!(base.fields().len(), 1);
        assert_eq!(derived.fields().len(), 2);
    }

    #[test]
    fn compose_keeps_own_declarations() {
        let base = Plugin::new("Base")
            .field("a", Field::int(1))
            .field("b", Field::int(2))
            .views("v", |_, _| Ok(Value::Int(1)));
        let p = Plugin::new("P").field("b", Field::string("own")).compose(&base);
        assert!(matches!(p.fields()["b"].kind(), FieldKind::String));
        assert!(p.fields().contains_key("a"));
        assert!(p.view("v").is_some());
        assert_eq!(p.composed(), ["Base".to_string()]);
    }

    #[test]
    fn validation() {
        assert!(Plugin::new("Btn").validate().is_ok());
        assert!(matches!(
            Plugin::new("a.b").validate(),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            Plugin::new("Btn").field("visible", Field::bool(true)).validate(),
            Err(Error::ReservedField { .. })
        ));
    }

    #[test]
    fn field_checks() {
        assert!(Field::int(0).check(&Value::Int(3)).is_ok());
        assert!(Field::int(0).check(&Value::Null).is_err());
        assert!(Field::int(0).optional().check(&Value::Null).is_ok());
        assert!(Field::float(0.0).check(&Value::Int(3)).is_ok());
        assert!(Field::string("").check(&Value::Bool(true)).is_err());
    }

    #[test]
    fn type_ref_detects_cycles() {
        let registry = Rc::new(Registry::new(Settings::default()));
        let slot: Rc<OnceCell<TypeRef>> = Rc::new(OnceCell::new());
        let inner = slot.clone();
        let t = TypeRef::lazy("Loop", move |registry| match inner.get() {
            Some(t) => t.resolve(registry),
            None => Err(Error::Internal("unset".into())),
        });
        assert!(slot.set(t.clone()).is_ok());
        let err = t.resolve(&registry).unwrap_err();
        assert!(matches!(err, Error::TypeCycle(label) if label == "Loop"));
    }

    #[test]
    fn type_ref_memoizes() -> Result<()> {
        let registry = Registry::new(Settings::default());
        assert!(matches!(
            dynamic_models_types().resolve(&registry),
            Err(Error::NoRegisteredPlugins)
        ));
        registry.register(Plugin::new("A"))?;
        let t = dynamic_models_types();
        assert_eq!(t.resolve(&registry)?.names(), vec!["A"]);
        registry.register(Plugin::new("B"))?;
        assert_eq!(t.resolve(&registry)?.names(), vec!["A"]);
        assert_eq!(dynamic_models_types().resolve(&registry)?.names(), vec!["A", "B"]);
        Ok(())
    }
}
