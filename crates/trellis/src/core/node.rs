//! Per-node base state, declared field values and their snapshots.

use std::{collections::BTreeMap, mem};

use crate::core::{
    NodeId,
    error::{Error, Result},
    handlers::HandlerRef,
    observer::Observer,
    style::{CssSlot, StyleTemplate},
    value::{FromValue, Props, ToValue, Value},
};

/// Names of base node state. Plugins may not declare fields with these names.
pub const BASE_KEYS: &[&str] = &[
    "type",
    "node_id",
    "visible",
    "focusable",
    "auto_focus",
    "payload",
    "payload1",
    "testid",
    "testkey",
    "events",
    "default_events",
    "disable_events",
    "inner_css",
    "outer_css",
];

/// Which events a node refuses to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DisableEvents {
    /// Every event is dispatched.
    #[default]
    None,
    /// No event is dispatched.
    All,
    /// The named events are not dispatched.
    Only(Vec<String>),
}

impl DisableEvents {
    /// Are all events disabled?
    pub fn blocks_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Is this event disabled?
    pub fn blocks(&self, event: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Only(names) => names.iter().any(|n| n == event),
        }
    }
}

impl From<bool> for DisableEvents {
    fn from(all: bool) -> Self {
        if all { Self::All } else { Self::None }
    }
}

impl From<Vec<String>> for DisableEvents {
    fn from(names: Vec<String>) -> Self {
        Self::Only(names)
    }
}

impl From<&[&str]> for DisableEvents {
    fn from(names: &[&str]) -> Self {
        Self::Only(names.iter().map(|s| s.to_string()).collect())
    }
}

impl ToValue for &DisableEvents {
    fn to_value(self) -> Value {
        match self {
            DisableEvents::None => Value::Bool(false),
            DisableEvents::All => Value::Bool(true),
            DisableEvents::Only(names) => names.clone().to_value(),
        }
    }
}

impl FromValue for DisableEvents {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Null => Ok(Self::None),
            Value::Bool(all) => Ok((*all).into()),
            _ => Vec::<String>::from_value(v).map(Self::Only),
        }
    }
}

/// Target of a payload update.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKey {
    /// Set a single entry.
    Key(String),
    /// Replace the whole payload.
    Map(BTreeMap<String, Value>),
}

impl From<&str> for PayloadKey {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PayloadKey {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<BTreeMap<String, Value>> for PayloadKey {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

/// Payload entries hold strings or booleans.
fn check_payload_value(value: &Value) -> Result<()> {
    match value {
        Value::String(_) | Value::Bool(_) => Ok(()),
        other => Err(Error::TypeMismatch {
            expected: "String or Bool",
            got: other.kind_name(),
        }),
    }
}

/// Decode an event binding map.
fn handler_map(value: &Value) -> Result<BTreeMap<String, HandlerRef>> {
    Ok(BTreeMap::<String, String>::from_value(value)?
        .into_iter()
        .map(|(k, v)| (k, HandlerRef::new(v)))
        .collect())
}

/// Encode an event binding map.
fn handler_map_value(map: &BTreeMap<String, HandlerRef>) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.id().to_string())))
            .collect(),
    )
}

/// A plugin instance in the tree: base node state plus the plugin's own
/// fields.
#[derive(Debug)]
pub struct Node {
    /// Name of the plugin this node instantiates.
    pub(crate) plugin: String,
    /// Display id, unique per tree.
    pub(crate) node_id: String,
    /// Parent node, if attached.
    pub(crate) parent: Option<NodeId>,
    /// Visibility flag.
    pub(crate) visible: bool,
    /// Focusability; `None` when never set.
    pub(crate) focusable: Option<bool>,
    /// Whether the host element should take focus on mount.
    pub(crate) auto_focus: Option<bool>,
    /// Free-form string/boolean payload.
    pub(crate) payload: BTreeMap<String, Value>,
    /// Single free-form payload string.
    pub(crate) payload1: Option<String>,
    /// Test identifier.
    pub(crate) testid: Option<String>,
    /// Test key.
    pub(crate) testkey: Option<String>,
    /// Event bindings by event name.
    pub(crate) events: BTreeMap<String, HandlerRef>,
    /// Defaults merged into `events` once after creation.
    pub(crate) default_events: Option<BTreeMap<String, HandlerRef>>,
    /// Disabled events.
    pub(crate) disable_events: DisableEvents,
    /// Style of the node's own element.
    pub(crate) inner_css: StyleTemplate,
    /// Style of the wrapper element.
    pub(crate) outer_css: StyleTemplate,
    /// Plugin-declared fields.
    pub(crate) fields: BTreeMap<String, Value>,
    /// Reactions owned by this node.
    pub(crate) observer: Observer,
}

/// Restorable copy of a node's persisted state.
#[derive(Debug, Clone)]
pub(crate) struct NodeState {
    /// Parent node.
    parent: Option<NodeId>,
    /// Visibility flag.
    visible: bool,
    /// Focusability.
    focusable: Option<bool>,
    /// Auto focus flag.
    auto_focus: Option<bool>,
    /// Payload.
    payload: BTreeMap<String, Value>,
    /// Single payload string.
    payload1: Option<String>,
    /// Test identifier.
    testid: Option<String>,
    /// Test key.
    testkey: Option<String>,
    /// Event bindings.
    events: BTreeMap<String, HandlerRef>,
    /// Pending default bindings.
    default_events: Option<BTreeMap<String, HandlerRef>>,
    /// Disabled events.
    disable_events: DisableEvents,
    /// Inner style.
    inner_css: StyleTemplate,
    /// Outer style.
    outer_css: StyleTemplate,
    /// Plugin fields.
    fields: BTreeMap<String, Value>,
}

impl Node {
    /// A node with default base state. The display id is assigned on insert.
    pub(crate) fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            node_id: String::new(),
            parent: None,
            visible: true,
            focusable: None,
            auto_focus: None,
            payload: BTreeMap::new(),
            payload1: None,
            testid: Some(plugin.to_string()),
            testkey: None,
            events: BTreeMap::new(),
            default_events: None,
            disable_events: DisableEvents::None,
            inner_css: StyleTemplate::default(),
            outer_css: StyleTemplate::default(),
            fields: BTreeMap::new(),
            observer: Observer::default(),
        }
    }

    /// Plugin name.
    pub fn plugin_type(&self) -> &str {
        &self.plugin
    }

    /// Display id, `_<serial>`.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Parent node.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Is the node visible?
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Set visibility.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Focusability.
    pub fn focusable(&self) -> Option<bool> {
        self.focusable
    }

    /// Set focusability; `None` means focusable.
    pub fn set_focusable(&mut self, focusable: Option<bool>) {
        self.focusable = Some(focusable.unwrap_or(true));
    }

    /// Auto focus flag.
    pub fn auto_focus(&self) -> Option<bool> {
        self.auto_focus
    }

    /// Set the auto focus flag. Auto-focused nodes are focusable.
    pub fn set_auto_focus(&mut self, auto_focus: bool) {
        self.auto_focus = Some(auto_focus);
        if auto_focus {
            self.focusable = Some(true);
        }
    }

    /// Payload entries.
    pub fn payload(&self) -> &BTreeMap<String, Value> {
        &self.payload
    }

    /// Set one payload entry, remove it with `None`, or replace the whole
    /// payload with a map. Entries must be strings or booleans.
    pub fn set_payload(&mut self, key: impl Into<PayloadKey>, value: Option<Value>) -> Result<()> {
        match key.into() {
            PayloadKey::Map(map) => {
                map.values().try_for_each(check_payload_value)?;
                self.payload = map;
            }
            PayloadKey::Key(key) => match value {
                Some(value) => {
                    check_payload_value(&value)?;
                    self.payload.insert(key, value);
                }
                None => {
                    self.payload.remove(&key);
                }
            },
        }
        Ok(())
    }

    /// Single payload string.
    pub fn payload1(&self) -> Option<&str> {
        self.payload1.as_deref()
    }

    /// Set the single payload string.
    pub fn set_payload1(&mut self, payload: Option<String>) {
        self.payload1 = payload;
    }

    /// Test identifier.
    pub fn testid(&self) -> Option<&str> {
        self.testid.as_deref()
    }

    /// Set the test identifier.
    pub fn set_testid(&mut self, testid: Option<String>) {
        self.testid = testid;
    }

    /// Test key.
    pub fn testkey(&self) -> Option<&str> {
        self.testkey.as_deref()
    }

    /// Set the test key.
    pub fn set_testkey(&mut self, testkey: Option<String>) {
        self.testkey = testkey;
    }

    /// Test attributes for the rendered element.
    pub fn test_attrs(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        if let Some(id) = &self.testid {
            attrs.insert("data-testid".to_string(), id.clone());
        }
        if let Some(key) = &self.testkey {
            attrs.insert("data-testkey".to_string(), key.clone());
        }
        attrs
    }

    /// Event bindings.
    pub fn events(&self) -> &BTreeMap<String, HandlerRef> {
        &self.events
    }

    /// Number of event bindings.
    pub fn events_count(&self) -> usize {
        self.events.len()
    }

    /// Pending default bindings.
    pub fn default_events(&self) -> Option<&BTreeMap<String, HandlerRef>> {
        self.default_events.as_ref()
    }

    /// Bind an event.
    pub fn set_event(&mut self, event: impl Into<String>, handler: impl Into<HandlerRef>) {
        self.events.insert(event.into(), handler.into());
    }

    /// Remove an event binding.
    pub fn unset_event(&mut self, event: &str) {
        self.events.remove(event);
    }

    /// Bind several events; existing bindings are kept unless `overwrite`.
    pub fn set_events(
        &mut self,
        events: impl IntoIterator<Item = (String, HandlerRef)>,
        overwrite: bool,
    ) {
        for (event, handler) in events {
            if overwrite || !self.events.contains_key(&event) {
                self.events.insert(event, handler);
            }
        }
    }

    /// Set the pending default bindings.
    pub fn set_default_event_map(&mut self, events: Option<BTreeMap<String, HandlerRef>>) {
        self.default_events = events;
    }

    /// Merge pending default bindings into `events` without overriding, then
    /// clear them.
    pub fn merge_default_events(&mut self) {
        if let Some(defaults) = self.default_events.take() {
            self.set_events(defaults, false);
        }
    }

    /// Disabled events.
    pub fn disable_events(&self) -> &DisableEvents {
        &self.disable_events
    }

    /// Set disabled events.
    pub fn set_disable_events(&mut self, disable: impl Into<DisableEvents>) {
        self.disable_events = disable.into();
    }

    /// Style template for a slot.
    pub fn css(&self, slot: CssSlot) -> &StyleTemplate {
        match slot {
            CssSlot::Inner => &self.inner_css,
            CssSlot::Outer => &self.outer_css,
        }
    }

    /// Mutable style template for a slot.
    pub fn css_mut(&mut self, slot: CssSlot) -> &mut StyleTemplate {
        match slot {
            CssSlot::Inner => &mut self.inner_css,
            CssSlot::Outer => &mut self.outer_css,
        }
    }

    /// Plugin-declared fields.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// A plugin-declared field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overwrite a declared field. Node references are assigned through
    /// [`crate::Tree::set`], which maintains parent links.
    pub(crate) fn set(&mut self, field: &str, value: Value) -> Result<Value> {
        let Some(slot) = self.fields.get_mut(field) else {
            return Err(Error::UnknownField {
                plugin: self.plugin.clone(),
                field: field.to_string(),
            });
        };
        Ok(mem::replace(slot, value))
    }

    /// Children referenced from this node's fields, in field order.
    pub fn child_ids(&self) -> Vec<NodeId> {
        let mut out = vec![];
        for value in self.fields.values() {
            collect_nodes(value, &mut out);
        }
        out
    }

    /// Apply one base key from creation props.
    pub(crate) fn apply_base(&mut self, key: &str, value: &Value) -> Result<()> {
        match key {
            "visible" => self.visible = value.decode::<Option<bool>>()?.unwrap_or(true),
            "focusable" => self.focusable = value.decode()?,
            "auto_focus" => match value.decode::<Option<bool>>()? {
                Some(auto_focus) => self.set_auto_focus(auto_focus),
                None => self.auto_focus = None,
            },
            "payload" => {
                let map = value.decode::<Option<Props>>()?.unwrap_or_default();
                self.set_payload(map, None)?;
            }
            "payload1" => self.payload1 = value.decode()?,
            "testid" => self.testid = value.decode()?,
            "testkey" => self.testkey = value.decode()?,
            "events" => self.events = handler_map(value)?,
            "default_events" => {
                self.default_events = match value {
                    Value::Null => None,
                    v => Some(handler_map(v)?),
                }
            }
            "disable_events" => self.disable_events = value.decode()?,
            "inner_css" => self.inner_css = StyleTemplate::from_value(value)?,
            "outer_css" => self.outer_css = StyleTemplate::from_value(value)?,
            _ => {}
        }
        Ok(())
    }

    /// Base node state in snapshot form.
    pub(crate) fn base_snapshot(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("type".into(), Value::String(self.plugin.clone()));
        map.insert("visible".into(), Value::Bool(self.visible));
        map.insert("focusable".into(), self.focusable.to_value());
        map.insert("auto_focus".into(), self.auto_focus.to_value());
        map.insert("payload".into(), Value::Map(self.payload.clone()));
        map.insert("payload1".into(), self.payload1.clone().to_value());
        map.insert("testid".into(), self.testid.clone().to_value());
        map.insert("testkey".into(), self.testkey.clone().to_value());
        map.insert("events".into(), handler_map_value(&self.events));
        map.insert(
            "default_events".into(),
            self.default_events
                .as_ref()
                .map_or(Value::Null, handler_map_value),
        );
        map.insert("disable_events".into(), self.disable_events.to_value());
        map.insert("inner_css".into(), self.inner_css.to_value());
        map.insert("outer_css".into(), self.outer_css.to_value());
        map
    }

    /// Copy persisted state.
    pub(crate) fn capture(&self) -> NodeState {
        NodeState {
            parent: self.parent,
            visible: self.visible,
            focusable: self.focusable,
            auto_focus: self.auto_focus,
            payload: self.payload.clone(),
            payload1: self.payload1.clone(),
            testid: self.testid.clone(),
            testkey: self.testkey.clone(),
            events: self.events.clone(),
            default_events: self.default_events.clone(),
            disable_events: self.disable_events.clone(),
            inner_css: self.inner_css.clone(),
            outer_css: self.outer_css.clone(),
            fields: self.fields.clone(),
        }
    }

    /// Restore persisted state. Style pins are dropped.
    pub(crate) fn restore(&mut self, state: NodeState) {
        self.parent = state.parent;
        self.visible = state.visible;
        self.focusable = state.focusable;
        self.auto_focus = state.auto_focus;
        self.payload = state.payload;
        self.payload1 = state.payload1;
        self.testid = state.testid;
        self.testkey = state.testkey;
        self.events = state.events;
        self.default_events = state.default_events;
        self.disable_events = state.disable_events;
        self.inner_css = state.inner_css;
        self.outer_css = state.outer_css;
        self.inner_css.reset_key();
        self.outer_css.reset_key();
        self.fields = state.fields;
    }
}

/// Collect node references nested anywhere in a value.
pub(crate) fn collect_nodes(value: &Value, out: &mut Vec<NodeId>) {
    match value {
        Value::Node(id) => out.push(*id),
        Value::Array(values) => values.iter().for_each(|v| collect_nodes(v, out)),
        Value::Map(values) => values.values().for_each(|v| collect_nodes(v, out)),
        _ => {}
    }
}
