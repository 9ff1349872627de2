//! Render strategies and element metadata.
//!
//! The core does not draw anything. Rendering a node produces an [`Element`]:
//! everything a host renderer needs to materialize the node, including its
//! styled objects and a body produced by the plugin's [`RenderStrategy`].

use std::{collections::BTreeMap, fmt, rc::Rc};

use tracing::trace;

use crate::core::{
    NodeId, Store,
    error::Result,
    handlers::{MOUNT_EVENT, event_bindings},
    style::{CssSlot, Styled, get_style, style_props},
    value::{Props, Value},
};

/// Produces the body of a rendered node.
pub trait RenderStrategy {
    /// Render a node's body.
    fn render(&self, store: &Store, node: NodeId) -> Result<Body>;
}

/// Body of a rendered element.
#[derive(Debug, Clone)]
pub enum Body {
    /// Nothing.
    Empty,
    /// Text content.
    Text(String),
    /// Child elements.
    Children(Vec<Element>),
    /// Plain data for the host to present.
    Data(Value),
}

/// Renders the node-valued fields listed in the node's `render` field, or
/// the node's snapshot if there is no such field.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRender;

impl RenderStrategy for DefaultRender {
    fn render(&self, store: &Store, node: NodeId) -> Result<Body> {
        let children = store.read(|tree| {
            let n = tree.node(node)?;
            let Some(Value::Array(names)) = n.get("render") else {
                return Ok(None);
            };
            let mut out = vec![];
            for name in names.iter().filter_map(Value::as_str) {
                match n.get(name) {
                    Some(Value::Node(id)) => out.push(*id),
                    Some(Value::Array(items)) => out.extend(items.iter().filter_map(Value::as_node)),
                    _ => {}
                }
            }
            Ok(Some(out))
        })?;
        match children {
            Some(children) => Ok(Body::Children(
                children
                    .into_iter()
                    .map(|c| meta_element(store, c))
                    .collect::<Result<_>>()?,
            )),
            None => Ok(Body::Data(store.snapshot(node)?)),
        }
    }
}

/// Text body from a string field.
pub struct TextRender {
    /// Field holding the text.
    field: String,
}

impl TextRender {
    /// Render the named field as text.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl fmt::Debug for TextRender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextRender({})", self.field)
    }
}

impl RenderStrategy for TextRender {
    fn render(&self, store: &Store, node: NodeId) -> Result<Body> {
        Ok(Body::Text(store.get(node, &self.field)?.to_css_string()))
    }
}

/// A rendered node.
#[derive(Debug, Clone)]
pub struct Element {
    /// Display id.
    pub node_id: String,
    /// Plugin name.
    pub plugin: String,
    /// Is the node visible?
    pub visible: bool,
    /// Tab index: `0` for focusable nodes, `-1` for nodes that refuse focus.
    pub tab_index: Option<i32>,
    /// `data-testid` and `data-testkey` attributes.
    pub test_attrs: BTreeMap<String, String>,
    /// Node values named by the inner template's declared props.
    pub props: Props,
    /// Event bindings, `event@alias`.
    pub events: BTreeMap<String, String>,
    /// Inner styled object.
    pub inner: Option<Rc<Styled>>,
    /// Outer styled object.
    pub outer: Option<Rc<Styled>>,
    /// Inner CSS rendered against the node.
    pub css: String,
    /// Body.
    pub body: Body,
}

/// Render a node through its plugin's strategy, or [`DefaultRender`].
pub fn meta_element(store: &Store, node: NodeId) -> Result<Element> {
    let (plugin_name, node_id, visible, tab_index, test_attrs, declared) = store.read(|tree| {
        let n = tree.node(node)?;
        Ok((
            n.plugin_type().to_string(),
            n.node_id().to_string(),
            n.is_visible(),
            n.focusable().map(|f| if f { 0 } else { -1 }),
            n.test_attrs(),
            n.css(CssSlot::Inner).props().to_vec(),
        ))
    })?;
    let snapshot = style_props(store, node)?;
    let props = declared
        .into_iter()
        .filter_map(|p| snapshot.get(&p).cloned().map(|v| (p, v)))
        .collect();
    let inner = get_style(store, node, CssSlot::Inner)?;
    let outer = get_style(store, node, CssSlot::Outer)?;
    let css = match &inner {
        Some(styled) => styled.render(&snapshot)?,
        None => String::new(),
    };
    let plugin = store.registry().get(&plugin_name)?;
    let body = if !visible {
        Body::Empty
    } else {
        match plugin.render_strategy() {
            Some(strategy) => strategy.render(store, node)?,
            None => DefaultRender.render(store, node)?,
        }
    };
    Ok(Element {
        node_id,
        plugin: plugin_name,
        visible,
        tab_index,
        test_attrs,
        props,
        events: event_bindings(store, node)?,
        inner,
        outer,
        css,
        body,
    })
}

/// Called by the host once a node's element is mounted: fires the mount
/// event and focuses auto-focus nodes. Returns true if focus was taken.
pub async fn mount(store: &Store, node: NodeId) -> Result<bool> {
    store
        .dispatch_event(node, MOUNT_EVENT, None, vec![])
        .await?;
    let target = store.read(|tree| {
        Ok(tree
            .get(node)
            .filter(|n| n.auto_focus() == Some(true))
            .map(|n| n.node_id().to_string()))
    })?;
    let Some(node_id) = target else {
        return Ok(false);
    };
    let host = store.host().clone();
    let focused = host.element(&node_id).is_some_and(|el| host.focus(&el));
    trace!("auto focus {node_id}: {focused}");
    Ok(focused)
}
