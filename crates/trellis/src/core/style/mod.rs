/// Serializable style templates.
mod template;

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

pub use template::{
    Interpolation, Source, StyleTemplate, Token, TokenKind, css_inject, css_wrapper,
    parse_wrapper,
};
use tracing::error;

use crate::core::{
    NodeId, Store, Tree,
    error::{Error, Result},
    script::{ScriptHost, ScriptId},
    value::Value,
};

/// Which of a node's two style templates an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CssSlot {
    /// Styles for the node's own element.
    Inner,
    /// Styles for the wrapper element around the node.
    Outer,
}

impl CssSlot {
    /// Field name of this slot in node snapshots.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Inner => "inner_css",
            Self::Outer => "outer_css",
        }
    }
}

/// Diagnostic context for decoded style functions.
#[derive(Debug)]
pub(crate) struct StyleContext {
    /// Escaped source of the template the function came from.
    pub(crate) code: String,
    /// Tree path of the owning template.
    pub(crate) path: String,
}

/// A compiled style function.
#[derive(Clone)]
pub struct StyleFn {
    /// Compiled script.
    sid: ScriptId,
    /// Closure source text.
    source: Rc<str>,
    /// Where the function came from.
    context: Rc<StyleContext>,
    /// Host that compiled the function.
    scripts: Rc<ScriptHost>,
}

impl fmt::Debug for StyleFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleFn")
            .field("source", &self.source)
            .finish()
    }
}

impl StyleFn {
    /// Compile a function source.
    pub(crate) fn compile(
        scripts: &Rc<ScriptHost>,
        source: &str,
        context: Rc<StyleContext>,
    ) -> Result<Self> {
        Ok(Self {
            sid: scripts.compile_function(source)?,
            source: source.into(),
            context,
            scripts: scripts.clone(),
        })
    }

    /// Closure source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the function against props. Failures are logged with the
    /// template source and tree path; in development mode they then degrade
    /// to null.
    pub fn call(&self, props: &Value) -> Result<Value> {
        match self.scripts.call(self.sid, props) {
            Ok(v) => Ok(v),
            Err(e) => {
                error!(
                    "Error in styled component: {}\n at func: {}\n at node: {}\n{e}",
                    self.context.code, self.source, self.context.path
                );
                if self.scripts.dev_mode() {
                    Ok(Value::Null)
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// A decoded template token.
#[derive(Debug, Clone)]
pub enum TemplateValue {
    /// Decoded JSON data.
    Data(Value),
    /// Compiled function.
    Function(StyleFn),
    /// Literal text.
    Text(String),
}

impl TemplateValue {
    /// Evaluate to CSS text.
    fn eval(&self, props: &Value) -> Result<String> {
        Ok(match self {
            Self::Data(v) => v.to_css_string(),
            Self::Text(s) => s.clone(),
            Self::Function(f) => f.call(props)?.to_css_string(),
        })
    }
}

/// Render decoded parts to CSS text. Wrapper parts interleave the leading
/// fragment array with the remaining parts; inject parts are concatenated.
pub fn render_parts(parts: &[TemplateValue], source: Source, props: &Value) -> Result<String> {
    let mut out = String::new();
    match (source, parts.split_first()) {
        (_, None) => {}
        (Source::Wrapper, Some((TemplateValue::Data(Value::Array(fragments)), funcs))) => {
            for (idx, fragment) in fragments.iter().enumerate() {
                out.push_str(&fragment.to_css_string());
                if let Some(part) = funcs.get(idx) {
                    out.push_str(&part.eval(props)?);
                }
            }
        }
        (Source::Wrapper, Some(_)) => {
            return Err(Error::Internal(
                "wrapper template does not start with a fragment array".into(),
            ));
        }
        (Source::Inject, Some(_)) => {
            for part in parts {
                out.push_str(&part.eval(props)?);
            }
        }
    }
    Ok(out)
}

/// Everything a materializer needs to build a styled object.
#[derive(Debug, Clone)]
pub struct StyleRequest {
    /// Cache key: plugin type followed by the template key.
    pub key: String,
    /// Component the style applies to; `None` for a plain wrapper element.
    pub component: Option<String>,
    /// Token assembly mode.
    pub source: Source,
    /// Decoded template parts.
    pub parts: Rc<[TemplateValue]>,
    /// Decoded attrs function.
    pub attrs: Option<StyleFn>,
}

/// Turns decoded templates into styled objects.
pub trait StyleMaterializer {
    /// Build a styled object for a request.
    fn materialize(&self, request: StyleRequest) -> Result<Styled>;
}

/// Default materializer producing CSS-text styled objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct CssMaterializer;

impl StyleMaterializer for CssMaterializer {
    fn materialize(&self, request: StyleRequest) -> Result<Styled> {
        Ok(Styled::new(request))
    }
}

/// A materialized style, shared between every node whose template produced
/// the same cache key.
#[derive(Debug)]
pub struct Styled {
    /// Cache key.
    key: String,
    /// Component the style applies to.
    component: Option<String>,
    /// Token assembly mode.
    source: Source,
    /// Decoded parts.
    parts: Rc<[TemplateValue]>,
    /// Attrs function merged into props before rendering.
    attrs: Option<StyleFn>,
}

impl Styled {
    /// Build from a request.
    pub fn new(request: StyleRequest) -> Self {
        Self {
            key: request.key,
            component: request.component,
            source: request.source,
            parts: request.parts,
            attrs: request.attrs,
        }
    }

    /// Cache key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Component the style applies to.
    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    /// Token assembly mode.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Render CSS text for a props map, after merging in the attrs
    /// function's result.
    pub fn render(&self, props: &Value) -> Result<String> {
        let mut props = props.clone();
        if let Some(attrs) = &self.attrs {
            match attrs.call(&props)? {
                Value::Map(extra) => {
                    if let Value::Map(p) = &mut props {
                        p.extend(extra);
                    }
                }
                Value::Null => {}
                other => {
                    return Err(Error::BadAttrs(format!(
                        "attrs returned {}",
                        other.kind_name()
                    )));
                }
            }
        }
        render_parts(&self.parts, self.source, &props)
    }
}

/// Styled objects keyed by plugin type and template key.
#[derive(Debug, Default)]
pub struct StyleCache {
    /// Cached entries.
    entries: RefCell<HashMap<String, Rc<Styled>>>,
}

impl StyleCache {
    /// Look up a cached entry.
    pub fn get(&self, key: &str) -> Option<Rc<Styled>> {
        self.entries.borrow().get(key).cloned()
    }

    /// Return the cached entry for `key`, building it on a miss.
    pub(crate) fn get_or_build(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<Styled>,
    ) -> Result<Rc<Styled>> {
        if let Some(styled) = self.get(key) {
            return Ok(styled);
        }
        let styled = Rc::new(build()?);
        Ok(self
            .entries
            .borrow_mut()
            .entry(key.to_string())
            .or_insert(styled)
            .clone())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Is the cache empty?
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drop every cached entry. Nodes keep their pinned objects.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// Tree path of a node's template, for diagnostics.
fn slot_path(tree: &Tree, node: NodeId, slot: CssSlot) -> String {
    format!("{}/{}", tree.path(node), slot.field_name())
}

/// Decoded template parts of a node's style, or `None` if the node is gone
/// or the template is empty.
pub fn template(store: &Store, node: NodeId, slot: CssSlot) -> Result<Option<Rc<[TemplateValue]>>> {
    let scripts = store.registry().scripts().clone();
    store.read(|tree| {
        if !tree.is_alive(node) {
            return Ok(None);
        }
        let path = slot_path(tree, node, slot);
        tree.node(node)?.css(slot).decode(&scripts, &path)
    })
}

/// Decoded attrs function of a node's style.
pub fn attrs(store: &Store, node: NodeId, slot: CssSlot) -> Result<Option<StyleFn>> {
    let scripts = store.registry().scripts().clone();
    store.read(|tree| {
        let path = slot_path(tree, node, slot);
        tree.node(node)?.css(slot).decode_attrs(&scripts, &path)
    })
}

/// Props passed to style functions: the node's snapshot plus its display id.
pub fn style_props(store: &Store, node: NodeId) -> Result<Value> {
    store.read(|tree| {
        let mut snapshot = tree.snapshot(node)?;
        if let Value::Map(map) = &mut snapshot {
            map.insert(
                "node_id".into(),
                Value::String(tree.node(node)?.node_id().to_string()),
            );
        }
        Ok(snapshot)
    })
}

/// Evaluate a node's template against the node itself, without attrs.
pub fn get_static(store: &Store, node: NodeId, slot: CssSlot) -> Result<String> {
    let Some(parts) = template(store, node, slot)? else {
        return Ok(String::new());
    };
    let source = store.read(|tree| Ok(tree.node(node)?.css(slot).source()))?;
    let props = style_props(store, node)?;
    render_parts(&parts, source, &props)
}

/// Replace a node's template with a single inject literal.
pub fn set_css(store: &Store, node: NodeId, slot: CssSlot, text: &str) -> Result<()> {
    store.update(|tree| {
        tree.node_mut(node)?.css_mut(slot).set_css(text);
        Ok(())
    })
}

/// Replace a node's template, drop its pin and rebuild its styled object.
pub fn set_template(
    store: &Store,
    node: NodeId,
    slot: CssSlot,
    template: StyleTemplate,
) -> Result<Option<Rc<Styled>>> {
    store.update(|tree| {
        *tree.node_mut(node)?.css_mut(slot) = template;
        Ok(())
    })?;
    get_style(store, node, slot)
}

/// What a style lookup found under the tree borrow.
enum Lookup {
    /// The template is already pinned.
    Pinned(Rc<Styled>),
    /// Nothing to style.
    Empty,
    /// A styled object must be fetched from the cache or built.
    Build(StyleRequest),
}

/// The node's styled object: its pin if present, otherwise the shared cache
/// entry for its plugin type and template key, which is then pinned.
pub fn get_style(store: &Store, node: NodeId, slot: CssSlot) -> Result<Option<Rc<Styled>>> {
    let registry = store.registry().clone();
    let scripts = registry.scripts().clone();
    let lookup = store.read(|tree| {
        if !tree.is_alive(node) {
            return Ok(Lookup::Empty);
        }
        let n = tree.node(node)?;
        let css = n.css(slot);
        if let Some(styled) = css.styled() {
            return Ok(Lookup::Pinned(styled));
        }
        let path = slot_path(tree, node, slot);
        let Some(parts) = css.decode(&scripts, &path)? else {
            return Ok(Lookup::Empty);
        };
        Ok(Lookup::Build(StyleRequest {
            key: format!("{}{}", n.plugin_type(), css.template_key()),
            component: match slot {
                CssSlot::Inner => Some(n.plugin_type().to_string()),
                CssSlot::Outer => None,
            },
            source: css.source(),
            parts,
            attrs: css.decode_attrs(&scripts, &path)?,
        }))
    })?;
    let request = match lookup {
        Lookup::Pinned(styled) => return Ok(Some(styled)),
        Lookup::Empty => return Ok(None),
        Lookup::Build(request) => request,
    };
    let key = request.key.clone();
    let styled = registry
        .styles()
        .get_or_build(&key, || registry.materializer().materialize(request))?;
    store.update(|tree| {
        let css = tree.node_mut(node)?.css_mut(slot);
        if css.key().is_none() {
            css.set_styled(Some(styled.clone()));
        }
        Ok(())
    })?;
    Ok(Some(styled))
}
