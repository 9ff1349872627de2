use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    result::Result as StdResult,
};

use rhai::Dynamic;
use scoped_tls::scoped_thread_local;

use crate::core::{
    NodeId, Store,
    error::{self, Result},
    handlers::Handler,
    settings::Settings,
    value::Value,
};

/// Script identifier.
pub type ScriptId = u64;

/// Name bound to the compiled closure inside the call wrapper.
const FN_BINDING: &str = "trellis_fn";

/// Name of the scope variable carrying the call argument.
const ARG_BINDING: &str = "trellis_arg";

/// Upper bound on operations a single script call may perform.
const MAX_OPERATIONS: u64 = 500_000;

/// Upper bound on script call depth.
const MAX_CALL_LEVELS: usize = 64;

/// Compiled script with source text.
#[derive(Debug)]
struct Script {
    /// Compiled AST.
    ast: rhai::AST,
    /// Original source text.
    source: String,
}

/// Script execution context shared via thread-local.
struct ScriptGlobal {
    /// Store the script runs against.
    store: Store,
    /// Node the script is bound to, if any.
    node: Option<NodeId>,
}

scoped_thread_local!(static SCRIPT_GLOBAL: ScriptGlobal);

/// Result type for script execution helpers.
type ScriptResult<T> = StdResult<T, Box<rhai::EvalAltResult>>;

/// Format a Rhai position for error messages.
fn format_position(pos: rhai::Position) -> String {
    let line = pos.line();
    let offset = pos.position();
    match (line, offset) {
        (Some(line), Some(offset)) => format!(" (line {line}, offset {offset})"),
        (Some(line), None) => format!(" (line {line})"),
        (None, Some(offset)) => format!(" (offset {offset})"),
        (None, None) => String::new(),
    }
}

/// Convert a Rhai parse error into a trellis parse error.
fn format_parse_error(err: &rhai::ParseError) -> error::ParseError {
    let pos = err.position();
    error::ParseError::with_position(err.err_type().to_string(), pos.line(), pos.position())
}

/// Run `f` against the store and node bound to the current script call.
fn with_bound_node<R>(f: impl FnOnce(&Store, NodeId) -> Result<R>) -> ScriptResult<R> {
    if !SCRIPT_GLOBAL.is_set() {
        return Err("no node is bound to this script".into());
    }
    SCRIPT_GLOBAL.with(|global| {
        let Some(node) = global.node else {
            return Err("no node is bound to this script".into());
        };
        f(&global.store, node).map_err(|e| e.to_string().into())
    })
}

/// Convert a value into a Rhai dynamic.
pub(crate) fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(v) => Dynamic::from_bool(*v),
        Value::Int(v) => Dynamic::from_int(*v),
        Value::Float(v) => Dynamic::from_float(*v),
        Value::String(v) => Dynamic::from(v.clone()),
        Value::Array(values) => Dynamic::from_array(values.iter().map(to_dynamic).collect()),
        Value::Map(values) => {
            let mut map = rhai::Map::new();
            for (key, value) in values {
                map.insert(key.as_str().into(), to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
        Value::Node(_) => Dynamic::from(value.to_css_string()),
    }
}

/// Convert a Rhai dynamic into a value.
pub(crate) fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if value.is_bool() {
        value.as_bool().map_or(Value::Null, Value::Bool)
    } else if value.is_int() {
        value.as_int().map_or(Value::Null, Value::Int)
    } else if value.is_float() {
        value.as_float().map_or(Value::Null, Value::Float)
    } else if value.is_char() {
        value
            .as_char()
            .map_or(Value::Null, |c| Value::String(c.to_string()))
    } else if value.is_string() {
        value.into_string().map_or(Value::Null, Value::String)
    } else if value.is_array() {
        value.into_array().map_or(Value::Null, |values| {
            Value::Array(values.into_iter().map(from_dynamic).collect())
        })
    } else if value.is_map() {
        value.try_cast::<rhai::Map>().map_or(Value::Null, |map| {
            Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), from_dynamic(v)))
                    .collect(),
            )
        })
    } else {
        Value::String(value.to_string())
    }
}

#[derive(Debug)]
/// Script host that owns the Rhai engine and compiled scripts.
///
/// Style functions and script handlers are closure sources such as
/// `|props| props.color`. They are compiled once per distinct source and
/// called with a single argument. Only handler calls bind a node, which
/// unlocks the `get`, `set` and `payload` host functions.
pub struct ScriptHost {
    /// Rhai engine instance.
    engine: rhai::Engine,
    /// Compiled scripts by ID.
    scripts: RefCell<HashMap<ScriptId, Rc<Script>>>,
    /// Script IDs by closure source.
    by_source: RefCell<HashMap<String, ScriptId>>,
    /// Last issued script ID.
    current_id: Cell<u64>,
    /// Whether failing style functions degrade to null.
    dev_mode: bool,
}

impl ScriptHost {
    /// Construct a new script host.
    pub fn new(settings: &Settings) -> Self {
        let mut engine = rhai::Engine::new();
        engine.on_debug(move |s, src, pos| {
            let src = src.unwrap_or("");
            tracing::debug!("{} [{}:{}]", s, src, pos)
        });
        engine.on_print(move |s| tracing::info!("{}", s));
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);

        engine.register_fn("get", |field: &str| -> ScriptResult<Dynamic> {
            with_bound_node(|store, node| store.get(node, field)).map(|v| to_dynamic(&v))
        });
        engine.register_fn("set", |field: &str, value: Dynamic| -> ScriptResult<()> {
            let value = from_dynamic(value);
            with_bound_node(|store, node| store.set(node, field, value))
        });
        engine.register_fn("payload", |key: &str| -> ScriptResult<Dynamic> {
            with_bound_node(|store, node| {
                store.read(|tree| Ok(tree.node(node)?.payload().get(key).cloned()))
            })
            .map(|v| v.as_ref().map_or(Dynamic::UNIT, to_dynamic))
        });

        Self {
            engine,
            scripts: RefCell::new(HashMap::new()),
            by_source: RefCell::new(HashMap::new()),
            current_id: Cell::new(0),
            dev_mode: settings.dev_mode,
        }
    }

    /// Are failing style functions degraded to null?
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Number of distinct compiled scripts.
    pub fn len(&self) -> usize {
        self.scripts.borrow().len()
    }

    /// Has nothing been compiled yet?
    pub fn is_empty(&self) -> bool {
        self.scripts.borrow().is_empty()
    }

    /// Compile a closure source such as `|props| props.color`. Identical
    /// sources share one compiled script.
    pub fn compile_function(&self, source: &str) -> Result<ScriptId> {
        if let Some(id) = self.by_source.borrow().get(source) {
            return Ok(*id);
        }
        let wrapped = format!("let {FN_BINDING} = {source};\n{FN_BINDING}.call({ARG_BINDING})");
        let ast = self
            .engine
            .compile(&wrapped)
            .map_err(|err| error::Error::Parse(format_parse_error(&err)))?;
        let id = self.current_id.get() + 1;
        self.current_id.set(id);
        self.scripts.borrow_mut().insert(
            id,
            Rc::new(Script {
                ast,
                source: source.into(),
            }),
        );
        self.by_source.borrow_mut().insert(source.into(), id);
        Ok(id)
    }

    /// Source text of a compiled script.
    pub fn source(&self, sid: ScriptId) -> Option<String> {
        self.scripts.borrow().get(&sid).map(|s| s.source.clone())
    }

    /// Call a compiled closure with one argument and no bound node.
    pub fn call(&self, sid: ScriptId, arg: &Value) -> Result<Value> {
        let script = self.script(sid)?;
        self.eval(sid, &script, arg)
    }

    /// Call a compiled closure with the host functions bound to `node`.
    pub fn call_bound(
        &self,
        sid: ScriptId,
        arg: &Value,
        store: &Store,
        node: Option<NodeId>,
    ) -> Result<Value> {
        let script = self.script(sid)?;
        let global = ScriptGlobal {
            store: store.clone(),
            node,
        };
        SCRIPT_GLOBAL.set(&global, || self.eval(sid, &script, arg))
    }

    /// Compile a handler body. The closure receives a map holding the event
    /// name, event payload, positional arguments and extra parameters, and
    /// runs with the handler's target node bound.
    pub fn handler(self: &Rc<Self>, source: &str) -> Result<Handler> {
        let sid = self.compile_function(source)?;
        let host = Rc::clone(self);
        Ok(Handler::sync(move |ctx, args| {
            let arg = ctx.script_arg(args);
            let node = ctx.self_node().or(ctx.data());
            host.call_bound(sid, &arg, ctx.store(), node)
                .map_err(anyhow::Error::new)
        }))
    }

    /// Fetch a compiled script without holding the table borrow.
    fn script(&self, sid: ScriptId) -> Result<Rc<Script>> {
        self.scripts
            .borrow()
            .get(&sid)
            .cloned()
            .ok_or_else(|| error::Error::Script(format!("script {sid} not found")))
    }

    /// Evaluate a compiled closure.
    fn eval(&self, sid: ScriptId, script: &Script, arg: &Value) -> Result<Value> {
        let mut scope = rhai::Scope::new();
        scope.push_dynamic(ARG_BINDING, to_dynamic(arg));
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &script.ast)
            .map(from_dynamic)
            .map_err(|e| {
                let location = format_position(e.position());
                error::Error::Script(format!("script {sid} failed{location}: {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::props;

    #[test]
    fn tcompile_error_reports_details() {
        let host = ScriptHost::new(&Settings::default());
        let err = host.compile_function("|p| let =").unwrap_err();
        assert!(matches!(err, error::Error::Parse(_)));
    }

    #[test]
    fn tcompile_is_memoized() -> Result<()> {
        let host = ScriptHost::new(&Settings::default());
        let a = host.compile_function("|p| p.x")?;
        let b = host.compile_function("|p| p.x")?;
        let c = host.compile_function("|p| p.y")?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(host.len(), 2);
        assert_eq!(host.source(a).as_deref(), Some("|p| p.x"));
        Ok(())
    }

    #[test]
    fn tcall_converts_values() -> Result<()> {
        let host = ScriptHost::new(&Settings::default());
        let sid = host.compile_function("|p| p.size * 2")?;
        let out = host.call(sid, &Value::Map(props! { size: 21 }))?;
        assert_eq!(out, Value::Int(42));

        let sid = host.compile_function(r#"|p| #{ color: p.color, tags: [1, "a"] }"#)?;
        let out = host.call(sid, &Value::Map(props! { color: "red" }))?;
        assert_eq!(out.get("color"), Some(&Value::String("red".into())));
        assert_eq!(
            out.get("tags"),
            Some(&Value::Array(vec![Value::Int(1), Value::String("a".into())]))
        );
        Ok(())
    }

    #[test]
    fn tunbound_host_functions_fail() -> Result<()> {
        let host = ScriptHost::new(&Settings::default());
        let sid = host.compile_function(r#"|p| get("count")"#)?;
        let err = host.call(sid, &Value::Null).unwrap_err();
        assert!(matches!(err, error::Error::Script(_)));
        assert!(err.to_string().contains("no node is bound"));
        Ok(())
    }

    #[test]
    fn truntaway_scripts_are_stopped() -> Result<()> {
        let host = ScriptHost::new(&Settings::default());
        let sid = host.compile_function("|p| { loop { } }")?;
        assert!(matches!(host.call(sid, &Value::Null), Err(error::Error::Script(_))));
        Ok(())
    }
}
