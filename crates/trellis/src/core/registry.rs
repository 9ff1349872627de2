//! The plugin registry.
//!
//! A [`Registry`] owns everything process-wide about a plugin set: the
//! plugins themselves, the handler side table, the script host that compiles
//! style functions and script handlers, the styled-object cache and the data
//! type registry. Stores are built on a shared registry.

use std::{cell::RefCell, collections::BTreeMap, fmt, io::Write, rc::Rc};

use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::{debug, warn};

use crate::core::{
    datatypes::DataTypes,
    error::{Error, Result},
    handlers::{Handler, HandlerEntry, HandlerRef, HandlerSource, HandlerTable, wrap_plugin_handler},
    plugin::{Plugin, PluginRef, ResolvedType, validate_name},
    script::ScriptHost,
    settings::Settings,
    style::{CssMaterializer, StyleCache, StyleMaterializer},
    value::Value,
};

/// Registered plugins, handlers and shared caches.
pub struct Registry {
    /// Runtime settings.
    settings: Settings,
    /// Plugins by name.
    plugins: RefCell<BTreeMap<String, Rc<Plugin>>>,
    /// Handler side table.
    handlers: HandlerTable,
    /// Script host.
    scripts: Rc<ScriptHost>,
    /// Styled objects by cache key.
    styles: StyleCache,
    /// Builds styled objects.
    materializer: Box<dyn StyleMaterializer>,
    /// UI data types.
    data_types: DataTypes,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.names())
            .field("handlers", &self.handlers.ids().len())
            .field("styles", &self.styles.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Registry {
    /// An empty registry.
    pub fn new(settings: Settings) -> Self {
        Self {
            scripts: Rc::new(ScriptHost::new(&settings)),
            settings,
            plugins: RefCell::new(BTreeMap::new()),
            handlers: HandlerTable::default(),
            styles: StyleCache::default(),
            materializer: Box::new(CssMaterializer),
            data_types: DataTypes::default(),
        }
    }

    /// Builder: replace the style materializer.
    pub fn with_materializer(mut self, materializer: impl StyleMaterializer + 'static) -> Self {
        self.materializer = Box::new(materializer);
        self
    }

    /// Runtime settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Script host.
    pub fn scripts(&self) -> &Rc<ScriptHost> {
        &self.scripts
    }

    /// Styled-object cache.
    pub fn styles(&self) -> &StyleCache {
        &self.styles
    }

    /// Style materializer.
    pub fn materializer(&self) -> &dyn StyleMaterializer {
        self.materializer.as_ref()
    }

    /// UI data types.
    pub fn data_types(&self) -> &DataTypes {
        &self.data_types
    }

    /// Register a plugin. Dependencies are registered first, depth first.
    /// Registering an already registered descriptor again is a no-op, as is a
    /// thunk reference to a registered name; a new descriptor under an
    /// existing name replaces the old one. Handlers are installed under
    /// `plugin.function`, replacing previous entries.
    pub fn register(&self, plugin: impl Into<PluginRef>) -> Result<Rc<Plugin>> {
        let mut stack = vec![];
        self.register_with(plugin.into(), &mut stack)
    }

    /// Register with the chain of plugins currently being registered.
    fn register_with(&self, r: PluginRef, stack: &mut Vec<String>) -> Result<Rc<Plugin>> {
        let (plugin, lazy) = match r {
            PluginRef::Name(name) => return self.get(&name),
            PluginRef::Lazy(f) => (Rc::new(f()), true),
            PluginRef::Direct(p) => (p, false),
        };
        let name = plugin.name().to_string();
        if stack.contains(&name) {
            let mut cycle = stack.clone();
            cycle.push(name);
            return Err(Error::DependencyCycle(cycle));
        }
        if let Some(existing) = self.find(&name) {
            if lazy || Rc::ptr_eq(&existing, &plugin) {
                return Ok(existing);
            }
        }
        plugin.validate()?;

        stack.push(name.clone());
        let deps = plugin
            .deps()
            .iter()
            .try_for_each(|dep| self.register_with(dep.clone(), stack).map(|_| ()));
        stack.pop();
        deps?;

        let mut compiled = Vec::with_capacity(plugin.handlers().len());
        for (function, declared) in plugin.handlers() {
            let callback = match declared.source() {
                HandlerSource::Native(handler) => handler.clone(),
                HandlerSource::Script(source) => self.scripts.handler(source)?,
            };
            compiled.push((function, callback, declared.no_tx()));
        }
        for (function, callback, no_tx) in compiled {
            self.handlers.add(
                &format!("{name}.{function}"),
                wrap_plugin_handler(&name, function, callback, no_tx),
            );
        }
        let replaced = self
            .plugins
            .borrow_mut()
            .insert(name.clone(), plugin.clone())
            .is_some();
        debug!(
            "plugin {} {name}",
            if replaced { "replaced" } else { "registered" }
        );
        Ok(plugin)
    }

    /// A registered plugin.
    pub fn get(&self, name: &str) -> Result<Rc<Plugin>> {
        self.find(name)
            .ok_or_else(|| Error::UnknownPlugin(name.to_string()))
    }

    /// A registered plugin, if present.
    pub fn find(&self, name: &str) -> Option<Rc<Plugin>> {
        self.plugins.borrow().get(name).cloned()
    }

    /// Every registered plugin, by name.
    pub fn list(&self) -> Vec<Rc<Plugin>> {
        self.plugins.borrow().values().cloned().collect()
    }

    /// Registered plugins keyed by name.
    pub fn dict(&self) -> BTreeMap<String, Rc<Plugin>> {
        self.plugins.borrow().clone()
    }

    /// Registered plugin names.
    pub fn names(&self) -> Vec<String> {
        self.plugins.borrow().keys().cloned().collect()
    }

    /// Union of every registered plugin.
    pub fn plugin_type_any(&self) -> Result<ResolvedType> {
        let plugins = self.list();
        if plugins.is_empty() {
            return Err(Error::NoRegisteredPlugins);
        }
        Ok(ResolvedType::Union(plugins))
    }

    /// Register a handler under an id. An existing handler with the same id
    /// is replaced.
    pub fn add_handler(&self, id: &str, handler: Handler) {
        self.handlers.add(id, handler);
    }

    /// Register handlers under `plugin.function`, unwrapped.
    pub fn set_ui_handlers<S>(
        &self,
        plugin: &str,
        handlers: impl IntoIterator<Item = (S, Handler)>,
    ) -> Result<()>
    where
        S: AsRef<str>,
    {
        validate_name(plugin)?;
        let handlers = handlers
            .into_iter()
            .map(|(function, handler)| {
                validate_name(function.as_ref())?;
                Ok((format!("{plugin}.{}", function.as_ref()), handler))
            })
            .collect::<Result<Vec<_>>>()?;
        for (id, handler) in handlers {
            self.handlers.add(&id, handler);
        }
        Ok(())
    }

    /// Register handlers from a dynamic map of function name to script
    /// source. Every entry is checked before anything is registered.
    pub fn set_ui_handlers_from_value(&self, plugin: &str, handlers: &Value) -> Result<()> {
        let Value::Map(map) = handlers else {
            return Err(Error::TypeMismatch {
                expected: "Map",
                got: handlers.kind_name(),
            });
        };
        let mut compiled = Vec::with_capacity(map.len());
        for (function, value) in map {
            let Value::String(source) = value else {
                return Err(Error::NotCallable {
                    id: format!("{plugin}.{function}"),
                    kind: value.kind_name().to_string(),
                });
            };
            compiled.push((function.as_str(), self.scripts.handler(source)?));
        }
        self.set_ui_handlers(plugin, compiled)
    }

    /// A registered handler entry. Fails listing every registered id.
    pub fn event_handler_node(&self, id: &str) -> Result<HandlerEntry> {
        self.handlers.get(id).ok_or_else(|| Error::UnknownHandler {
            id: id.to_string(),
            available: self.handlers.ids(),
        })
    }

    /// A registered handler.
    pub fn get_event_handler_func(&self, id: &str) -> Result<Handler> {
        Ok(self.event_handler_node(id)?.handler().clone())
    }

    /// Resolve a stored handler reference. A missing handler is logged and
    /// yields `None`.
    pub fn resolve_handler(&self, r: &HandlerRef) -> Option<HandlerEntry> {
        let entry = self.handlers.get(r.id());
        if entry.is_none() {
            warn!("Can't resolve handler reference '{r}'");
        }
        entry
    }

    /// Every registered handler id.
    pub fn handler_ids(&self) -> Vec<String> {
        self.handlers.ids()
    }

    /// Function names registered under a plugin.
    pub fn plugin_handlers_names(&self, plugin: &str) -> Vec<String> {
        self.handlers.plugin_names(plugin)
    }

    /// Output a formatted table of registered plugins.
    pub fn print_plugin_table(&self, w: &mut dyn Write) -> Result<()> {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.load_preset(UTF8_FULL);
        for plugin in self.list() {
            table.add_row(vec![
                Cell::new(plugin.name()).fg(Color::Green),
                Cell::new(plugin.fields().keys().cloned().collect::<Vec<_>>().join(", ")),
                Cell::new(self.plugin_handlers_names(plugin.name()).join(", ")),
            ]);
        }
        writeln!(w, "{table}").map_err(|x| Error::Internal(x.to_string()))
    }

    /// Output a formatted table of registered handler ids.
    pub fn print_handler_table(&self, w: &mut dyn Write) -> Result<()> {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.load_preset(UTF8_FULL);
        for id in self.handler_ids() {
            let owner = HandlerRef::new(id.as_str())
                .plugin()
                .unwrap_or_default()
                .to_string();
            table.add_row(vec![Cell::new(id).fg(Color::Green), Cell::new(owner)]);
        }
        writeln!(w, "{table}").map_err(|x| Error::Internal(x.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::plugin::Field;

    fn registry() -> Registry {
        Registry::new(Settings::default())
    }

    #[test]
    fn register_get() -> Result<()> {
        let r = registry();
        let btn = r.register(Plugin::new("Btn").field("count", Field::int(0)))?;
        assert!(Rc::ptr_eq(&btn, &r.get("Btn")?));
        assert!(matches!(r.get("Nope"), Err(Error::UnknownPlugin(_))));
        assert_eq!(r.names(), vec!["Btn"]);
        Ok(())
    }

    #[test]
    fn dependencies_register_once() -> Result<()> {
        let r = registry();
        let dep = Rc::new(Plugin::new("Dep"));
        r.register(Plugin::new("A").register([dep.clone()]))?;
        r.register(Plugin::new("B").register([dep.clone()]))?;
        assert_eq!(r.names(), vec!["A", "B", "Dep"]);
        assert!(Rc::ptr_eq(&r.get("Dep")?, &dep));
        Ok(())
    }

    #[test]
    fn dependency_cycle() {
        fn a() -> Plugin {
            Plugin::new("A").register([PluginRef::lazy(b)])
        }
        fn b() -> Plugin {
            Plugin::new("B").register([PluginRef::lazy(a)])
        }
        let err = registry().register(PluginRef::lazy(a)).unwrap_err();
        assert!(matches!(err, Error::DependencyCycle(chain) if chain == ["A", "B", "A"]));
    }

    #[test]
    fn handler_lookup_lists_ids() {
        let r = registry();
        r.add_handler("X.one", Handler::sync(|_, _| Ok(Value::Null)));
        r.add_handler("X.two", Handler::sync(|_, _| Ok(Value::Null)));
        let err = r.event_handler_node("X.three").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can't locate handler: 'X.three', those are available: X.one,X.two"
        );
        assert!(r.resolve_handler(&HandlerRef::new("X.three")).is_none());
        assert_eq!(r.plugin_handlers_names("X"), vec!["one", "two"]);
    }

    #[test]
    fn handlers_from_value_must_be_callable() {
        let r = registry();
        let mut map = BTreeMap::new();
        map.insert("ok".to_string(), Value::String("|ctx| 1".into()));
        map.insert("bad".to_string(), Value::Int(3));
        let err = r
            .set_ui_handlers_from_value("Btn", &Value::Map(map))
            .unwrap_err();
        assert_eq!(err.to_string(), "'Int' specified for Btn.bad. Expected 'function'");
        assert!(r.handler_ids().is_empty());
    }

    #[test]
    fn plugin_type_any_requires_plugins() -> Result<()> {
        let r = registry();
        assert!(matches!(r.plugin_type_any(), Err(Error::NoRegisteredPlugins)));
        r.register(Plugin::new("A"))?;
        assert_eq!(r.plugin_type_any()?.names(), vec!["A"]);
        Ok(())
    }

    #[test]
    fn tables() -> Result<()> {
        let r = registry();
        r.register(Plugin::new("Btn").events([("onClick", Handler::sync(|_, _| Ok(Value::Null)))]))?;
        let mut out = vec![];
        r.print_plugin_table(&mut out)?;
        r.print_handler_table(&mut out)?;
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Btn.onClick"));
        Ok(())
    }
}
