//! Registry of UI data types.
//!
//! A data type names a storage shape and the plugin that edits values of that
//! shape. Hosts use the registry to build typed editors and to offer a list
//! of known types.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use tracing::error;

use crate::core::{
    NodeId, Registry, Store,
    error::{Error, Result},
    plugin::{PluginRef, ResolvedType, TypeRef},
    value::{Props, Value},
};

/// Type used when a lookup names an unknown data type.
pub const FALLBACK_TYPE: &str = "singleLine";

/// A registered data type.
#[derive(Debug, Clone)]
pub struct DataTypeSpec {
    /// Type name.
    pub name: String,
    /// Storage type of values.
    pub storage_type: String,
    /// Only offered in persistent schemas.
    pub persistent_only: bool,
    /// Value used for new entries.
    pub default_value: Value,
    /// Icon name.
    pub icon: Option<String>,
    /// Plugin that edits values of this type.
    pub type_plugin: PluginRef,
    /// Plugin that edits the type's settings.
    pub settings_plugin: Option<PluginRef>,
    /// Rendered inside a tooltip.
    pub tooltip: bool,
    /// Focus the editor when it appears.
    pub focus: bool,
}

impl DataTypeSpec {
    /// A data type with empty defaults.
    pub fn new(
        name: impl Into<String>,
        storage_type: impl Into<String>,
        type_plugin: impl Into<PluginRef>,
    ) -> Self {
        Self {
            name: name.into(),
            storage_type: storage_type.into(),
            persistent_only: false,
            default_value: Value::Null,
            icon: None,
            type_plugin: type_plugin.into(),
            settings_plugin: None,
            tooltip: false,
            focus: false,
        }
    }

    /// Builder: default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    /// Builder: icon name.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Builder: settings plugin.
    pub fn with_settings_plugin(mut self, plugin: impl Into<PluginRef>) -> Self {
        self.settings_plugin = Some(plugin.into());
        self
    }

    /// Builder: only offer in persistent schemas.
    pub fn persistent_only(mut self) -> Self {
        self.persistent_only = true;
        self
    }

    /// Builder: render inside a tooltip.
    pub fn in_tooltip(mut self) -> Self {
        self.tooltip = true;
        self
    }

    /// Builder: focus the editor when it appears.
    pub fn with_focus(mut self) -> Self {
        self.focus = true;
        self
    }
}

/// Data types by name.
#[derive(Debug, Default)]
pub struct DataTypes {
    /// Registered types.
    types: RefCell<BTreeMap<String, Rc<DataTypeSpec>>>,
}

impl DataTypes {
    /// Register a type, replacing any previous type with the same name.
    pub fn register(&self, spec: DataTypeSpec) {
        self.types
            .borrow_mut()
            .insert(spec.name.clone(), Rc::new(spec));
    }

    /// Every registered type.
    pub fn list(&self) -> Vec<Rc<DataTypeSpec>> {
        self.types.borrow().values().cloned().collect()
    }

    /// A type by name, falling back to [`FALLBACK_TYPE`].
    pub fn get(&self, name: &str) -> Option<Rc<DataTypeSpec>> {
        let types = self.types.borrow();
        types.get(name).or_else(|| types.get(FALLBACK_TYPE)).cloned()
    }

    /// A type by exact name.
    fn exact(&self, name: &str) -> Result<Rc<DataTypeSpec>> {
        self.types
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDataType(name.to_string()))
    }

    /// Names of every registered type.
    pub fn type_names(&self) -> Vec<String> {
        self.types.borrow().keys().cloned().collect()
    }

    /// Create an editor node for a type.
    pub fn create(&self, store: &Store, name: &str, props: Props) -> Result<NodeId> {
        let create = || -> Result<NodeId> {
            let spec = self.exact(name)?;
            spec.type_plugin.resolve(store.registry())?.create(store, props)
        };
        create().inspect_err(|_| error!("Error creating '{name}' uiDataType component"))
    }

    /// Should the type render inside a tooltip?
    pub fn embed_in_tooltip(&self, name: &str) -> Result<bool> {
        Ok(self.exact(name)?.tooltip)
    }

    /// Settings plugin of a type.
    pub fn settings_plugin(&self, name: &str) -> Result<Option<PluginRef>> {
        Ok(self.exact(name)?.settings_plugin.clone())
    }

    /// Union of every type plugin, resolved on first use.
    pub fn model() -> TypeRef {
        TypeRef::lazy("<data types>", |registry: &Registry| {
            let plugins = registry
                .data_types()
                .list()
                .iter()
                .map(|spec| spec.type_plugin.resolve(registry))
                .collect::<Result<Vec<_>>>()?;
            if plugins.is_empty() {
                return Err(Error::NoRegisteredPlugins);
            }
            Ok(ResolvedType::Union(plugins))
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{props, testing};

    fn data_types(store: &Store) {
        let types = store.registry().data_types();
        types.register(DataTypeSpec::new("singleLine", "string", "Label").with_default(""));
        types.register(
            DataTypeSpec::new("counter", "number", "Btn")
                .with_default(0)
                .with_icon("plus")
                .in_tooltip(),
        );
    }

    #[test]
    fn lookup_falls_back() -> Result<()> {
        let store = testing::store()?;
        data_types(&store);
        let types = store.registry().data_types();
        assert_eq!(types.type_names(), vec!["counter", "singleLine"]);
        assert_eq!(types.get("counter").map(|t| t.storage_type.clone()), Some("number".into()));
        assert_eq!(types.get("missing").map(|t| t.name.clone()), Some("singleLine".into()));
        assert!(types.embed_in_tooltip("counter")?);
        assert!(!types.embed_in_tooltip("singleLine")?);
        assert!(types.settings_plugin("counter")?.is_none());
        assert!(matches!(
            types.embed_in_tooltip("missing"),
            Err(Error::UnknownDataType(_))
        ));
        Ok(())
    }

    #[test]
    fn create_through_type_plugin() -> Result<()> {
        let store = testing::store()?;
        data_types(&store);
        let types = store.registry().data_types();
        let node = types.create(&store, "counter", props! { count: 3 })?;
        assert_eq!(store.get(node, "count")?, Value::Int(3));
        assert!(types.create(&store, "missing", props! {}).is_err());

        let model = DataTypes::model().resolve(store.registry())?;
        assert_eq!(model.names(), vec!["Btn", "Label"]);
        Ok(())
    }
}
