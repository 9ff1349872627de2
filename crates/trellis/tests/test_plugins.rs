//! Integration tests for plugin registration, composition and creation.

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;
    use trellis::{
        Field, Plugin, PluginRef, Registry, Settings, Store, TypeRef, Value,
        error::{Error, Result},
        observer::ReactionSpec,
        plugin::{dynamic_models_types, type_plugin},
        props,
    };

    thread_local! {
        static EFFECTS: RefCell<Vec<String>> = const { RefCell::new(vec![]) };
    }

    fn effects() -> Vec<String> {
        EFFECTS.with(|s| s.borrow().clone())
    }

    fn reset_effects() {
        EFFECTS.with(|s| s.borrow_mut().clear());
    }

    fn note(entry: String) {
        EFFECTS.with(|s| s.borrow_mut().push(entry));
    }

    fn counter() -> Plugin {
        Plugin::new("Counter")
            .field("count", Field::int(0))
            .field("seen", Field::int(0))
            .reactions(|_, _| {
                vec![ReactionSpec::new(
                    |tree, node| Ok(tree.node(node)?.get("count").cloned().unwrap_or_default()),
                    |store, node, value| {
                        note(format!("count={}", value.to_css_string()));
                        store.set(node, "seen", value)?;
                        Ok(())
                    },
                )]
            })
            .reactions_attached(|_, _| {
                vec![
                    ReactionSpec::new(
                        |tree, node| Ok(Value::Bool(tree.parent(node).is_some())),
                        |_, _, value| {
                            note(format!("attached={}", value.to_css_string()));
                            Ok(())
                        },
                    )
                    .named("attached")
                    .fire_immediately(),
                ]
            })
    }

    fn folder() -> Plugin {
        Plugin::new("Folder")
            .field("name", Field::string(""))
            .field("children", Field::nodes(TypeRef::plugin(PluginRef::lazy(folder))))
    }

    fn holder() -> Plugin {
        Plugin::new("Holder")
            .field("slot", Field::node(dynamic_models_types()).optional())
            .field("counters", Field::nodes(type_plugin("Counter", None)))
    }

    fn registry() -> Result<Rc<Registry>> {
        reset_effects();
        let registry = Registry::new(Settings::default());
        registry.register(holder().register([PluginRef::from(counter()), folder().into()]))?;
        Ok(Rc::new(registry))
    }

    #[test]
    fn register_and_get() -> Result<()> {
        let registry = registry()?;
        assert_eq!(registry.names(), vec!["Counter", "Folder", "Holder"]);
        let dict = registry.dict();
        assert!(Rc::ptr_eq(&dict["Folder"], &registry.get("Folder")?));
        assert_eq!(registry.list().len(), 3);
        assert!(matches!(registry.get("Missing"), Err(Error::UnknownPlugin(_))));
        Ok(())
    }

    #[test]
    fn names_are_validated() {
        let registry = Registry::default();
        assert!(matches!(registry.register(Plugin::new("")), Err(Error::InvalidName(_))));
        assert!(matches!(
            registry.register(Plugin::new("Bad").field("payload", Field::map())),
            Err(Error::ReservedField { .. })
        ));
        assert!(matches!(
            registry.register(Plugin::new("Needs").register(["Absent"])),
            Err(Error::UnknownPlugin(_))
        ));
    }

    #[test]
    fn empty_registry_has_no_union() {
        let registry = Registry::default();
        assert!(matches!(
            dynamic_models_types().resolve(&registry),
            Err(Error::NoRegisteredPlugins)
        ));
    }

    #[test]
    fn reactions_follow_changes() -> Result<()> {
        let store = Store::new(registry()?);
        let node = store.create("Counter", props! {})?;
        assert!(effects().is_empty());
        store.set(node, "count", Value::Int(2))?;
        assert_eq!(effects(), vec!["count=2"]);
        assert_eq!(store.get(node, "seen")?, Value::Int(2));
        store.set(node, "count", Value::Int(2))?;
        assert_eq!(effects().len(), 1);
        Ok(())
    }

    #[test]
    fn attach_runs_after_attach_reactions() -> Result<()> {
        let store = Store::new(registry()?);
        let holder = store.create("Holder", props! {})?;
        let counter = store.create("Counter", props! {})?;
        assert!(effects().is_empty());
        store.attach(holder, "counters", counter)?;
        assert_eq!(effects(), vec!["attached=true"]);

        reset_effects();
        store.create("Holder", props! { counters: vec![Value::Map(props! {})] })?;
        assert_eq!(effects(), vec!["attached=true"]);
        Ok(())
    }

    #[test]
    fn recursive_types_resolve_lazily() -> Result<()> {
        let store = Store::new(registry()?);
        let tree = store.create(
            "Folder",
            props! {
                name: "root",
                children: vec![Value::Map(props! {
                    name: "a",
                    children: vec![Value::Map(props! { name: "b" })],
                })],
            },
        )?;
        let snapshot = store.snapshot(tree)?;
        let grandchild = snapshot
            .get("children")
            .and_then(|c| c.as_array()?.first()?.get("children")?.as_array()?.first().cloned());
        assert_eq!(
            grandchild.as_ref().and_then(|g| g.get("name")).cloned(),
            Some(Value::String("b".into()))
        );

        let counter = store.create("Counter", props! {})?;
        assert!(store.attach(tree, "children", counter).is_err());
        Ok(())
    }

    #[test]
    fn union_fields_pick_by_type() -> Result<()> {
        let store = Store::new(registry()?);
        let holder = store.create(
            "Holder",
            props! { slot: Value::Map(props! { type: "Folder", name: "f" }) },
        )?;
        let slot = store.get(holder, "slot")?.as_node().ok_or(Error::NodeNotFound)?;
        assert_eq!(store.get(slot, "name")?, Value::String("f".into()));
        assert!(store.create("Holder", props! { slot: Value::Map(props! {}) }).is_err());
        Ok(())
    }

    #[test]
    fn compose_and_constructor() -> Result<()> {
        let base = Plugin::new("Base")
            .field("title", Field::string("untitled"))
            .views("shout", |tree, node| {
                let title = tree.node(node)?.get("title").cloned().unwrap_or_default();
                Ok(Value::String(title.to_css_string().to_uppercase()))
            });
        let doc = Plugin::new("Doc")
            .compose(&base)
            .field("pages", Field::int(1))
            .constructor(|store, plugin, mut props| {
                props.entry("title".into()).or_insert(Value::String("fresh".into()));
                store.create_model(plugin, props)
            });
        let registry = Registry::default();
        registry.register(doc)?;
        let store = Store::new(Rc::new(registry));
        let node = store.create("Doc", props! {})?;
        assert_eq!(store.view(node, "shout")?, Value::String("FRESH".into()));
        assert_eq!(store.get(node, "pages")?, Value::Int(1));
        Ok(())
    }
}
