//! Integration tests for node styling and element rendering.

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use trellis::{
        CssSlot, Field, Plugin, Registry, Settings, Store, Value,
        error::Result,
        props,
        render::{Body, TextRender, meta_element},
        style::{Interpolation, Source, StyleTemplate, css_inject, get_static, get_style, set_css},
    };

    fn card() -> Result<Plugin> {
        Ok(Plugin::new("Card")
            .field("color", Field::string("red"))
            .field("title", Field::string(""))
            .inner_css(StyleTemplate::parse("color: ${|p| p.color};")?.with_props(["color"]))
            .outer_css(StyleTemplate::parse("margin: 1px;")?)
            .extend(TextRender::new("title")))
    }

    fn store(settings: Settings) -> Result<Store> {
        let registry = Registry::new(settings);
        registry.register(card()?)?;
        Ok(Store::new(Rc::new(registry)))
    }

    #[test]
    fn styled_objects_are_shared_per_template() -> Result<()> {
        let store = store(Settings::default())?;
        let a = store.create("Card", props! {})?;
        let b = store.create("Card", props! { color: "blue" })?;

        let sa = get_style(&store, a, CssSlot::Inner)?.expect("styled");
        let sb = get_style(&store, b, CssSlot::Inner)?.expect("styled");
        assert!(Rc::ptr_eq(&sa, &sb));
        assert_eq!(sa.component(), Some("Card"));
        assert_eq!(store.registry().styles().len(), 1);

        assert_eq!(get_static(&store, a, CssSlot::Inner)?, "color: red;");
        assert_eq!(get_static(&store, b, CssSlot::Inner)?, "color: blue;");
        assert_eq!(get_static(&store, a, CssSlot::Outer)?, "margin: 1px;");

        let outer = get_style(&store, a, CssSlot::Outer)?.expect("styled");
        assert_eq!(outer.component(), None);
        assert_eq!(store.registry().styles().len(), 2);
        Ok(())
    }

    #[test]
    fn set_css_replaces_template() -> Result<()> {
        let store = store(Settings::default())?;
        let a = store.create("Card", props! {})?;
        let b = store.create("Card", props! {})?;
        let before = get_style(&store, a, CssSlot::Inner)?.expect("styled");

        set_css(&store, a, CssSlot::Inner, "color: green;")?;
        let (code, source) = store.read(|tree| {
            let css = tree.node(a)?.css(CssSlot::Inner);
            Ok((css.reconstruct_code()?, css.source()))
        })?;
        assert_eq!(code, "color: green;");
        assert_eq!(source, Source::Inject);

        let after = get_style(&store, a, CssSlot::Inner)?.expect("styled");
        assert!(!Rc::ptr_eq(&before, &after));
        let other = get_style(&store, b, CssSlot::Inner)?.expect("styled");
        assert!(Rc::ptr_eq(&before, &other));
        assert_eq!(get_static(&store, a, CssSlot::Inner)?, "color: green;");
        Ok(())
    }

    #[test]
    fn replacing_a_template_rebuilds_its_style() -> Result<()> {
        let store = store(Settings::default())?;
        let a = store.create("Card", props! { title: "t" })?;
        let styled = store
            .set_inner_css(a, StyleTemplate::parse("content: '${|p| p.title}';")?)?
            .expect("styled");
        assert_eq!(styled.source(), Source::Wrapper);
        assert_eq!(get_static(&store, a, CssSlot::Inner)?, "content: 't';");
        Ok(())
    }

    #[test]
    fn inject_templates_concatenate_leading_arrays() -> Result<()> {
        let store = store(Settings::default())?;
        let a = store.create("Card", props! {})?;
        let fonts = Value::Array(vec![Value::String("serif".into()), Value::String("mono".into())]);
        let template = css_inject(
            ["color"],
            None,
            [
                Interpolation::Data(fonts),
                Interpolation::Text("; color: ".into()),
                Interpolation::Function("|p| p.color".into()),
            ],
        );
        let styled = store.set_inner_css(a, template)?.expect("styled");
        assert_eq!(styled.source(), Source::Inject);
        assert_eq!(get_static(&store, a, CssSlot::Inner)?, "serif,mono; color: red");
        assert_eq!(styled.render(&store.snapshot(a)?)?, "serif,mono; color: red");
        Ok(())
    }

    #[test]
    fn failing_style_functions() -> Result<()> {
        let broken = "a: ${|p| { throw \"boom\"; }};";

        let store = store(Settings::default().with_dev_mode(true))?;
        let a = store.create("Card", props! {})?;
        store.set_inner_css(a, StyleTemplate::parse(broken)?)?;
        assert_eq!(get_static(&store, a, CssSlot::Inner)?, "a: ;");

        let store = self::store(Settings::production())?;
        let a = store.create("Card", props! {})?;
        store.set_inner_css(a, StyleTemplate::parse(broken)?)?;
        assert!(get_static(&store, a, CssSlot::Inner).is_err());
        Ok(())
    }

    #[test]
    fn elements() -> Result<()> {
        let store = store(Settings::default())?;
        let a = store.create("Card", props! { title: "hello", testkey: "k1" })?;
        let el = meta_element(&store, a)?;
        assert_eq!(el.plugin, "Card");
        assert_eq!(store.display_id(a).as_deref(), Some(el.node_id.as_str()));
        assert!(el.visible);
        assert_eq!(el.props.get("color"), Some(&Value::String("red".into())));
        assert_eq!(el.props.get("title"), None);
        assert_eq!(el.css, "color: red;");
        assert_eq!(el.test_attrs["data-testid"], "Card");
        assert_eq!(el.test_attrs["data-testkey"], "k1");
        assert!(el.outer.is_some());
        assert!(matches!(&el.body, Body::Text(t) if t == "hello"));

        let hidden = store.create("Card", props! { visible: false })?;
        let el = meta_element(&store, hidden)?;
        assert!(!el.visible);
        assert!(matches!(el.body, Body::Empty));
        Ok(())
    }
}
