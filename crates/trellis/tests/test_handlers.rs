//! Integration tests for handler resolution and invocation.

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;
    use trellis::{
        Field, Plugin, Registry, Settings, Store, TypeRef, Value,
        error::{Error, Result},
        handlers::{ErrHandler, Handler, HandlerSource, MOUNT_EVENT, Params, call_ui_handler},
        props,
    };

    thread_local! {
        static CALLS: RefCell<Vec<String>> = const { RefCell::new(vec![]) };
    }

    fn calls() -> Vec<String> {
        CALLS.with(|s| s.borrow().clone())
    }

    fn reset_calls() {
        CALLS.with(|s| s.borrow_mut().clear());
    }

    fn bump() -> Handler {
        Handler::sync(|ctx, _| {
            let node = ctx.node()?;
            let count = ctx.store().get(node, "count")?.as_int().unwrap_or_default() + 1;
            ctx.store().set(node, "count", Value::Int(count))?;
            CALLS.with(|s| s.borrow_mut().push(format!("bump {count}")));
            Ok(Value::Int(count))
        })
    }

    fn fail_after_bump() -> Handler {
        Handler::new(|ctx, _| async move {
            let node = ctx.node()?;
            ctx.store().set(node, "count", Value::Int(100))?;
            Err::<Value, _>(anyhow::anyhow!("broken"))
        })
    }

    fn input() -> Plugin {
        Plugin::new("Input").field("value", Field::string(""))
    }

    fn form() -> Plugin {
        Plugin::new("Form")
            .field("count", Field::int(0))
            .field(
                "input",
                Field::node(TypeRef::plugin_or_default("Input")),
            )
            .register([input()])
            .events([("submit", bump()), ("explode", fail_after_bump())])
            .events_no_tx([("explodeNoTx", fail_after_bump())])
            .events([(
                "scripted",
                HandlerSource::script(r#"|ctx| { set("count", get("count") + 10); get("count") }"#),
            )])
            .bind_event("onSubmit", "Form.submit")
            .bind_event(MOUNT_EVENT, "Form.submit")
    }

    fn store() -> Result<Store> {
        reset_calls();
        let registry = Registry::new(Settings::default());
        registry.register(form())?;
        Ok(Store::new(Rc::new(registry)))
    }

    #[tokio::test]
    async fn click_increments_count() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! { count: 0 })?;
        let result = call_ui_handler(&store, "Form.submit", Params::new().data(node), vec![]).await?;
        assert_eq!(result, Value::Int(1));
        assert_eq!(store.get(node, "count")?, Value::Int(1));
        assert_eq!(calls(), vec!["bump 1"]);
        Ok(())
    }

    #[tokio::test]
    async fn self_is_derived_from_data() -> Result<()> {
        let store = store()?;
        let form = store.create("Form", props! {})?;
        let input = store.get(form, "input")?.as_node().ok_or(Error::NodeNotFound)?;
        store.call("Form.submit", Params::new().data(input), vec![]).await?;
        assert_eq!(store.get(form, "count")?, Value::Int(1));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_handler_lists_ids() -> Result<()> {
        let store = store()?;
        let err = call_ui_handler(&store, "Form.nope", Params::new(), vec![])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Can't locate handler: 'Form.nope', those are available: "));
        for id in ["Form.explode", "Form.explodeNoTx", "Form.scripted", "Form.submit"] {
            assert!(message.contains(id), "{message}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn disabled_events_skip_handler() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! { disable_events: true })?;
        store.call("Form.submit", Params::new().data(node), vec![]).await?;
        assert_eq!(store.get(node, "count")?, Value::Int(0));

        let node = store.create("Form", props! { disable_events: vec!["onSubmit"] })?;
        assert_eq!(store.dispatch_event(node, "onSubmit", None, vec![]).await?, None);
        let params = Params::new().data(node).event_name("onSubmit");
        store.call("Form.submit", params, vec![]).await?;
        assert_eq!(store.get(node, "count")?, Value::Int(0));
        assert!(calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_respects_cancel_bubble() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! {})?;
        let cancel = Value::Map(props! { cancelBubble: true });
        let skipped = store
            .dispatch_event(node, "onSubmit", Some(cancel.clone()), vec![])
            .await?;
        assert_eq!(skipped, None);
        let ran = store.dispatch_event(node, MOUNT_EVENT, Some(cancel), vec![]).await?;
        assert_eq!(ran, Some(Value::Int(1)));
        assert_eq!(store.dispatch_event(node, "onUnbound", None, vec![]).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn errors_roll_back_and_propagate() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! { count: 5 })?;
        let err = store
            .call("Form.explode", Params::new().data(node).event_name("onExplode"), vec![])
            .await
            .unwrap_err();
        match err {
            Error::Handler { event, handler, node: id, .. } => {
                assert_eq!(event, "onExplode");
                assert_eq!(handler, "Form.explode");
                assert_eq!(Some(id), store.display_id(node));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get(node, "count")?, Value::Int(5));

        assert!(
            store
                .call("Form.explodeNoTx", Params::new().data(node), vec![])
                .await
                .is_err()
        );
        assert_eq!(store.get(node, "count")?, Value::Int(100));
        Ok(())
    }

    #[tokio::test]
    async fn err_handlers_can_swallow() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! {})?;
        let seen = Rc::new(RefCell::new(vec![]));
        let s = seen.clone();
        let declined = ErrHandler::new(move |err, args| {
            s.borrow_mut().push(format!("{err} {args:?}"));
            false
        })
        .with_args(vec![Value::Int(1)]);
        let accepted = ErrHandler::new(|err, _| err.to_string() == "broken");
        let params = Params::new()
            .data(node)
            .on_error(declined.clone())
            .on_error(accepted);
        let result = store.call("Form.explode", params, vec![]).await?;
        assert_eq!(result, Value::Null);
        assert_eq!(seen.borrow().len(), 1);

        let params = Params::new().data(node).on_error(declined);
        assert!(store.call("Form.explode", params, vec![]).await.is_err());
        assert_eq!(seen.borrow().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn script_handlers_touch_self() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! { count: 1 })?;
        let result = store.call("Form.scripted", Params::new().data(node), vec![]).await?;
        assert_eq!(result, Value::Int(11));
        assert_eq!(store.get(node, "count")?, Value::Int(11));
        Ok(())
    }

    #[tokio::test]
    async fn raw_handlers_receive_context() -> Result<()> {
        let store = store()?;
        let node = store.create("Form", props! {})?;
        store.registry().set_ui_handlers(
            "Tools",
            [(
                "echo",
                Handler::sync(|ctx, args| {
                    Ok(Value::Array(vec![
                        ctx.get("tag").cloned().unwrap_or_default(),
                        Value::Int(args.len() as i64),
                        Value::Bool(ctx.root().is_none()),
                    ]))
                }),
            )],
        )?;
        let entry = store.registry().event_handler_node("Tools.echo")?;
        let params = Params::new().data(node).with("tag", "x");
        let result = store.call(entry, params, vec![Value::Null, Value::Null]).await?;
        assert_eq!(
            result,
            Value::Array(vec![Value::String("x".into()), Value::Int(2), Value::Bool(true)])
        );
        assert_eq!(store.registry().plugin_handlers_names("Tools"), vec!["echo"]);
        Ok(())
    }
}
