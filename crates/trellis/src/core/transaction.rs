//! Transaction wrappers bracket plugin handler execution.

use async_trait::async_trait;
use tracing::{debug, error};

use crate::core::{Store, handlers::TaskFn, value::Value};

/// Brackets the execution of a plugin handler.
#[async_trait(?Send)]
pub trait TransactionWrapper {
    /// Run `task` inside the transaction.
    async fn wrap(&self, store: &Store, task: TaskFn) -> anyhow::Result<Value>;
}

/// Captures node state before the task and restores it if the task fails.
/// Nodes the task destroyed are brought back and nodes it created are
/// destroyed. Restoration runs with the tree unprotected, so reactions record
/// the restored values without running their effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotTransaction;

#[async_trait(?Send)]
impl TransactionWrapper for SnapshotTransaction {
    async fn wrap(&self, store: &Store, task: TaskFn) -> anyhow::Result<Value> {
        let capture = store.capture()?;
        match task().await {
            Ok(value) => {
                store.commit(capture)?;
                Ok(value)
            }
            Err(err) => {
                debug!("rolling back after handler failure: {err}");
                if let Err(rollback) = store.rollback(capture) {
                    error!("rollback failed: {rollback}");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        core::{
            error::{Error, Result},
            handlers::HandlerFuture,
        },
        props, testing,
    };

    #[tokio::test]
    async fn failure_rolls_back() -> Result<()> {
        let store = testing::store()?;
        let btn = store.create("Btn", props! { count: 1 })?;
        let s = store.clone();
        let result = SnapshotTransaction
            .wrap(
                &store,
                Box::new(move || -> HandlerFuture {
                    Box::pin(async move {
                        s.set(btn, "count", Value::Int(10))?;
                        Err::<Value, _>(anyhow::anyhow!("nope"))
                    })
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(btn, "count")?, Value::Int(1));

        let s = store.clone();
        let result = SnapshotTransaction
            .wrap(
                &store,
                Box::new(move || -> HandlerFuture {
                    Box::pin(async move {
                        s.set(btn, "count", Value::Int(2))?;
                        Ok::<_, anyhow::Error>(Value::Bool(true))
                    })
                }),
            )
            .await;
        assert_eq!(result.ok(), Some(Value::Bool(true)));
        assert_eq!(store.get(btn, "count")?, Value::Int(2));
        Ok(())
    }

    #[tokio::test]
    async fn failure_restores_destroyed_children() -> Result<()> {
        let store = testing::store()?;
        let label = store.create("Label", props! { text: "a" })?;
        let panel = store.create("Panel", props! {})?;
        store.attach(panel, "items", label)?;
        let before = store.snapshot(panel)?;

        let s = store.clone();
        let result = SnapshotTransaction
            .wrap(
                &store,
                Box::new(move || -> HandlerFuture {
                    Box::pin(async move {
                        s.destroy(label)?;
                        Err::<Value, _>(anyhow::anyhow!("nope"))
                    })
                }),
            )
            .await;
        assert!(result.is_err());
        assert!(store.read(|tree| Ok(tree.is_alive(label)))?);
        assert_eq!(store.get(panel, "items")?, Value::Array(vec![Value::Node(label)]));
        assert_eq!(store.snapshot(panel)?, before);

        let s = store.clone();
        SnapshotTransaction
            .wrap(
                &store,
                Box::new(move || -> HandlerFuture {
                    Box::pin(async move {
                        s.destroy(label)?;
                        Ok::<_, anyhow::Error>(Value::Null)
                    })
                }),
            )
            .await
            .map_err(Error::from_anyhow)?;
        assert!(!store.read(|tree| Ok(tree.is_alive(label)))?);
        assert_eq!(store.get(panel, "items")?, Value::Array(vec![]));
        Ok(())
    }
}
