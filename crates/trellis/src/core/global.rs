//! Well-known per-thread slots for shared singletons.
//!
//! Hosts that bundle several independently built plugin sets can agree on a
//! single registry by installing it here. The first value stored under a name
//! wins; later calls get the stored value back.

use std::{any::Any, cell::RefCell, collections::HashMap, rc::Rc};

use crate::core::{
    Registry,
    error::{Error, Result},
};

/// Slot name of the shared registry.
pub const REGISTRY_SLOT: &str = "registry";

thread_local! {
    static SLOTS: RefCell<HashMap<String, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Store `value` under `name` unless the slot is taken, and return the slot's
/// value.
pub fn ensure_global<T: 'static>(name: &str, value: Rc<T>) -> Result<Rc<T>> {
    SLOTS.with(|slots| {
        let stored = slots
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| value as Rc<dyn Any>)
            .clone();
        stored
            .downcast::<T>()
            .map_err(|_| Error::Internal(format!("global slot '{name}' holds another type")))
    })
}

/// The value stored under `name`, if any and of type `T`.
pub fn global<T: 'static>(name: &str) -> Option<Rc<T>> {
    SLOTS.with(|slots| {
        slots
            .borrow()
            .get(name)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    })
}

/// Install the shared registry, first writer wins.
pub fn ensure_registry(registry: Rc<Registry>) -> Result<Rc<Registry>> {
    ensure_global(REGISTRY_SLOT, registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() -> Result<()> {
        let a = ensure_global("test.first", Rc::new(1u32))?;
        let b = ensure_global("test.first", Rc::new(2u32))?;
        assert_eq!(*a, 1);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(ensure_global("test.first", Rc::new("x")).is_err());
        assert_eq!(global::<u32>("test.first").as_deref(), Some(&1));
        assert!(global::<u32>("test.missing").is_none());
        Ok(())
    }

    #[test]
    fn shared_registry() -> Result<()> {
        let first = ensure_registry(Rc::new(Registry::default()))?;
        let second = ensure_registry(Rc::new(Registry::default()))?;
        assert!(Rc::ptr_eq(&first, &second));
        Ok(())
    }
}
