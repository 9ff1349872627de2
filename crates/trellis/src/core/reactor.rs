//! The reactive primitive behind node reactions.
//!
//! A reaction pairs an observe function with an effect. The reactor records
//! the observed value when the reaction is created and, on every flush,
//! re-evaluates it and runs the effect if the value changed. Flushes triggered
//! from inside an effect are folded into the running flush, which repeats
//! until no effect reports further changes.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::{Rc, Weak},
};

use scopeguard::defer;

use crate::core::{
    error::{Error, Result},
    value::Value,
};

/// Observe half of a reaction.
pub type ObserveFn = Box<dyn Fn() -> Result<Value>>;

/// Effect half of a reaction.
pub type EffectFn = Box<dyn Fn(Value) -> Result<()>>;

/// Removes a reaction when called.
pub type Disposer = Box<dyn FnOnce()>;

/// Options for a tracked reaction.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Reaction name, used in diagnostics and identity.
    pub name: Option<String>,
    /// Run the effect once with the initial value.
    pub fire_immediately: bool,
}

/// A source of reactions.
pub trait ReactivePrimitive {
    /// Register a reaction and return its disposer.
    fn reaction(
        &self,
        observe: ObserveFn,
        effect: EffectFn,
        options: &TrackOptions,
    ) -> Result<Disposer>;

    /// Re-evaluate reactions and run the effects of those whose value
    /// changed.
    fn flush(&self) -> Result<()>;

    /// Number of live reactions.
    fn len(&self) -> usize;

    /// Are there no live reactions?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered reaction.
struct Reaction {
    /// Observe function.
    observe: ObserveFn,
    /// Effect function.
    effect: EffectFn,
    /// Last observed value.
    last: RefCell<Value>,
    /// Cleared on disposal, so an in-flight flush skips the reaction.
    active: Cell<bool>,
}

/// Shared reactor state.
struct ReactorInner {
    /// Live reactions in registration order.
    reactions: RefCell<BTreeMap<u64, Rc<Reaction>>>,
    /// Last issued reaction id.
    next: Cell<u64>,
    /// Is a flush running?
    flushing: Cell<bool>,
    /// Was a flush requested while one was running?
    dirty: Cell<bool>,
    /// Bound on flush passes.
    max_passes: usize,
}

/// Default reactive primitive: change detection by re-evaluation and value
/// comparison.
#[derive(Clone)]
pub struct Reactor {
    /// Shared state.
    inner: Rc<ReactorInner>,
}

impl Reactor {
    /// A reactor that reports a loop after `max_passes` flush passes.
    pub fn new(max_passes: usize) -> Self {
        Self {
            inner: Rc::new(ReactorInner {
                reactions: RefCell::new(BTreeMap::new()),
                next: Cell::new(0),
                flushing: Cell::new(false),
                dirty: Cell::new(false),
                max_passes,
            }),
        }
    }

    /// Remove a reaction.
    fn dispose(inner: &Weak<ReactorInner>, id: u64) {
        if let Some(inner) = inner.upgrade() {
            if let Some(reaction) = inner.reactions.borrow_mut().remove(&id) {
                reaction.active.set(false);
            }
        }
    }

    /// One pass over every live reaction. Returns true if any effect ran.
    fn pass(&self) -> Result<bool> {
        let pending: Vec<Rc<Reaction>> = self.inner.reactions.borrow().values().cloned().collect();
        let mut ran = false;
        for reaction in pending {
            if !reaction.active.get() {
                continue;
            }
            let value = (reaction.observe)()?;
            if *reaction.last.borrow() == value {
                continue;
            }
            *reaction.last.borrow_mut() = value.clone();
            ran = true;
            (reaction.effect)(value)?;
        }
        Ok(ran)
    }
}

impl ReactivePrimitive for Reactor {
    fn reaction(
        &self,
        observe: ObserveFn,
        effect: EffectFn,
        options: &TrackOptions,
    ) -> Result<Disposer> {
        let initial = observe()?;
        let id = self.inner.next.get() + 1;
        self.inner.next.set(id);
        let reaction = Rc::new(Reaction {
            observe,
            effect,
            last: RefCell::new(initial.clone()),
            active: Cell::new(true),
        });
        self.inner
            .reactions
            .borrow_mut()
            .insert(id, reaction.clone());
        let weak = Rc::downgrade(&self.inner);
        let disposer: Disposer = Box::new(move || Self::dispose(&weak, id));
        if options.fire_immediately {
            (reaction.effect)(initial)?;
        }
        Ok(disposer)
    }

    fn flush(&self) -> Result<()> {
        if self.inner.flushing.get() {
            self.inner.dirty.set(true);
            return Ok(());
        }
        self.inner.flushing.set(true);
        defer! {
            self.inner.flushing.set(false);
        }
        let mut passes = 0;
        loop {
            self.inner.dirty.set(false);
            passes += 1;
            if passes > self.inner.max_passes {
                return Err(Error::ReactionLoop(self.inner.max_passes));
            }
            let ran = self.pass()?;
            if !ran && !self.inner.dirty.get() {
                return Ok(());
            }
        }
    }

    fn len(&self) -> usize {
        self.inner.reactions.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn effects_run_on_change_only() -> Result<()> {
        let reactor = Reactor::new(10);
        let source = Rc::new(Cell::new(1));
        let seen = Rc::new(RefCell::new(vec![]));
        let (s, log) = (source.clone(), seen.clone());
        let dispose = reactor.reaction(
            Box::new(move || Ok(Value::Int(s.get()))),
            Box::new(move |v| {
                log.borrow_mut().push(v);
                Ok(())
            }),
            &TrackOptions::default(),
        )?;
        reactor.flush()?;
        assert!(seen.borrow().is_empty());
        source.set(2);
        reactor.flush()?;
        reactor.flush()?;
        assert_eq!(*seen.borrow(), vec![Value::Int(2)]);
        dispose();
        assert!(reactor.is_empty());
        source.set(3);
        reactor.flush()?;
        assert_eq!(seen.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn fire_immediately() -> Result<()> {
        let reactor = Reactor::new(10);
        let seen = Rc::new(Cell::new(0));
        let log = seen.clone();
        let _dispose = reactor.reaction(
            Box::new(|| Ok(Value::Int(5))),
            Box::new(move |_| {
                log.set(log.get() + 1);
                Ok(())
            }),
            &TrackOptions {
                fire_immediately: true,
                ..TrackOptions::default()
            },
        )?;
        assert_eq!(seen.get(), 1);
        Ok(())
    }

    #[test]
    fn runaway_effects_are_reported() -> Result<()> {
        let reactor = Reactor::new(5);
        let counter = Rc::new(Cell::new(0));
        let (a, b) = (counter.clone(), counter.clone());
        let _dispose = reactor.reaction(
            Box::new(move || Ok(Value::Int(a.get()))),
            Box::new(move |_| {
                b.set(b.get() + 1);
                Ok(())
            }),
            &TrackOptions::default(),
        )?;
        counter.set(1);
        let err = reactor.flush().unwrap_err();
        assert!(matches!(err, Error::ReactionLoop(5)));
        Ok(())
    }
}
