//! Effect scopes
//!
//! A scope collects the effects created while it is entered (and any child
//! scopes), so they can be stopped in bulk. Detached scopes are not recorded
//! in their parent and must be stopped by hand.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::warn;

use crate::effect::ReactiveEffect;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = RefCell::new(Vec::new());
}

struct ScopeInner {
    active: Cell<bool>,
    effects: RefCell<Vec<ReactiveEffect>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    scopes: RefCell<Vec<EffectScope>>,
}

/// A container that owns effects for bulk stop
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

/// Create a scope. A non-detached scope created inside another scope is
/// recorded there and stops with it.
pub fn effect_scope(detached: bool) -> EffectScope {
    let scope = EffectScope(Rc::new(ScopeInner {
        active: Cell::new(true),
        effects: RefCell::new(Vec::new()),
        cleanups: RefCell::new(Vec::new()),
        scopes: RefCell::new(Vec::new()),
    }));
    if !detached {
        if let Some(parent) = active_scope() {
            parent.0.scopes.borrow_mut().push(scope.clone());
        }
    }
    scope
}

impl EffectScope {
    /// Run `f` with this scope entered; effects created inside are recorded.
    /// Returns `None` if the scope was already stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            warn!("cannot run an inactive scope");
            return None;
        }
        let _guard = ScopeGuard::enter(self.clone());
        Some(f())
    }

    /// Stop every recorded effect and child scope, then run the registered
    /// cleanups. Idempotent.
    pub fn stop(&self) {
        if !self.is_active() {
            return;
        }
        self.0.active.set(false);
        for effect in self.0.effects.borrow_mut().drain(..) {
            effect.stop();
        }
        for scope in self.0.scopes.borrow_mut().drain(..) {
            scope.stop();
        }
        for cleanup in self.0.cleanups.borrow_mut().drain(..) {
            cleanup();
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Number of effects currently recorded
    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }

    pub(crate) fn record(&self, effect: &ReactiveEffect) {
        if !self.is_active() {
            return;
        }
        let mut effects = self.0.effects.borrow_mut();
        if !effects.iter().any(|e| e == effect) {
            effects.push(effect.clone());
        }
    }
}

impl PartialEq for EffectScope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

fn active_scope() -> Option<EffectScope> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Record an effect into the currently entered scope, if any
pub(crate) fn record_in_active(effect: &ReactiveEffect) {
    if let Some(scope) = active_scope() {
        scope.record(effect);
    }
}

/// Register a callback to run when the entered scope stops
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    match active_scope() {
        Some(scope) => scope.0.cleanups.borrow_mut().push(Box::new(f)),
        None => warn!("on_scope_dispose called outside an active scope"),
    }
}

struct ScopeGuard;

impl ScopeGuard {
    fn enter(scope: EffectScope) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
        ScopeGuard
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    use crate::cell::cell;
    use crate::effect::effect;
    use crate::value::Value;

    #[test]
    fn test_scope_stops_recorded_effects() {
        let n = cell(0i64);
        let runs = Rc::new(StdCell::new(0));
        let scope = effect_scope(false);
        {
            let n = n.clone();
            let runs = Rc::clone(&runs);
            scope.run(move || {
                effect(move || {
                    n.get();
                    runs.set(runs.get() + 1);
                });
            });
        }
        assert_eq!(scope.effect_count(), 1);
        n.set(1i64);
        assert_eq!(runs.get(), 2);

        scope.stop();
        n.set(2i64);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_nested_scope_stops_with_parent() {
        let n = cell(0i64);
        let runs = Rc::new(StdCell::new(0));
        let outer = effect_scope(false);
        {
            let n = n.clone();
            let runs = Rc::clone(&runs);
            outer.run(move || {
                let inner = effect_scope(false);
                inner.run(move || {
                    effect(move || {
                        n.get();
                        runs.set(runs.get() + 1);
                    });
                });
            });
        }
        outer.stop();
        n.set(1i64);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_detached_scope_survives_parent() {
        let n = cell(0i64);
        let runs = Rc::new(StdCell::new(0));
        let outer = effect_scope(false);
        let detached = {
            let n = n.clone();
            let runs = Rc::clone(&runs);
            outer
                .run(move || {
                    let detached = effect_scope(true);
                    detached.run(move || {
                        effect(move || {
                            n.get();
                            runs.set(runs.get() + 1);
                        });
                    });
                    detached
                })
                .unwrap()
        };
        outer.stop();
        n.set(1i64);
        assert_eq!(runs.get(), 2);
        detached.stop();
        n.set(2i64);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_cleanups_run_on_stop() {
        let disposed = Rc::new(StdCell::new(false));
        let scope = effect_scope(false);
        {
            let disposed = Rc::clone(&disposed);
            scope.run(move || {
                on_scope_dispose(move || disposed.set(true));
            });
        }
        assert!(!disposed.get());
        scope.stop();
        assert!(disposed.get());
        // idempotent
        scope.stop();
    }

    #[test]
    fn test_inactive_scope_refuses_run() {
        let scope = effect_scope(false);
        scope.stop();
        assert!(scope.run(|| 1).is_none());
    }

    #[test]
    fn test_explicit_scope_option() {
        let scope = effect_scope(true);
        let n = cell(0i64);
        let n2 = n.clone();
        let _runner = crate::effect::effect_with(
            move || {
                n2.get();
                Value::Unit
            },
            crate::effect::EffectOptions {
                scope: Some(scope.clone()),
                ..Default::default()
            },
        );
        assert_eq!(scope.effect_count(), 1);
        scope.stop();
        assert!(!_runner.effect().is_active());
    }
}
