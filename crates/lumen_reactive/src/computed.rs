//! Derivations: lazy, memoized atomic cells
//!
//! A derivation wraps a getter in an internal effect whose scheduler does
//! not recompute. When a source changes, the scheduler marks the derivation
//! dirty and propagates the invalidation upward through the derivation's own
//! dep; the next read recomputes. Between two reads the getter runs at most
//! once, no matter how many source writes occur.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::warn;

use crate::cell::{track_cell_dep, trigger_cell_dep, CellHandle, CellLike};
use crate::dep::Dep;
use crate::effect::{EffectOptions, ReactiveEffect};
use crate::value::Value;

struct ComputedCell {
    dep: Dep,
    dirty: Rc<Cell<bool>>,
    value: RefCell<Value>,
    effect: ReactiveEffect,
    setter: Option<Box<dyn Fn(Value)>>,
}

impl CellLike for ComputedCell {
    fn get(&self) -> Value {
        track_cell_dep(&self.dep);
        if self.dirty.get() {
            self.dirty.set(false);
            let value = self.effect.run();
            *self.value.borrow_mut() = value;
        }
        self.value.borrow().clone()
    }

    fn set(&self, value: Value) {
        match &self.setter {
            Some(setter) => setter(value),
            None => {
                if cfg!(debug_assertions) {
                    warn!("write ignored: derivation has no setter");
                }
            }
        }
    }

    fn force_trigger(&self) {
        trigger_cell_dep(&self.dep, None);
    }

    fn is_readonly_cell(&self) -> bool {
        self.setter.is_none()
    }
}

fn create_computed(
    getter: impl Fn() -> Value + 'static,
    setter: Option<Box<dyn Fn(Value)>>,
) -> CellHandle {
    let dep = Dep::new();
    let dirty = Rc::new(Cell::new(true));
    // invalidation propagates upward through the dep; recomputation waits
    // for the next read
    let scheduler = {
        let dep = dep.clone();
        let dirty = Rc::clone(&dirty);
        Rc::new(move || {
            if !dirty.get() {
                dirty.set(true);
                trigger_cell_dep(&dep, None);
            }
        }) as Rc<dyn Fn()>
    };
    let effect = ReactiveEffect::new_internal(
        Rc::new(getter),
        EffectOptions {
            lazy: true,
            scheduler: Some(scheduler),
            ..Default::default()
        },
    );
    effect.mark_computed();
    CellHandle::from_rc(Rc::new(ComputedCell {
        dep,
        dirty,
        value: RefCell::new(Value::Unit),
        effect,
        setter,
    }))
}

/// Read-only derivation over `getter`
pub fn computed(getter: impl Fn() -> Value + 'static) -> CellHandle {
    create_computed(getter, None)
}

/// Writable derivation: reads memoize `getter`, writes invoke `setter`
pub fn computed_with(
    getter: impl Fn() -> Value + 'static,
    setter: impl Fn(Value) + 'static,
) -> CellHandle {
    create_computed(getter, Some(Box::new(setter)))
}
