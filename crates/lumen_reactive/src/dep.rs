//! Dependency sets
//!
//! A [`Dep`] is the set of effects registered against one observed slot.
//! Effects are stored in insertion order and deduplicated, so trigger
//! dispatch is deterministic.
//!
//! Each dep also carries two bit-masks used by the re-tracking optimization
//! in the effect engine: `was_tracked` records that the dep was reachable in
//! the *previous* run of an effect, `new_tracked` that it has been reached in
//! the *current* run. Bits are indexed by the effect recursion depth, so up
//! to 30 nested effect runs can diff their dependency sets without a full
//! clear-and-rebuild.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::effect::ReactiveEffect;

/// The set of effects attached to one observed slot
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

struct DepInner {
    effects: RefCell<SmallVec<[ReactiveEffect; 4]>>,
    was_tracked: Cell<u32>,
    new_tracked: Cell<u32>,
}

impl Dep {
    pub(crate) fn new() -> Self {
        Dep(Rc::new(DepInner {
            effects: RefCell::new(SmallVec::new()),
            was_tracked: Cell::new(0),
            new_tracked: Cell::new(0),
        }))
    }

    pub(crate) fn contains(&self, effect: &ReactiveEffect) -> bool {
        self.0.effects.borrow().iter().any(|e| e == effect)
    }

    pub(crate) fn add(&self, effect: ReactiveEffect) {
        let mut effects = self.0.effects.borrow_mut();
        if !effects.iter().any(|e| *e == effect) {
            effects.push(effect);
        }
    }

    pub(crate) fn remove(&self, effect: &ReactiveEffect) {
        self.0.effects.borrow_mut().retain(|e| e != effect);
    }

    /// Snapshot of the current effect list. Dispatch iterates snapshots only:
    /// a running effect may grow or shrink this dep concurrently.
    pub(crate) fn effects(&self) -> SmallVec<[ReactiveEffect; 4]> {
        self.0.effects.borrow().clone()
    }

    /// Number of registered effects
    pub fn len(&self) -> usize {
        self.0.effects.borrow().len()
    }

    // ── re-tracking bit marks ───────────────────────────────────────────────

    pub(crate) fn was_tracked(&self, bit: u32) -> bool {
        self.0.was_tracked.get() & bit != 0
    }

    pub(crate) fn new_tracked(&self, bit: u32) -> bool {
        self.0.new_tracked.get() & bit != 0
    }

    pub(crate) fn mark_was(&self, bit: u32) {
        self.0.was_tracked.set(self.0.was_tracked.get() | bit);
    }

    pub(crate) fn mark_new(&self, bit: u32) {
        self.0.new_tracked.set(self.0.new_tracked.get() | bit);
    }

    pub(crate) fn clear_marks(&self, bit: u32) {
        self.0.was_tracked.set(self.0.was_tracked.get() & !bit);
        self.0.new_tracked.set(self.0.new_tracked.get() & !bit);
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dep(effects={})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_add_is_deduplicated() {
        let dep = Dep::new();
        let effect = ReactiveEffect::new(|| Value::Unit);
        dep.add(effect.clone());
        dep.add(effect.clone());
        assert_eq!(dep.len(), 1);
        assert!(dep.contains(&effect));
    }

    #[test]
    fn test_remove() {
        let dep = Dep::new();
        let a = ReactiveEffect::new(|| Value::Unit);
        let b = ReactiveEffect::new(|| Value::Unit);
        dep.add(a.clone());
        dep.add(b.clone());
        dep.remove(&a);
        assert!(!dep.contains(&a));
        assert!(dep.contains(&b));
    }

    #[test]
    fn test_marks_are_per_bit() {
        let dep = Dep::new();
        dep.mark_was(1 << 1);
        dep.mark_new(1 << 2);
        assert!(dep.was_tracked(1 << 1));
        assert!(!dep.was_tracked(1 << 2));
        assert!(dep.new_tracked(1 << 2));
        dep.clear_marks(1 << 1);
        assert!(!dep.was_tracked(1 << 1));
        assert!(dep.new_tracked(1 << 2));
    }
}
