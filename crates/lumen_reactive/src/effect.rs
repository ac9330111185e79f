//! Effect engine
//!
//! A [`ReactiveEffect`] wraps a user computation and re-runs it when the
//! slots it read are written. Effects nest: running an effect pushes it onto
//! a thread-local execution stack, and the *active* effect — the stack top —
//! is the one reads register into.
//!
//! # Dependency re-tracking
//!
//! An effect's dependency set is dynamic: each run may read a different set
//! of slots. Rather than clearing and rebuilding the set on every run, the
//! engine diffs it with two per-dep bit-masks indexed by recursion depth:
//!
//! 1. On entry, every dep the effect currently belongs to gets its
//!    `was_tracked` bit set for this depth.
//! 2. Reads during the run set `new_tracked` on the deps they touch; a dep
//!    already carrying `was_tracked` is not re-inserted.
//! 3. On exit, deps that were tracked before but not reached this run are
//!    dropped, and both bits are cleared.
//!
//! Bit indices run out past depth 30; deeper nesting falls back to full
//! cleanup on entry. Exit bookkeeping runs on the unwind path too, so a
//! panicking computation leaves the stack, depth, and tracking state
//! consistent.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::debug::{TrackHook, TrackSite, TriggerHook, TriggerSite};
use crate::dep::Dep;
use crate::scope::{self, EffectScope};
use crate::tracking;
use crate::value::Value;

/// Recursion depths beyond this fall back to full cleanup
pub(crate) const MAX_MARKER_BITS: u32 = 30;

thread_local! {
    static EFFECT_STACK: RefCell<Vec<ReactiveEffect>> = RefCell::new(Vec::new());
    static TRACK_DEPTH: Cell<u32> = Cell::new(0);
    static TRACK_OP_BIT: Cell<u32> = Cell::new(1);
}

/// The effect currently executing, if any
pub(crate) fn active_effect() -> Option<ReactiveEffect> {
    EFFECT_STACK.with(|s| s.borrow().last().cloned())
}

fn track_op_bit() -> u32 {
    TRACK_OP_BIT.with(|b| b.get())
}

fn track_depth() -> u32 {
    TRACK_DEPTH.with(|d| d.get())
}

/// Options accepted by [`effect_with`]
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the immediate first run
    pub lazy: bool,
    /// Invoked on trigger in place of a direct re-run
    pub scheduler: Option<Rc<dyn Fn()>>,
    /// Record the effect in this scope in addition to the entered one
    pub scope: Option<EffectScope>,
    /// Allow the effect to be dispatched by its own trigger
    pub allow_recurse: bool,
    /// Invoked once when the effect is stopped
    pub on_stop: Option<Box<dyn FnOnce()>>,
    /// Debug hook: effect registered into a dep
    pub on_track: Option<TrackHook>,
    /// Debug hook: trigger dispatched to this effect
    pub on_trigger: Option<TriggerHook>,
}

pub(crate) struct EffectInner {
    f: Rc<dyn Fn() -> Value>,
    scheduler: Option<Rc<dyn Fn()>>,
    active: Cell<bool>,
    deps: RefCell<SmallVec<[Dep; 4]>>,
    allow_recurse: Cell<bool>,
    /// Marks the internal effect of a derivation; dispatch invalidates these
    /// before plain effects so consumers never read a stale memo
    computed: Cell<bool>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    on_track: Option<TrackHook>,
    on_trigger: Option<TriggerHook>,
}

/// A computation whose re-execution is driven by the slots it read
#[derive(Clone)]
pub struct ReactiveEffect {
    inner: Rc<EffectInner>,
}

impl ReactiveEffect {
    /// Create an effect with default options. The effect is active but does
    /// not run until [`ReactiveEffect::run`] is called.
    pub fn new(f: impl Fn() -> Value + 'static) -> Self {
        Self::new_internal(Rc::new(f), EffectOptions::default())
    }

    pub(crate) fn new_internal(f: Rc<dyn Fn() -> Value>, options: EffectOptions) -> Self {
        let effect = ReactiveEffect {
            inner: Rc::new(EffectInner {
                f,
                scheduler: options.scheduler,
                active: Cell::new(true),
                deps: RefCell::new(SmallVec::new()),
                allow_recurse: Cell::new(options.allow_recurse),
                computed: Cell::new(false),
                on_stop: RefCell::new(options.on_stop),
                on_track: options.on_track,
                on_trigger: options.on_trigger,
            }),
        };
        scope::record_in_active(&effect);
        if let Some(scope) = &options.scope {
            scope.record(&effect);
        }
        effect
    }

    /// Execute the computation, re-collecting dependencies.
    ///
    /// A stopped effect still executes, but untracked. A self-call while the
    /// effect is already on the execution stack is skipped unless
    /// `allow_recurse` is set.
    pub fn run(&self) -> Value {
        if !self.inner.active.get() {
            let _pause = tracking::PauseGuard::new();
            return (self.inner.f)();
        }
        let already_running = EFFECT_STACK.with(|s| s.borrow().iter().any(|e| e == self));
        if already_running && !self.inner.allow_recurse.get() {
            return Value::Unit;
        }
        let f = Rc::clone(&self.inner.f);
        let _run = RunGuard::enter(self.clone());
        f()
    }

    /// Detach the effect from every dep and deactivate it. Idempotent.
    pub fn stop(&self) {
        if self.inner.active.get() {
            cleanup_effect(self);
            if let Some(on_stop) = self.inner.on_stop.borrow_mut().take() {
                on_stop();
            }
            self.inner.active.set(false);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn allow_recurse(&self) -> bool {
        self.inner.allow_recurse.get()
    }

    pub fn set_allow_recurse(&self, allow: bool) {
        self.inner.allow_recurse.set(allow);
    }

    /// Number of deps this effect currently belongs to
    pub fn dep_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub(crate) fn has_dep(&self, dep: &Dep) -> bool {
        self.inner.deps.borrow().iter().any(|d| d == dep)
    }

    pub(crate) fn mark_computed(&self) {
        self.inner.computed.set(true);
    }
}

impl PartialEq for ReactiveEffect {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ReactiveEffect {}

impl fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReactiveEffect(active={}, deps={})",
            self.is_active(),
            self.dep_count()
        )
    }
}

// ============================================================================
// Run bookkeeping
// ============================================================================

/// Stack/depth/tracking bookkeeping around one effect run.
///
/// Entry happens in `enter`; exit happens in `Drop`, so a panic inside the
/// user computation unwinds through the same path as a normal return.
struct RunGuard {
    effect: ReactiveEffect,
    prev_should_track: bool,
}

impl RunGuard {
    fn enter(effect: ReactiveEffect) -> Self {
        EFFECT_STACK.with(|s| s.borrow_mut().push(effect.clone()));
        let prev_should_track = tracking::swap_should_track(true);
        let depth = TRACK_DEPTH.with(|d| {
            let depth = d.get() + 1;
            d.set(depth);
            depth
        });
        TRACK_OP_BIT.with(|b| b.set(1 << depth));
        if depth <= MAX_MARKER_BITS {
            init_dep_markers(&effect);
        } else {
            cleanup_effect(&effect);
        }
        RunGuard {
            effect,
            prev_should_track,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let depth = TRACK_DEPTH.with(|d| d.get());
        if depth <= MAX_MARKER_BITS {
            finalize_dep_markers(&self.effect);
        }
        TRACK_DEPTH.with(|d| d.set(depth - 1));
        TRACK_OP_BIT.with(|b| b.set(1 << (depth - 1)));
        tracking::set_should_track_raw(self.prev_should_track);
        EFFECT_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

fn init_dep_markers(effect: &ReactiveEffect) {
    let bit = track_op_bit();
    for dep in effect.inner.deps.borrow().iter() {
        dep.mark_was(bit);
    }
}

/// Drop deps that were reachable in the previous run but not in this one,
/// clearing this depth's marks along the way. After this, `deps` is exactly
/// the set of deps read during the finished run.
fn finalize_dep_markers(effect: &ReactiveEffect) {
    let bit = track_op_bit();
    let mut deps = effect.inner.deps.borrow_mut();
    deps.retain(|dep| {
        let stale = dep.was_tracked(bit) && !dep.new_tracked(bit);
        dep.clear_marks(bit);
        if stale {
            dep.remove(effect);
        }
        !stale
    });
}

/// Remove the effect from every dep and clear its dep list
pub(crate) fn cleanup_effect(effect: &ReactiveEffect) {
    let deps = std::mem::take(&mut *effect.inner.deps.borrow_mut());
    for dep in deps {
        dep.remove(effect);
    }
}

// ============================================================================
// Register & dispatch
// ============================================================================

/// Register the active effect into `dep`, restoring the bidirectional link
/// (`dep` lists the effect, the effect lists `dep`) in one step.
pub(crate) fn track_effects(dep: &Dep, site: TrackSite) {
    let Some(effect) = active_effect() else { return };
    let depth = track_depth();
    let bit = track_op_bit();
    let should_add = if depth <= MAX_MARKER_BITS {
        if !dep.new_tracked(bit) {
            dep.mark_new(bit);
            !dep.was_tracked(bit)
        } else {
            false
        }
    } else {
        !dep.contains(&effect)
    };
    if should_add {
        dep.add(effect.clone());
        effect.inner.deps.borrow_mut().push(dep.clone());
        if cfg!(debug_assertions) {
            if let Some(hook) = &effect.inner.on_track {
                hook(&site.to_event(effect.clone()));
            }
        }
    }
}

/// Dispatch a trigger to a pre-merged snapshot of effects.
///
/// Derivation effects go first, so by the time a plain effect re-reads a
/// derivation its invalidation has landed. The currently running effect is
/// skipped unless it opted into recursion; effects with a scheduler are
/// deferred to it instead of run directly.
pub(crate) fn trigger_effects(effects: Vec<ReactiveEffect>, site: &TriggerSite) {
    for effect in effects.iter().filter(|e| e.inner.computed.get()) {
        trigger_effect(effect, site);
    }
    for effect in effects.iter().filter(|e| !e.inner.computed.get()) {
        trigger_effect(effect, site);
    }
}

fn trigger_effect(effect: &ReactiveEffect, site: &TriggerSite) {
    let is_self = active_effect().map_or(false, |active| active == *effect);
    if is_self && !effect.inner.allow_recurse.get() {
        return;
    }
    if cfg!(debug_assertions) {
        if let Some(hook) = &effect.inner.on_trigger {
            hook(&site.to_event(effect.clone()));
        }
    }
    match &effect.inner.scheduler {
        Some(scheduler) => scheduler(),
        None => {
            effect.run();
        }
    }
}

// ============================================================================
// Public wrapper
// ============================================================================

/// Handle returned by [`effect`]: re-runnable, stoppable
pub struct EffectRunner {
    effect: ReactiveEffect,
}

impl EffectRunner {
    /// Re-execute the computation manually
    pub fn run(&self) -> Value {
        self.effect.run()
    }

    /// The underlying effect
    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }
}

/// Create an effect and run it once immediately
pub fn effect(f: impl Fn() + 'static) -> EffectRunner {
    effect_with(
        move || {
            f();
            Value::Unit
        },
        EffectOptions::default(),
    )
}

/// Create an effect with explicit options; runs immediately unless `lazy`
pub fn effect_with(f: impl Fn() -> Value + 'static, options: EffectOptions) -> EffectRunner {
    let lazy = options.lazy;
    let effect = ReactiveEffect::new_internal(Rc::new(f), options);
    if !lazy {
        effect.run();
    }
    EffectRunner { effect }
}

/// Stop a runner's effect
pub fn stop(runner: &EffectRunner) {
    runner.effect.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::reactive;
    use crate::value::Target;

    fn observed(v: Value) -> crate::reactive::Reactive {
        v.as_reactive().unwrap().clone()
    }

    #[test]
    fn test_effect_runs_immediately() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let s = observed(reactive(Target::obj_from([("n", 1i64)])));
        let log2 = Rc::clone(&log);
        let s2 = s.clone();
        let _runner = effect(move || {
            log2.borrow_mut().push(s2.get("n").as_int().unwrap());
        });
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn test_lazy_effect_waits_for_run() {
        let count = Rc::new(Cell::new(0));
        let count2 = Rc::clone(&count);
        let runner = effect_with(
            move || {
                count2.set(count2.get() + 1);
                Value::Unit
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );
        assert_eq!(count.get(), 0);
        runner.run();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_deps_match_last_run() {
        // a branch switch must drop the dep on the untaken side
        let s = observed(reactive(Target::obj_from([
            ("flag", Value::Bool(true)),
            ("a", Value::Int(1i64)),
            ("b", Value::Int(2i64)),
        ])));
        let s2 = s.clone();
        let runner = effect(move || {
            if s2.get("flag").as_bool().unwrap() {
                s2.get("a");
            } else {
                s2.get("b");
            }
        });
        // flag + a
        assert_eq!(runner.effect().dep_count(), 2);
        s.set("flag", false);
        // flag + b
        assert_eq!(runner.effect().dep_count(), 2);

        let count = Rc::new(Cell::new(0));
        let count2 = Rc::clone(&count);
        let s3 = s.clone();
        let _probe = effect(move || {
            s3.get("a");
            count2.set(count2.get() + 1);
        });
        assert_eq!(count.get(), 1);
        // the branch effect no longer reads `a`, so only the probe re-runs
        s.set("a", 10);
        assert_eq!(count.get(), 2);
        assert_eq!(s.get("b").as_int().unwrap(), 2);
    }

    #[test]
    fn test_stop_detaches_from_deps() {
        let count = Rc::new(Cell::new(0));
        let s = observed(reactive(Target::obj_from([("n", 0i64)])));
        let count2 = Rc::clone(&count);
        let s2 = s.clone();
        let runner = effect(move || {
            s2.get("n");
            count2.set(count2.get() + 1);
        });
        assert_eq!(count.get(), 1);
        stop(&runner);
        assert_eq!(runner.effect().dep_count(), 0);
        s.set("n", 1);
        assert_eq!(count.get(), 1);
        // a stopped runner still executes directly, without tracking
        runner.run();
        assert_eq!(count.get(), 2);
        assert_eq!(runner.effect().dep_count(), 0);
        s.set("n", 2);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let stops = Rc::new(Cell::new(0));
        let stops2 = Rc::clone(&stops);
        let runner = effect_with(
            || Value::Unit,
            EffectOptions {
                on_stop: Some(Box::new(move || stops2.set(stops2.get() + 1))),
                ..Default::default()
            },
        );
        stop(&runner);
        stop(&runner);
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn test_self_write_terminates() {
        let s = observed(reactive(Target::obj_from([("n", 0i64)])));
        let s2 = s.clone();
        let _runner = effect(move || {
            let n = s2.get("n").as_int().unwrap();
            s2.set("n", n + 1);
        });
        // the running effect is excluded from its own trigger
        assert_eq!(s.get("n").as_int().unwrap(), 1);
        s.set("n", 10);
        assert_eq!(s.get("n").as_int().unwrap(), 11);
    }

    #[test]
    fn test_scheduler_replaces_direct_run() {
        let scheduled = Rc::new(Cell::new(0));
        let runs = Rc::new(Cell::new(0));
        let s = observed(reactive(Target::obj_from([("n", 0i64)])));
        let scheduled2 = Rc::clone(&scheduled);
        let runs2 = Rc::clone(&runs);
        let s2 = s.clone();
        let runner = effect_with(
            move || {
                s2.get("n");
                runs2.set(runs2.get() + 1);
                Value::Unit
            },
            EffectOptions {
                scheduler: Some(Rc::new(move || scheduled2.set(scheduled2.get() + 1))),
                ..Default::default()
            },
        );
        assert_eq!(runs.get(), 1);
        s.set("n", 1);
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduled.get(), 1);
        // deferred work is the scheduler's to perform
        runner.run();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_unwind_restores_engine_state() {
        let s = observed(reactive(Target::obj_from([("n", 0i64), ("boom", 0i64)])));
        let s2 = s.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            effect(move || {
                s2.get("boom");
                panic!("user computation failed");
            });
        }));
        assert!(result.is_err());
        assert!(active_effect().is_none());
        // tracking state unwound: later effects behave normally
        let count = Rc::new(Cell::new(0));
        let count2 = Rc::clone(&count);
        let s3 = s.clone();
        let _probe = effect(move || {
            s3.get("n");
            count2.set(count2.get() + 1);
        });
        s.set("n", 1);
        assert_eq!(count.get(), 2);
    }
}
