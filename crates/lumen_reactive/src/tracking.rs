//! Tracking API and the target registry
//!
//! [`track`] and [`trigger`] are the only path observed wrappers use to talk
//! to the effect engine. The registry is a process-wide (per-thread)
//! two-level map: target address → (key → dep). The outer level holds weak
//! handles, so observing a value never keeps it alive; a slot whose target
//! died is discarded the first time its address is touched again.
//!
//! `pause_tracking` / `enable_tracking` / `reset_tracking` maintain a stack
//! of booleans behind the `should_track` flag. Write-through array mutators
//! pause tracking around their internal reads so an effect does not observe
//! the length changes it causes itself.

use std::cell::{Cell, RefCell};
use std::rc::Weak;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::debug::{TrackSite, TriggerSite};
use crate::dep::Dep;
use crate::effect;
use crate::operations::{TrackOpKind, TriggerOpKind};
use crate::value::{Key, Target, TargetInner, Value};

struct TargetEntry {
    /// Liveness witness: a dead weak under a reused address marks the slot stale
    live: Weak<TargetInner>,
    deps: IndexMap<Key, Dep>,
}

thread_local! {
    static SHOULD_TRACK: Cell<bool> = Cell::new(true);
    static TRACK_STACK: RefCell<Vec<bool>> = RefCell::new(Vec::new());
    static REGISTRY: RefCell<FxHashMap<usize, TargetEntry>> = RefCell::new(FxHashMap::default());
}

// ============================================================================
// should_track stack
// ============================================================================

/// Disable tracking until the matching [`reset_tracking`]
pub fn pause_tracking() {
    SHOULD_TRACK.with(|st| {
        TRACK_STACK.with(|stack| stack.borrow_mut().push(st.get()));
        st.set(false);
    });
}

/// Enable tracking until the matching [`reset_tracking`]
pub fn enable_tracking() {
    SHOULD_TRACK.with(|st| {
        TRACK_STACK.with(|stack| stack.borrow_mut().push(st.get()));
        st.set(true);
    });
}

/// Restore the tracking state saved by the last pause/enable
pub fn reset_tracking() {
    SHOULD_TRACK.with(|st| {
        let last = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
        st.set(last.unwrap_or(true));
    });
}

pub(crate) fn should_track() -> bool {
    SHOULD_TRACK.with(|st| st.get())
}

/// Swap the flag without touching the stack; used by the effect run guard
pub(crate) fn swap_should_track(value: bool) -> bool {
    SHOULD_TRACK.with(|st| {
        let prev = st.get();
        st.set(value);
        prev
    })
}

pub(crate) fn set_should_track_raw(value: bool) {
    SHOULD_TRACK.with(|st| st.set(value));
}

/// Whether a read right now would register a dependency
pub(crate) fn is_tracking() -> bool {
    should_track() && effect::active_effect().is_some()
}

/// Pauses tracking for the current lexical scope
pub(crate) struct PauseGuard;

impl PauseGuard {
    pub(crate) fn new() -> Self {
        pause_tracking();
        PauseGuard
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        reset_tracking();
    }
}

// ============================================================================
// track
// ============================================================================

/// Record the active effect as a dependent of `(target, key)`.
///
/// No-op when tracking is paused or no effect is running; a read outside any
/// effect never mutates the registry. `kind` is carried for diagnostics.
pub fn track(target: &Target, kind: TrackOpKind, key: Key) {
    if !is_tracking() {
        return;
    }
    trace!(key = %key, op = ?kind, "track");
    let dep = dep_for(target, key.clone());
    effect::track_effects(
        &dep,
        TrackSite {
            target: Some(target.clone()),
            kind,
            key: Some(key),
        },
    );
}

fn dep_for(target: &Target, key: Key) -> Dep {
    REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        let entry = registry.entry(target.ptr()).or_insert_with(|| TargetEntry {
            live: target.downgrade(),
            deps: IndexMap::new(),
        });
        if entry.live.strong_count() == 0 {
            // address reuse after a dropped target
            *entry = TargetEntry {
                live: target.downgrade(),
                deps: IndexMap::new(),
            };
        }
        entry.deps.entry(key).or_insert_with(Dep::new).clone()
    })
}

/// Dep registered for `(target, key)`, if that slot has ever been tracked
pub(crate) fn registered_dep(target: &Target, key: &Key) -> Option<Dep> {
    REGISTRY.with(|registry| {
        let registry = registry.borrow();
        let entry = registry.get(&target.ptr())?;
        if entry.live.strong_count() == 0 {
            return None;
        }
        entry.deps.get(key).cloned()
    })
}

// ============================================================================
// trigger
// ============================================================================

/// Collect and fire every dep implicated by a write.
///
/// Collection rules:
/// - CLEAR fires all deps of the target.
/// - A `length` write on an array fires every indexed key at or past the new
///   length, plus the length slot itself.
/// - ADD/DELETE on non-arrays fire the key plus the iteration sentinel (and
///   the key-iteration sentinel on keyed maps); ADD at an integer array index
///   fires the key plus the length slot.
/// - SET fires the key, plus the iteration sentinel on keyed maps.
///
/// Collected deps are union-merged so each effect is dispatched at most once
/// per trigger, in first-seen order over a snapshot.
pub fn trigger(
    target: &Target,
    kind: TriggerOpKind,
    key: Option<Key>,
    new_value: Option<Value>,
    old_value: Option<Value>,
    old_target: Option<Target>,
) {
    let collected: Vec<Dep> = REGISTRY.with(|registry| {
        let registry = registry.borrow();
        let Some(entry) = registry.get(&target.ptr()) else {
            return Vec::new();
        };
        if entry.live.strong_count() == 0 {
            return Vec::new();
        }
        let mut deps = Vec::new();
        if kind == TriggerOpKind::Clear {
            deps.extend(entry.deps.values().cloned());
        } else if target.is_array() && key == Some(Key::Length) {
            let new_len = new_value
                .as_ref()
                .and_then(Value::as_int)
                .map(|n| n.max(0) as usize)
                .unwrap_or(0);
            for (k, dep) in &entry.deps {
                if matches!(k, Key::Index(i) if *i >= new_len) {
                    deps.push(dep.clone());
                }
            }
            if let Some(dep) = entry.deps.get(&Key::Length) {
                deps.push(dep.clone());
            }
        } else {
            if let Some(key) = key.as_ref() {
                if let Some(dep) = entry.deps.get(key) {
                    deps.push(dep.clone());
                }
            }
            match kind {
                TriggerOpKind::Add => {
                    if !target.is_array() {
                        if let Some(dep) = entry.deps.get(&Key::Iterate) {
                            deps.push(dep.clone());
                        }
                        if target.is_map() {
                            if let Some(dep) = entry.deps.get(&Key::MapIterate) {
                                deps.push(dep.clone());
                            }
                        }
                    } else if matches!(key, Some(Key::Index(_))) {
                        if let Some(dep) = entry.deps.get(&Key::Length) {
                            deps.push(dep.clone());
                        }
                    }
                }
                TriggerOpKind::Delete => {
                    if !target.is_array() {
                        if let Some(dep) = entry.deps.get(&Key::Iterate) {
                            deps.push(dep.clone());
                        }
                        if target.is_map() {
                            if let Some(dep) = entry.deps.get(&Key::MapIterate) {
                                deps.push(dep.clone());
                            }
                        }
                    }
                }
                TriggerOpKind::Set => {
                    if target.is_map() {
                        if let Some(dep) = entry.deps.get(&Key::Iterate) {
                            deps.push(dep.clone());
                        }
                    }
                }
                TriggerOpKind::Clear => unreachable!("handled above"),
            }
        }
        deps
    });
    if collected.is_empty() {
        return;
    }
    trace!(op = ?kind, deps = collected.len(), "trigger");

    // union-merge: one dispatch per effect, first-seen order
    let mut effects: Vec<effect::ReactiveEffect> = Vec::new();
    for dep in &collected {
        for e in dep.effects() {
            if !effects.contains(&e) {
                effects.push(e);
            }
        }
    }
    let site = TriggerSite {
        target: Some(target.clone()),
        kind,
        key,
        new_value,
        old_value,
        old_target,
    };
    effect::trigger_effects(effects, &site);
}
