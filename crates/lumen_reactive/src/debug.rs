//! Debug instrumentation events
//!
//! Effects may register `on_track` / `on_trigger` hooks to observe the
//! engine's bookkeeping. Hooks fire only in debug builds; release builds
//! skip event dispatch entirely.
//!
//! For atomic cells the `target` field is `None` and the key reads `value` —
//! a cell is its own single slot.

use std::rc::Rc;

use crate::effect::ReactiveEffect;
use crate::operations::{TrackOpKind, TriggerOpKind};
use crate::value::{Key, Target, Value};

/// Payload delivered to an effect's `on_track` hook
pub struct TrackEvent {
    pub effect: ReactiveEffect,
    pub target: Option<Target>,
    pub kind: TrackOpKind,
    pub key: Option<Key>,
}

/// Payload delivered to an effect's `on_trigger` hook
pub struct TriggerEvent {
    pub effect: ReactiveEffect,
    pub target: Option<Target>,
    pub kind: TriggerOpKind,
    pub key: Option<Key>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
    /// Pre-clear copy of a collection, present for CLEAR in debug builds
    pub old_target: Option<Target>,
}

/// Hook invoked when an effect is registered into a dep
pub type TrackHook = Rc<dyn Fn(&TrackEvent)>;

/// Hook invoked when a trigger dispatches to an effect
pub type TriggerHook = Rc<dyn Fn(&TriggerEvent)>;

/// Site information carried from a tracked read to the hook payload
pub(crate) struct TrackSite {
    pub target: Option<Target>,
    pub kind: TrackOpKind,
    pub key: Option<Key>,
}

impl TrackSite {
    pub(crate) fn to_event(&self, effect: ReactiveEffect) -> TrackEvent {
        TrackEvent {
            effect,
            target: self.target.clone(),
            kind: self.kind,
            key: self.key.clone(),
        }
    }
}

/// Site information carried from a write to the hook payload
pub(crate) struct TriggerSite {
    pub target: Option<Target>,
    pub kind: TriggerOpKind,
    pub key: Option<Key>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
    pub old_target: Option<Target>,
}

impl TriggerSite {
    pub(crate) fn to_event(&self, effect: ReactiveEffect) -> TriggerEvent {
        TriggerEvent {
            effect,
            target: self.target.clone(),
            kind: self.kind,
            key: self.key.clone(),
            new_value: self.new_value.clone(),
            old_value: self.old_value.clone(),
            old_target: self.old_target.clone(),
        }
    }
}
