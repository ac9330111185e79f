//! Entry access handlers for keyed collections
//!
//! Maps and sets follow the same track/trigger contract as structural
//! targets, with entry keys carried as values: reads track `(target,
//! Key::Val(entry))`, size and entry enumeration track the iteration
//! sentinels, and writes trigger ADD/SET/DELETE/CLEAR. Key-only enumeration
//! of a map tracks its own sentinel so key-set observers are not re-run by
//! value-only writes.
//!
//! Entry keys are normalized through `to_raw`, so a wrapper and its raw
//! container address the same entry; reads through a deep wrapper track the
//! wrapper key as well.

use tracing::warn;

use crate::operations::{TrackOpKind, TriggerOpKind};
use crate::reactive::{to_raw, WrapFlags};
use crate::tracking::{track, trigger};
use crate::value::{has_changed, same_value_zero, Key, Shape, Target, Value};

fn tracks(flags: WrapFlags) -> bool {
    !flags.contains(WrapFlags::READONLY) || flags.contains(WrapFlags::INNER_REACTIVE)
}

/// Wrap an entry value read out of a deep wrapper
fn wrap_result(value: Value, flags: WrapFlags) -> Value {
    if flags.contains(WrapFlags::SHALLOW) {
        return value;
    }
    if matches!(value, Value::Target(_)) {
        crate::handlers::wrap_nested(value, flags)
    } else {
        value
    }
}

fn warn_readonly(op: &str) {
    if cfg!(debug_assertions) {
        warn!(op, "write ignored: collection is readonly");
    }
}

// ============================================================================
// Reads
// ============================================================================

pub(crate) fn size(target: &Target, flags: WrapFlags) -> usize {
    if tracks(flags) {
        track(target, TrackOpKind::Iterate, Key::Iterate);
    }
    match &*target.shape() {
        Shape::Map(map) => map.len(),
        Shape::Set(set) => set.len(),
        _ => 0,
    }
}

pub(crate) fn entry_get(target: &Target, flags: WrapFlags, key: &Value) -> Value {
    let raw_key = to_raw(key);
    if tracks(flags) {
        if !same_value_zero(key, &raw_key) {
            track(target, TrackOpKind::Get, Key::Val(key.clone()));
        }
        track(target, TrackOpKind::Get, Key::Val(raw_key.clone()));
    }
    let found = match &*target.shape() {
        Shape::Map(map) => map.get(&raw_key).cloned(),
        _ => None,
    };
    match found {
        Some(value) => wrap_result(value, flags),
        None => Value::Unit,
    }
}

pub(crate) fn entry_has(target: &Target, flags: WrapFlags, key: &Value) -> bool {
    let raw_key = to_raw(key);
    if tracks(flags) {
        if !same_value_zero(key, &raw_key) {
            track(target, TrackOpKind::Has, Key::Val(key.clone()));
        }
        track(target, TrackOpKind::Has, Key::Val(raw_key.clone()));
    }
    match &*target.shape() {
        Shape::Map(map) => map.contains_key(&raw_key),
        Shape::Set(set) => set.contains(&raw_key),
        _ => false,
    }
}

pub(crate) fn entry_keys(target: &Target, flags: WrapFlags) -> Vec<Value> {
    if tracks(flags) {
        let key = if target.is_map() {
            Key::MapIterate
        } else {
            Key::Iterate
        };
        track(target, TrackOpKind::Iterate, key);
    }
    let keys: Vec<Value> = match &*target.shape() {
        Shape::Map(map) => map.keys().cloned().collect(),
        Shape::Set(set) => set.iter().cloned().collect(),
        _ => Vec::new(),
    };
    keys.into_iter().map(|k| wrap_result(k, flags)).collect()
}

pub(crate) fn entry_values(target: &Target, flags: WrapFlags) -> Vec<Value> {
    if tracks(flags) {
        track(target, TrackOpKind::Iterate, Key::Iterate);
    }
    let values: Vec<Value> = match &*target.shape() {
        Shape::Map(map) => map.values().cloned().collect(),
        Shape::Set(set) => set.iter().cloned().collect(),
        _ => Vec::new(),
    };
    values.into_iter().map(|v| wrap_result(v, flags)).collect()
}

pub(crate) fn entries(target: &Target, flags: WrapFlags) -> Vec<(Value, Value)> {
    if tracks(flags) {
        track(target, TrackOpKind::Iterate, Key::Iterate);
    }
    let pairs: Vec<(Value, Value)> = match &*target.shape() {
        Shape::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Shape::Set(set) => set.iter().map(|v| (v.clone(), v.clone())).collect(),
        _ => Vec::new(),
    };
    pairs
        .into_iter()
        .map(|(k, v)| (wrap_result(k, flags), wrap_result(v, flags)))
        .collect()
}

/// Iterate entries as `(value, key)` pairs over a snapshot, so the callback
/// may freely mutate the collection.
pub(crate) fn for_each(target: &Target, flags: WrapFlags, mut f: impl FnMut(Value, Value)) {
    for (key, value) in entries(target, flags) {
        f(value, key);
    }
}

// ============================================================================
// Writes
// ============================================================================

pub(crate) fn entry_set(target: &Target, flags: WrapFlags, key: Value, value: Value) -> bool {
    if flags.contains(WrapFlags::READONLY) {
        warn_readonly("set");
        return true;
    }
    let key = to_raw(&key);
    let value = to_raw(&value);
    let (had, old) = {
        let mut shape = target.shape_mut();
        match &mut *shape {
            Shape::Map(map) => {
                let old = map.get(&key).cloned();
                map.insert(key.clone(), value.clone());
                (old.is_some(), old.unwrap_or(Value::Unit))
            }
            _ => return false,
        }
    };
    if !had {
        trigger(
            target,
            TriggerOpKind::Add,
            Some(Key::Val(key)),
            Some(value),
            None,
            None,
        );
    } else if has_changed(&value, &old) {
        trigger(
            target,
            TriggerOpKind::Set,
            Some(Key::Val(key)),
            Some(value),
            Some(old),
            None,
        );
    }
    true
}

pub(crate) fn entry_add(target: &Target, flags: WrapFlags, value: Value) -> bool {
    if flags.contains(WrapFlags::READONLY) {
        warn_readonly("add");
        return true;
    }
    let value = to_raw(&value);
    let inserted = {
        let mut shape = target.shape_mut();
        match &mut *shape {
            Shape::Set(set) => set.insert(value.clone()),
            _ => return false,
        }
    };
    if inserted {
        trigger(
            target,
            TriggerOpKind::Add,
            Some(Key::Val(value.clone())),
            Some(value),
            None,
            None,
        );
    }
    true
}

pub(crate) fn entry_delete(target: &Target, flags: WrapFlags, key: &Value) -> bool {
    if flags.contains(WrapFlags::READONLY) {
        warn_readonly("delete");
        return false;
    }
    let key = to_raw(key);
    let (removed, old) = {
        let mut shape = target.shape_mut();
        match &mut *shape {
            Shape::Map(map) => {
                let old = map.shift_remove(&key);
                (old.is_some(), old.unwrap_or(Value::Unit))
            }
            Shape::Set(set) => (set.shift_remove(&key), Value::Unit),
            _ => (false, Value::Unit),
        }
    };
    if removed {
        trigger(
            target,
            TriggerOpKind::Delete,
            Some(Key::Val(key)),
            None,
            Some(old),
            None,
        );
    }
    removed
}

pub(crate) fn clear(target: &Target, flags: WrapFlags) {
    if flags.contains(WrapFlags::READONLY) {
        warn_readonly("clear");
        return;
    }
    let old_target = if cfg!(debug_assertions) {
        Some(target.snapshot())
    } else {
        None
    };
    let had_entries = {
        let mut shape = target.shape_mut();
        match &mut *shape {
            Shape::Map(map) => {
                let had = !map.is_empty();
                map.clear();
                had
            }
            Shape::Set(set) => {
                let had = !set.is_empty();
                set.clear();
                had
            }
            _ => false,
        }
    };
    if had_entries {
        trigger(target, TriggerOpKind::Clear, None, None, None, old_target);
    }
}
