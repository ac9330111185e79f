//! Structural access handlers for object and array shapes
//!
//! These functions are the read/write traps behind [`crate::Reactive`] for
//! COMMON targets: keyed get/set/delete/has plus key enumeration, with the
//! array-specific behaviors layered on top — the `length` slot, identity
//! search over live indices, and the write-through length mutators that run
//! with tracking paused.
//!
//! Deep wrappers lazily wrap nested containers on read and auto-unwrap
//! atomic cells stored in non-integer slots; shallow wrappers return stored
//! values as-is.

use std::rc::Rc;

use tracing::warn;

use crate::operations::{TrackOpKind, TriggerOpKind};
use crate::reactive::{self, to_raw, WrapFlags};
use crate::tracking::{track, trigger, PauseGuard};
use crate::value::{has_changed, same_value_zero, strict_equals, Key, Shape, Target, Value};

/// Map string keys onto the array key space (`"length"`, integer indices)
/// and integer keys onto the object key space.
pub(crate) fn normalize_key(target: &Target, key: Key) -> Key {
    if target.is_array() {
        match key {
            Key::Str(s) => {
                if &*s == "length" {
                    Key::Length
                } else if let Ok(i) = s.parse::<usize>() {
                    Key::Index(i)
                } else {
                    Key::Str(s)
                }
            }
            other => other,
        }
    } else if target.is_object() {
        match key {
            Key::Index(i) => Key::Str(Rc::from(i.to_string())),
            Key::Length => Key::Str(Rc::from("length")),
            other => other,
        }
    } else {
        key
    }
}

// ============================================================================
// Raw shape access
// ============================================================================

pub(crate) fn raw_get(target: &Target, key: &Key) -> Value {
    match (&*target.shape(), key) {
        (Shape::Obj(map), key) => map.get(key).cloned().unwrap_or(Value::Unit),
        (Shape::Arr(items), Key::Index(i)) => items.get(*i).cloned().unwrap_or(Value::Unit),
        (Shape::Arr(items), Key::Length) => Value::Int(items.len() as i64),
        _ => Value::Unit,
    }
}

pub(crate) fn raw_set(target: &Target, key: &Key, value: Value) {
    match (&mut *target.shape_mut(), key) {
        (Shape::Obj(map), key) => {
            map.insert(key.clone(), value);
        }
        (Shape::Arr(items), Key::Index(i)) => {
            if *i >= items.len() {
                items.resize(*i + 1, Value::Unit);
            }
            items[*i] = value;
        }
        _ => {}
    }
}

fn raw_has(target: &Target, key: &Key) -> bool {
    match (&*target.shape(), key) {
        (Shape::Obj(map), key) => map.contains_key(key),
        (Shape::Arr(items), Key::Index(i)) => *i < items.len(),
        (Shape::Arr(_), Key::Length) => true,
        _ => false,
    }
}

pub(crate) fn raw_len(target: &Target) -> usize {
    match &*target.shape() {
        Shape::Arr(items) => items.len(),
        _ => 0,
    }
}

pub(crate) fn raw_keys(target: &Target) -> Vec<Key> {
    match &*target.shape() {
        Shape::Obj(map) => map.keys().cloned().collect(),
        Shape::Arr(items) => (0..items.len()).map(Key::Index).collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// get / set / delete / has / keys
// ============================================================================

pub(crate) fn get(target: &Target, key: Key, flags: WrapFlags) -> Value {
    let key = normalize_key(target, key);
    let readonly = flags.contains(WrapFlags::READONLY);
    let tracks = !readonly || flags.contains(WrapFlags::INNER_REACTIVE);

    let res = raw_get(target, &key);
    if !key.is_trackable() {
        return res;
    }
    if tracks {
        track(target, TrackOpKind::Get, key.clone());
    }
    if flags.contains(WrapFlags::SHALLOW) {
        return res;
    }
    if let Value::Cell(cell) = &res {
        // cells stored at integer array indices stay unwrapped
        if !(target.is_array() && key.is_integer()) {
            return cell.get();
        }
        return res;
    }
    if matches!(res, Value::Target(_)) {
        return wrap_nested(res, flags);
    }
    res
}

/// Lazily wrap a nested raw container read out of a deep wrapper
pub(crate) fn wrap_nested(value: Value, flags: WrapFlags) -> Value {
    if flags.contains(WrapFlags::READONLY) {
        let inner = if flags.contains(WrapFlags::INNER_REACTIVE) {
            reactive::reactive(value)
        } else {
            value
        };
        reactive::readonly(inner)
    } else {
        reactive::reactive(value)
    }
}

pub(crate) fn set(target: &Target, key: Key, value: Value, flags: WrapFlags) -> bool {
    let key = normalize_key(target, key);
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!(key = %key, "set ignored: target is readonly");
        }
        return true;
    }
    if target.is_array() && key == Key::Length {
        let Some(new_len) = value.as_int().filter(|n| *n >= 0) else {
            warn!("invalid array length");
            return false;
        };
        return set_len(target, new_len as usize, flags);
    }
    if target.is_array() && !matches!(key, Key::Index(_)) {
        warn!(key = %key, "arrays accept only integer indices and length");
        return false;
    }

    let old = raw_get(target, &key);
    let mut value = value;
    if !flags.contains(WrapFlags::SHALLOW) {
        // read-only wrappers are stored as-is; everything else is unwrapped
        let keep_wrapped = matches!(&value, Value::Reactive(r) if r.is_readonly());
        if !keep_wrapped {
            value = to_raw(&value);
        }
        if !target.is_array() {
            if let Value::Cell(old_cell) = &old {
                match &value {
                    Value::Cell(new_cell) => {
                        // the displaced cell keeps receiving the latest write
                        let forwarded = {
                            let _pause = PauseGuard::new();
                            new_cell.get()
                        };
                        old_cell.set(forwarded);
                    }
                    _ => {
                        old_cell.set(value);
                        return true;
                    }
                }
            }
        }
    }

    let had = match &key {
        Key::Index(i) => *i < raw_len(target),
        _ => raw_has(target, &key),
    };
    raw_set(target, &key, value.clone());
    if !had {
        trigger(target, TriggerOpKind::Add, Some(key), Some(value), None, None);
    } else if has_changed(&value, &old) {
        trigger(
            target,
            TriggerOpKind::Set,
            Some(key),
            Some(value),
            Some(old),
            None,
        );
    }
    true
}

pub(crate) fn delete(target: &Target, key: Key, flags: WrapFlags) -> bool {
    let key = normalize_key(target, key);
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!(key = %key, "delete ignored: target is readonly");
        }
        return true;
    }
    let had = raw_has(target, &key);
    let old = raw_get(target, &key);
    let ok = match (&mut *target.shape_mut(), &key) {
        (Shape::Obj(map), key) => {
            map.shift_remove(key);
            true
        }
        (Shape::Arr(items), Key::Index(i)) => {
            // deletion leaves a hole, length is untouched
            if *i < items.len() {
                items[*i] = Value::Unit;
            }
            true
        }
        (Shape::Arr(_), Key::Length) => false,
        _ => false,
    };
    if ok && had {
        trigger(
            target,
            TriggerOpKind::Delete,
            Some(key),
            None,
            Some(old),
            None,
        );
    }
    ok
}

pub(crate) fn has(target: &Target, key: Key, flags: WrapFlags) -> bool {
    let key = normalize_key(target, key);
    let result = raw_has(target, &key);
    let tracks = !flags.contains(WrapFlags::READONLY) || flags.contains(WrapFlags::INNER_REACTIVE);
    let builtin_sym = matches!(&key, Key::Sym(s) if s.is_builtin());
    if tracks && !builtin_sym {
        track(target, TrackOpKind::Has, key);
    }
    result
}

pub(crate) fn own_keys(target: &Target, flags: WrapFlags) -> Vec<Key> {
    let tracks = !flags.contains(WrapFlags::READONLY) || flags.contains(WrapFlags::INNER_REACTIVE);
    if tracks {
        let key = if target.is_array() {
            Key::Length
        } else {
            Key::Iterate
        };
        track(target, TrackOpKind::Iterate, key);
    }
    match &*target.shape() {
        Shape::Obj(map) => map.keys().cloned().collect(),
        Shape::Arr(items) => (0..items.len())
            .map(Key::Index)
            .chain(std::iter::once(Key::Length))
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// Array: length
// ============================================================================

/// Tracked read of the array length slot
pub(crate) fn len(target: &Target, flags: WrapFlags) -> usize {
    let tracks = !flags.contains(WrapFlags::READONLY) || flags.contains(WrapFlags::INNER_REACTIVE);
    if tracks {
        track(target, TrackOpKind::Get, Key::Length);
    }
    raw_len(target)
}

/// Resize the array. Shrinking fires every index at or past the new length.
pub(crate) fn set_len(target: &Target, new_len: usize, flags: WrapFlags) -> bool {
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!("set_len ignored: target is readonly");
        }
        return true;
    }
    let old_len = raw_len(target);
    if new_len == old_len {
        return true;
    }
    {
        let mut shape = target.shape_mut();
        if let Shape::Arr(items) = &mut *shape {
            items.resize(new_len, Value::Unit);
        } else {
            return false;
        }
    }
    trigger(
        target,
        TriggerOpKind::Set,
        Some(Key::Length),
        Some(Value::Int(new_len as i64)),
        Some(Value::Int(old_len as i64)),
        None,
    );
    true
}

// ============================================================================
// Array: identity search
// ============================================================================

fn track_array_indices(target: &Target, flags: WrapFlags) {
    let tracks = !flags.contains(WrapFlags::READONLY) || flags.contains(WrapFlags::INNER_REACTIVE);
    if !tracks {
        return;
    }
    // any index mutation must re-run a searching effect
    for i in 0..raw_len(target) {
        track(target, TrackOpKind::Get, Key::Index(i));
    }
}

fn search_raw(
    target: &Target,
    needle: &Value,
    reverse: bool,
    eq: fn(&Value, &Value) -> bool,
) -> Option<usize> {
    let shape = target.shape();
    let Shape::Arr(items) = &*shape else {
        return None;
    };
    if reverse {
        items.iter().rposition(|item| eq(item, needle))
    } else {
        items.iter().position(|item| eq(item, needle))
    }
}

/// Search against the stored (raw) elements; a miss retries with the needle
/// unwrapped, so searching for a wrapper finds its raw counterpart.
fn identity_search(
    target: &Target,
    flags: WrapFlags,
    needle: &Value,
    reverse: bool,
    eq: fn(&Value, &Value) -> bool,
) -> Option<usize> {
    track_array_indices(target, flags);
    search_raw(target, needle, reverse, eq).or_else(|| {
        if matches!(needle, Value::Reactive(_)) {
            search_raw(target, &to_raw(needle), reverse, eq)
        } else {
            None
        }
    })
}

pub(crate) fn index_of(target: &Target, flags: WrapFlags, needle: &Value) -> Option<usize> {
    identity_search(target, flags, needle, false, strict_equals)
}

pub(crate) fn last_index_of(target: &Target, flags: WrapFlags, needle: &Value) -> Option<usize> {
    identity_search(target, flags, needle, true, strict_equals)
}

pub(crate) fn includes(target: &Target, flags: WrapFlags, needle: &Value) -> bool {
    identity_search(target, flags, needle, false, same_value_zero).is_some()
}

// ============================================================================
// Array: length mutators
// ============================================================================
//
// These replay the write sequence an in-place mutation produces — element
// moves as keyed sets, then the length write — with tracking paused, so the
// calling effect does not subscribe to the slots it is mutating. Triggers
// still fire normally.

pub(crate) fn push(target: &Target, flags: WrapFlags, values: Vec<Value>) -> usize {
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!("push ignored: target is readonly");
        }
        return raw_len(target);
    }
    let _pause = PauseGuard::new();
    let mut len = raw_len(target);
    for value in values {
        set(target, Key::Index(len), value, flags);
        len += 1;
    }
    len
}

pub(crate) fn pop(target: &Target, flags: WrapFlags) -> Value {
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!("pop ignored: target is readonly");
        }
        return Value::Unit;
    }
    let _pause = PauseGuard::new();
    let len = raw_len(target);
    if len == 0 {
        return Value::Unit;
    }
    let result = get(target, Key::Index(len - 1), flags);
    delete(target, Key::Index(len - 1), flags);
    set_len(target, len - 1, flags);
    result
}

pub(crate) fn shift(target: &Target, flags: WrapFlags) -> Value {
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!("shift ignored: target is readonly");
        }
        return Value::Unit;
    }
    let _pause = PauseGuard::new();
    let len = raw_len(target);
    if len == 0 {
        return Value::Unit;
    }
    let result = get(target, Key::Index(0), flags);
    for i in 1..len {
        let moved = raw_get(target, &Key::Index(i));
        set(target, Key::Index(i - 1), moved, flags);
    }
    delete(target, Key::Index(len - 1), flags);
    set_len(target, len - 1, flags);
    result
}

pub(crate) fn unshift(target: &Target, flags: WrapFlags, values: Vec<Value>) -> usize {
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!("unshift ignored: target is readonly");
        }
        return raw_len(target);
    }
    let _pause = PauseGuard::new();
    let len = raw_len(target);
    let count = values.len();
    if count == 0 {
        return len;
    }
    for i in (0..len).rev() {
        let moved = raw_get(target, &Key::Index(i));
        set(target, Key::Index(i + count), moved, flags);
    }
    for (i, value) in values.into_iter().enumerate() {
        set(target, Key::Index(i), value, flags);
    }
    len + count
}

pub(crate) fn splice(
    target: &Target,
    flags: WrapFlags,
    start: usize,
    delete_count: usize,
    items: Vec<Value>,
) -> Vec<Value> {
    if flags.contains(WrapFlags::READONLY) {
        if cfg!(debug_assertions) {
            warn!("splice ignored: target is readonly");
        }
        return Vec::new();
    }
    let _pause = PauseGuard::new();
    let len = raw_len(target);
    let start = start.min(len);
    let delete_count = delete_count.min(len - start);
    let insert_count = items.len();

    let removed: Vec<Value> = (0..delete_count)
        .map(|i| get(target, Key::Index(start + i), flags))
        .collect();

    if insert_count < delete_count {
        for i in start + delete_count..len {
            let moved = raw_get(target, &Key::Index(i));
            set(target, Key::Index(i - delete_count + insert_count), moved, flags);
        }
    } else if insert_count > delete_count {
        for i in (start + delete_count..len).rev() {
            let moved = raw_get(target, &Key::Index(i));
            set(target, Key::Index(i + insert_count - delete_count), moved, flags);
        }
    }
    for (i, value) in items.into_iter().enumerate() {
        set(target, Key::Index(start + i), value, flags);
    }
    set_len(target, len - delete_count + insert_count, flags);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Target;

    #[test]
    fn test_normalize_array_keys() {
        let arr = Target::arr_from([1i64]);
        assert_eq!(normalize_key(&arr, Key::from("length")), Key::Length);
        assert_eq!(normalize_key(&arr, Key::from("2")), Key::Index(2));
        assert_eq!(normalize_key(&arr, Key::from("x")), Key::from("x"));

        let obj = Target::obj();
        assert_eq!(normalize_key(&obj, Key::Index(3)), Key::from("3"));
    }

    #[test]
    fn test_raw_get_set() {
        let obj = Target::obj_from([("a", 1i64)]);
        assert_eq!(raw_get(&obj, &Key::from("a")), Value::Int(1));
        assert!(raw_get(&obj, &Key::from("b")).is_unit());
        raw_set(&obj, &Key::from("b"), Value::Int(2));
        assert_eq!(raw_get(&obj, &Key::from("b")), Value::Int(2));

        let arr = Target::arr_from([1i64, 2]);
        assert_eq!(raw_get(&arr, &Key::Length), Value::Int(2));
        raw_set(&arr, &Key::Index(4), Value::Int(5));
        assert_eq!(raw_len(&arr), 5);
        assert!(raw_get(&arr, &Key::Index(3)).is_unit());
    }

    #[test]
    fn test_sparse_set_pads_with_holes() {
        let arr = Target::arr_from([1i64]);
        set(&arr, Key::Index(3), Value::Int(9), WrapFlags::empty());
        assert_eq!(raw_len(&arr), 4);
        assert!(raw_get(&arr, &Key::Index(1)).is_unit());
        assert_eq!(raw_get(&arr, &Key::Index(3)), Value::Int(9));
    }

    #[test]
    fn test_delete_leaves_hole() {
        let arr = Target::arr_from([1i64, 2, 3]);
        assert!(delete(&arr, Key::Index(1), WrapFlags::empty()));
        assert_eq!(raw_len(&arr), 3);
        assert!(raw_get(&arr, &Key::Index(1)).is_unit());
        // length itself cannot be deleted
        assert!(!delete(&arr, Key::Length, WrapFlags::empty()));
    }

    #[test]
    fn test_own_keys_shapes() {
        let obj = Target::obj_from([("a", 1i64), ("b", 2i64)]);
        assert_eq!(own_keys(&obj, WrapFlags::empty()), vec![Key::from("a"), Key::from("b")]);

        let arr = Target::arr_from([1i64, 2]);
        assert_eq!(
            own_keys(&arr, WrapFlags::empty()),
            vec![Key::Index(0), Key::Index(1), Key::Length]
        );
    }

    #[test]
    fn test_mutators_raw_results() {
        let arr = Target::arr_from([1i64, 2, 3]);
        let flags = WrapFlags::empty();

        assert_eq!(push(&arr, flags, vec![Value::Int(4)]), 4);
        assert_eq!(pop(&arr, flags), Value::Int(4));
        assert_eq!(shift(&arr, flags), Value::Int(1));
        assert_eq!(raw_get(&arr, &Key::Index(0)), Value::Int(2));
        assert_eq!(unshift(&arr, flags, vec![Value::Int(0)]), 3);
        assert_eq!(raw_get(&arr, &Key::Index(0)), Value::Int(0));

        // [0, 2, 3] → remove one at index 1, insert two
        let removed = splice(&arr, flags, 1, 1, vec![Value::Int(7), Value::Int(8)]);
        assert_eq!(removed, vec![Value::Int(2)]);
        assert_eq!(raw_len(&arr), 4);
        assert_eq!(raw_get(&arr, &Key::Index(1)), Value::Int(7));
        assert_eq!(raw_get(&arr, &Key::Index(2)), Value::Int(8));
        assert_eq!(raw_get(&arr, &Key::Index(3)), Value::Int(3));
    }

    #[test]
    fn test_identity_search_raw() {
        let marker = Target::obj();
        let arr = Target::arr_from([Value::Int(1), Value::Target(marker.clone())]);
        let flags = WrapFlags::empty();
        assert_eq!(index_of(&arr, flags, &Value::Target(marker)), Some(1));
        assert_eq!(index_of(&arr, flags, &Value::Int(9)), None);
        assert!(includes(&arr, flags, &Value::Int(1)));
        // positional search does not find NaN; membership does
        let nans = Target::arr_from([Value::Float(f64::NAN)]);
        assert_eq!(index_of(&nans, flags, &Value::Float(f64::NAN)), None);
        assert!(includes(&nans, flags, &Value::Float(f64::NAN)));
    }
}
