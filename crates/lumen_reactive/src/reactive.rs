//! Observed-object factory and wrapper handle
//!
//! [`reactive`], [`shallow_reactive`], [`readonly`], and [`shallow_readonly`]
//! turn a raw [`Target`] into an observed [`Reactive`] wrapper. A wrapper is
//! a cheap handle — the target plus a flavor — and wrapper identity is
//! structural: constructing the same flavor over the same target twice
//! yields equal wrappers, so each target has at most one observable identity
//! per flavor.
//!
//! Layering `readonly` over a live `reactive` wrapper is the one permitted
//! composition: the view refuses writes but reads still track through it.
//!
//! # Example
//!
//! ```ignore
//! use lumen_reactive::{reactive, effect, Target};
//!
//! let state = reactive(Target::obj_from([("count", 0i64)]))
//!     .as_reactive()
//!     .unwrap()
//!     .clone();
//!
//! let s = state.clone();
//! effect(move || {
//!     println!("count is {:?}", s.get("count"));
//! });
//!
//! state.set("count", 1); // re-runs the effect
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use bitflags::bitflags;
use tracing::warn;

use crate::collections;
use crate::handlers;
use crate::value::{Key, Target, TargetKind, Value};

bitflags! {
    /// Wrapper flavor
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub(crate) struct WrapFlags: u8 {
        /// Writes are refused
        const READONLY = 1 << 0;
        /// Nested containers and cells are returned unwrapped
        const SHALLOW = 1 << 1;
        /// The read-only view was layered over a reactive wrapper,
        /// so reads keep tracking
        const INNER_REACTIVE = 1 << 2;
    }
}

/// An observed wrapper over a structural or collection target
#[derive(Clone)]
pub struct Reactive {
    target: Target,
    flags: WrapFlags,
}

impl Reactive {
    pub(crate) fn new(target: Target, flags: WrapFlags) -> Self {
        Reactive { target, flags }
    }

    /// Escape hatch to the underlying raw target
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Whether writes through this wrapper are refused
    pub fn is_readonly(&self) -> bool {
        self.flags.contains(WrapFlags::READONLY)
    }

    /// Whether wrapping stops at the top level
    pub fn is_shallow(&self) -> bool {
        self.flags.contains(WrapFlags::SHALLOW)
    }

    fn structural(&self, op: &str) -> bool {
        if self.target.is_collection() {
            warn!(op, "keyed collections use the entry operations");
            return false;
        }
        true
    }

    fn collection(&self, op: &str) -> bool {
        if !self.target.is_collection() {
            warn!(op, "entry operations require a keyed collection");
            return false;
        }
        true
    }

    // ── structural access ───────────────────────────────────────────────────

    /// Tracked keyed read. Deep wrappers wrap nested containers and unwrap
    /// atomic cells stored at non-integer keys.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        if !self.structural("get") {
            return Value::Unit;
        }
        handlers::get(&self.target, key.into(), self.flags)
    }

    /// Keyed write. Emits ADD or SET; a write of a non-cell into a slot
    /// holding a cell forwards to the cell instead.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        if !self.structural("set") {
            return false;
        }
        handlers::set(&self.target, key.into(), value.into(), self.flags)
    }

    /// Keyed removal. Emits DELETE when the key existed.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        if !self.structural("delete") {
            return false;
        }
        handlers::delete(&self.target, key.into(), self.flags)
    }

    /// Tracked membership probe
    pub fn has(&self, key: impl Into<Key>) -> bool {
        if !self.structural("has") {
            return false;
        }
        handlers::has(&self.target, key.into(), self.flags)
    }

    /// Tracked key enumeration
    pub fn keys(&self) -> Vec<Key> {
        if !self.structural("keys") {
            return Vec::new();
        }
        handlers::own_keys(&self.target, self.flags)
    }

    // ── array access ────────────────────────────────────────────────────────

    /// Tracked length read (arrays) or tracked size read (collections)
    pub fn len(&self) -> usize {
        if self.target.is_collection() {
            return collections::size(&self.target, self.flags);
        }
        handlers::len(&self.target, self.flags)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize the array; shrinking fires the dropped indices
    pub fn set_len(&self, new_len: usize) -> bool {
        if !self.structural("set_len") {
            return false;
        }
        handlers::set_len(&self.target, new_len, self.flags)
    }

    pub fn push(&self, value: impl Into<Value>) -> usize {
        if !self.structural("push") {
            return 0;
        }
        handlers::push(&self.target, self.flags, vec![value.into()])
    }

    pub fn push_all(&self, values: impl IntoIterator<Item = Value>) -> usize {
        if !self.structural("push") {
            return 0;
        }
        handlers::push(&self.target, self.flags, values.into_iter().collect())
    }

    pub fn pop(&self) -> Value {
        if !self.structural("pop") {
            return Value::Unit;
        }
        handlers::pop(&self.target, self.flags)
    }

    pub fn shift(&self) -> Value {
        if !self.structural("shift") {
            return Value::Unit;
        }
        handlers::shift(&self.target, self.flags)
    }

    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        if !self.structural("unshift") {
            return 0;
        }
        handlers::unshift(&self.target, self.flags, vec![value.into()])
    }

    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        if !self.structural("splice") {
            return Vec::new();
        }
        handlers::splice(
            &self.target,
            self.flags,
            start,
            delete_count,
            items.into_iter().collect(),
        )
    }

    /// Identity search; finds a wrapper's raw counterpart as well
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        if !self.structural("index_of") {
            return None;
        }
        handlers::index_of(&self.target, self.flags, needle)
    }

    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        if !self.structural("last_index_of") {
            return None;
        }
        handlers::last_index_of(&self.target, self.flags, needle)
    }

    pub fn includes(&self, needle: &Value) -> bool {
        if !self.structural("includes") {
            return false;
        }
        handlers::includes(&self.target, self.flags, needle)
    }

    // ── collection access ───────────────────────────────────────────────────

    /// Tracked entry count
    pub fn size(&self) -> usize {
        if !self.collection("size") {
            return 0;
        }
        collections::size(&self.target, self.flags)
    }

    pub fn entry_get(&self, key: &Value) -> Value {
        if !self.collection("entry_get") {
            return Value::Unit;
        }
        collections::entry_get(&self.target, self.flags, key)
    }

    pub fn entry_set(&self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        if !self.collection("entry_set") {
            return false;
        }
        collections::entry_set(&self.target, self.flags, key.into(), value.into())
    }

    /// Insert into a keyed set
    pub fn add(&self, value: impl Into<Value>) -> bool {
        if !self.collection("add") {
            return false;
        }
        collections::entry_add(&self.target, self.flags, value.into())
    }

    pub fn entry_has(&self, key: &Value) -> bool {
        if !self.collection("entry_has") {
            return false;
        }
        collections::entry_has(&self.target, self.flags, key)
    }

    pub fn entry_delete(&self, key: &Value) -> bool {
        if !self.collection("entry_delete") {
            return false;
        }
        collections::entry_delete(&self.target, self.flags, key)
    }

    /// Empty the collection, firing every registered dep
    pub fn clear(&self) {
        if self.collection("clear") {
            collections::clear(&self.target, self.flags);
        }
    }

    pub fn entry_keys(&self) -> Vec<Value> {
        if !self.collection("entry_keys") {
            return Vec::new();
        }
        collections::entry_keys(&self.target, self.flags)
    }

    pub fn entry_values(&self) -> Vec<Value> {
        if !self.collection("entry_values") {
            return Vec::new();
        }
        collections::entry_values(&self.target, self.flags)
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        if !self.collection("entries") {
            return Vec::new();
        }
        collections::entries(&self.target, self.flags)
    }

    /// Iterate entries as `(value, key)` over a snapshot
    pub fn for_each(&self, f: impl FnMut(Value, Value)) {
        if self.collection("for_each") {
            collections::for_each(&self.target, self.flags, f);
        }
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.flags == other.flags
    }
}

impl Eq for Reactive {}

impl Hash for Reactive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.hash(state);
        self.flags.hash(state);
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reactive({:?}, {:?})", self.target, self.flags)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Deep observed wrapper: nested containers wrap lazily on read
pub fn reactive(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), WrapFlags::empty())
}

/// Top-level-only observed wrapper
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), WrapFlags::SHALLOW)
}

/// Deep read-only view
pub fn readonly(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), WrapFlags::READONLY)
}

/// Top-level-only read-only view
pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), WrapFlags::READONLY | WrapFlags::SHALLOW)
}

fn create_reactive_object(value: Value, flags: WrapFlags) -> Value {
    match value {
        Value::Reactive(wrapper) => {
            // layering read-only on top of a live wrapper is the one
            // permitted re-wrap; everything else returns the wrapper as-is
            if flags.contains(WrapFlags::READONLY) && !wrapper.is_readonly() {
                return Value::Reactive(Reactive::new(
                    wrapper.target.clone(),
                    flags | WrapFlags::INNER_REACTIVE,
                ));
            }
            Value::Reactive(wrapper)
        }
        Value::Target(target) => {
            if target.kind() == TargetKind::Invalid {
                return Value::Target(target);
            }
            Value::Reactive(Reactive::new(target, flags))
        }
        Value::Cell(cell) => {
            if cfg!(debug_assertions) {
                warn!("atomic cells are already observed");
            }
            Value::Cell(cell)
        }
        other => {
            if cfg!(debug_assertions) {
                warn!(found = other.type_name(), "value cannot be observed");
            }
            other
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Whether reads of `value` register dependencies (true for reactive
/// wrappers and for read-only views layered over them)
pub fn is_reactive(value: &Value) -> bool {
    match value {
        Value::Reactive(r) => {
            !r.flags.contains(WrapFlags::READONLY) || r.flags.contains(WrapFlags::INNER_REACTIVE)
        }
        _ => false,
    }
}

/// Whether writes through `value` are refused
pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Reactive(r) if r.flags.contains(WrapFlags::READONLY))
}

/// Whether `value` is any observed wrapper
pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Unwrap an observed wrapper to its underlying raw target
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Reactive(r) => Value::Target(r.target.clone()),
        other => other.clone(),
    }
}

/// Mark a target so the factory refuses to wrap it
pub fn mark_raw(value: Value) -> Value {
    if let Value::Target(target) = &value {
        target.set_skip();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_identity_is_cached() {
        let target = Target::obj();
        let a = reactive(Value::Target(target.clone()));
        let b = reactive(Value::Target(target.clone()));
        assert_eq!(a, b);
        // re-wrapping a wrapper is the wrapper
        let c = reactive(a.clone());
        assert_eq!(a, c);
        // raw escape returns the original target
        assert_eq!(to_raw(&a), Value::Target(target));
    }

    #[test]
    fn test_flavor_queries() {
        let target = Target::obj();
        let r = reactive(Value::Target(target.clone()));
        let ro = readonly(Value::Target(target.clone()));
        assert!(is_reactive(&r) && !is_readonly(&r));
        assert!(is_readonly(&ro) && !is_reactive(&ro));
        assert!(is_proxy(&r) && is_proxy(&ro));

        let layered = readonly(r.clone());
        assert!(is_readonly(&layered));
        assert!(is_reactive(&layered));
        assert_ne!(layered, ro);
        assert_eq!(to_raw(&layered), Value::Target(target));

        // readonly over readonly collapses
        assert_eq!(readonly(ro.clone()), ro);
        // reactive() of a readonly view returns the view unchanged
        assert_eq!(reactive(ro.clone()), ro);
    }

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(reactive(1i64), Value::Int(1));
        assert_eq!(readonly(Value::Null), Value::Null);
        assert!(!is_proxy(&reactive(1i64)));
    }

    #[test]
    fn test_mark_raw_opts_out() {
        let target = Target::obj();
        let marked = mark_raw(Value::Target(target.clone()));
        assert_eq!(marked, Value::Target(target.clone()));
        let wrapped = reactive(marked);
        assert!(!is_proxy(&wrapped));
        assert_eq!(wrapped, Value::Target(target));
    }

    #[test]
    fn test_readonly_set_is_refused() {
        let ro = readonly(Value::Target(Target::obj_from([("a", 1i64)])))
            .as_reactive()
            .unwrap()
            .clone();
        // refused but reported as handled
        assert!(ro.set("a", 2i64));
        assert_eq!(ro.get("a"), Value::Int(1));
        assert!(ro.delete("a"));
        assert!(ro.has("a"));
    }

    #[test]
    fn test_shallow_reactive_returns_raw_nested() {
        let nested = Target::obj();
        let s = shallow_reactive(Value::Target(Target::obj_from([(
            "nested",
            Value::Target(nested.clone()),
        )])))
        .as_reactive()
        .unwrap()
        .clone();
        assert_eq!(s.get("nested"), Value::Target(nested.clone()));

        let deep = reactive(Value::Target(Target::obj_from([(
            "nested",
            Value::Target(nested.clone()),
        )])))
        .as_reactive()
        .unwrap()
        .clone();
        let wrapped = deep.get("nested");
        assert!(is_reactive(&wrapped));
        assert_eq!(to_raw(&wrapped), Value::Target(nested));
    }

    #[test]
    fn test_nested_wrap_is_stable() {
        let deep = reactive(Value::Target(Target::obj_from([(
            "nested",
            Value::Target(Target::obj()),
        )])))
        .as_reactive()
        .unwrap()
        .clone();
        assert_eq!(deep.get("nested"), deep.get("nested"));
    }

    #[test]
    fn test_readonly_nested_wrap() {
        let ro = readonly(Value::Target(Target::obj_from([(
            "nested",
            Value::Target(Target::obj()),
        )])))
        .as_reactive()
        .unwrap()
        .clone();
        let nested = ro.get("nested");
        assert!(is_readonly(&nested));
        assert!(!is_reactive(&nested));
    }
}
