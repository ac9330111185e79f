//! Atomic observed cells
//!
//! A cell is a single-slot observed value with its own dep: reads register
//! the active effect, writes trigger it when the raw value actually changed
//! (same-value-zero). Cells auto-unwrap when read through a deep structural
//! wrapper, and a non-cell write into a slot holding a cell forwards to the
//! cell's setter.
//!
//! Variants:
//! - [`cell`] — deep: stores the raw form for change detection and wraps
//!   container values on read
//! - [`shallow_cell`] — stores and returns the value as-is
//! - [`custom_cell`] — caller-supplied accessors over this cell's dep
//! - [`to_cell`] / [`to_cells`] — forwarding cells over an observed
//!   object's keys, with no dep of their own
//! - derivations, built in [`crate::computed`]

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use tracing::warn;

use crate::debug::TrackSite;
use crate::dep::Dep;
use crate::effect;
use crate::handlers;
use crate::operations::{TrackOpKind, TriggerOpKind};
use crate::reactive::{is_proxy, reactive, to_raw};
use crate::tracking;
use crate::value::{has_changed, Key, Target, Value};

/// Behavior shared by every cell variant
pub trait CellLike {
    /// Tracked read of the cell's value
    fn get(&self) -> Value;

    /// Write the cell's value
    fn set(&self, value: Value);

    /// Fire the cell's dep with the current value regardless of change
    /// detection. Forwarding cells have no dep and ignore this.
    fn force_trigger(&self) {}

    /// Whether writes are refused (derivations without a setter)
    fn is_readonly_cell(&self) -> bool {
        false
    }
}

/// Shared handle to a cell of any variant; identity is the allocation
#[derive(Clone)]
pub struct CellHandle(Rc<dyn CellLike>);

impl CellHandle {
    pub(crate) fn from_rc(inner: Rc<dyn CellLike>) -> Self {
        CellHandle(inner)
    }

    /// Tracked read
    pub fn get(&self) -> Value {
        self.0.get()
    }

    /// Write; triggers dependents when the raw value changed
    pub fn set(&self, value: impl Into<Value>) {
        self.0.set(value.into());
    }

    /// Whether writes are refused
    pub fn is_readonly(&self) -> bool {
        self.0.is_readonly_cell()
    }

    pub(crate) fn force_trigger(&self) {
        self.0.force_trigger();
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for CellHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for CellHandle {}

impl Hash for CellHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.addr());
    }
}

impl fmt::Debug for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell(@{:x})", self.addr())
    }
}

// ============================================================================
// Dep plumbing shared by cell variants
// ============================================================================

/// Register the active effect in a cell's dep
pub(crate) fn track_cell_dep(dep: &Dep) {
    if !tracking::is_tracking() {
        return;
    }
    effect::track_effects(
        dep,
        TrackSite {
            target: None,
            kind: TrackOpKind::Get,
            key: Some(Key::Str(Rc::from("value"))),
        },
    );
}

/// Fire a cell's dep
pub(crate) fn trigger_cell_dep(dep: &Dep, new_value: Option<Value>) {
    let effects: Vec<_> = dep.effects().into_iter().collect();
    if effects.is_empty() {
        return;
    }
    effect::trigger_effects(
        effects,
        &crate::debug::TriggerSite {
            target: None,
            kind: TriggerOpKind::Set,
            key: Some(Key::Str(Rc::from("value"))),
            new_value,
            old_value: None,
            old_target: None,
        },
    );
}

/// Wrap container values the way deep cells and derivations store them
fn to_observed(value: Value) -> Value {
    if matches!(value, Value::Target(_)) {
        reactive(value)
    } else {
        value
    }
}

// ============================================================================
// Plain / shallow cells
// ============================================================================

struct PlainCell {
    dep: Dep,
    /// Unwrapped form used for change detection
    raw: RefCell<Value>,
    /// Possibly wrapped form returned to readers
    value: RefCell<Value>,
    shallow: bool,
}

impl PlainCell {
    fn new(value: Value, shallow: bool) -> Self {
        let raw = if shallow { value.clone() } else { to_raw(&value) };
        let wrapped = if shallow { value } else { to_observed(raw.clone()) };
        PlainCell {
            dep: Dep::new(),
            raw: RefCell::new(raw),
            value: RefCell::new(wrapped),
            shallow,
        }
    }
}

impl CellLike for PlainCell {
    fn get(&self) -> Value {
        track_cell_dep(&self.dep);
        self.value.borrow().clone()
    }

    fn set(&self, value: Value) {
        let new_raw = if self.shallow {
            value.clone()
        } else {
            to_raw(&value)
        };
        let changed = {
            let raw = self.raw.borrow();
            has_changed(&new_raw, &raw)
        };
        if changed {
            *self.raw.borrow_mut() = new_raw.clone();
            *self.value.borrow_mut() = if self.shallow {
                value
            } else {
                to_observed(new_raw.clone())
            };
            trigger_cell_dep(&self.dep, Some(new_raw));
        }
    }

    fn force_trigger(&self) {
        trigger_cell_dep(&self.dep, Some(self.raw.borrow().clone()));
    }
}

/// Deep atomic cell
pub fn cell(value: impl Into<Value>) -> CellHandle {
    let value = value.into();
    if let Value::Cell(existing) = value {
        return existing;
    }
    CellHandle(Rc::new(PlainCell::new(value, false)))
}

/// Shallow atomic cell: the stored value is returned as-is
pub fn shallow_cell(value: impl Into<Value>) -> CellHandle {
    let value = value.into();
    if let Value::Cell(existing) = value {
        return existing;
    }
    CellHandle(Rc::new(PlainCell::new(value, true)))
}

// ============================================================================
// Custom cells
// ============================================================================

/// Accessors returned by a [`custom_cell`] factory
pub type CellAccessors = (Box<dyn Fn() -> Value>, Box<dyn Fn(Value)>);

struct CustomCell {
    dep: Dep,
    get: Box<dyn Fn() -> Value>,
    set: Box<dyn Fn(Value)>,
}

impl CellLike for CustomCell {
    fn get(&self) -> Value {
        (self.get)()
    }

    fn set(&self, value: Value) {
        (self.set)(value);
    }

    fn force_trigger(&self) {
        trigger_cell_dep(&self.dep, None);
    }
}

/// Cell with caller-supplied accessors. The factory receives `track` and
/// `trigger` callbacks bound to this cell's dep and returns the getter and
/// setter; the getter should call `track`, the setter `trigger`.
pub fn custom_cell<F>(factory: F) -> CellHandle
where
    F: FnOnce(Rc<dyn Fn()>, Rc<dyn Fn()>) -> CellAccessors,
{
    let dep = Dep::new();
    let track_dep = {
        let dep = dep.clone();
        Rc::new(move || track_cell_dep(&dep)) as Rc<dyn Fn()>
    };
    let trigger_dep = {
        let dep = dep.clone();
        Rc::new(move || trigger_cell_dep(&dep, None)) as Rc<dyn Fn()>
    };
    let (get, set) = factory(track_dep, trigger_dep);
    CellHandle(Rc::new(CustomCell { dep, get, set }))
}

// ============================================================================
// Forwarding cells over object keys
// ============================================================================

/// Cell over `(source, key)`. No dep of its own: reads and writes forward to
/// the source, so tracking happens through the source's handlers.
struct KeyCell {
    source: Value,
    key: Key,
}

impl CellLike for KeyCell {
    fn get(&self) -> Value {
        match &self.source {
            Value::Reactive(r) => r.get(self.key.clone()),
            Value::Target(t) => handlers::raw_get(t, &self.key),
            _ => Value::Unit,
        }
    }

    fn set(&self, value: Value) {
        match &self.source {
            Value::Reactive(r) => {
                r.set(self.key.clone(), value);
            }
            Value::Target(t) => handlers::raw_set(t, &self.key, value),
            _ => {}
        }
    }
}

/// Forwarding cell over one key of an observed object. A cell already
/// stored at that key is returned as-is.
pub fn to_cell(source: &Value, key: impl Into<Key>) -> CellHandle {
    let key = key.into();
    let raw_slot = match source {
        Value::Reactive(r) => {
            let key = handlers::normalize_key(r.target(), key.clone());
            handlers::raw_get(r.target(), &key)
        }
        Value::Target(t) => handlers::raw_get(t, &key),
        _ => Value::Unit,
    };
    if let Value::Cell(existing) = raw_slot {
        return existing;
    }
    CellHandle(Rc::new(KeyCell {
        source: source.clone(),
        key,
    }))
}

/// Expand each own key of an observed object into a forwarding cell.
/// Returns a raw container of the same shape whose slots are cells.
pub fn to_cells(source: &Value) -> Value {
    if !is_proxy(source) && cfg!(debug_assertions) {
        warn!("to_cells expects an observed object; the cells will not be reactive");
    }
    let target = match source {
        Value::Reactive(r) => r.target().clone(),
        Value::Target(t) => t.clone(),
        _ => return Value::Unit,
    };
    if target.is_array() {
        let out = Target::arr();
        for i in 0..handlers::raw_len(&target) {
            handlers::raw_set(
                &out,
                &Key::Index(i),
                Value::Cell(to_cell(source, Key::Index(i))),
            );
        }
        Value::Target(out)
    } else {
        let out = Target::obj();
        for key in handlers::raw_keys(&target) {
            handlers::raw_set(&out, &key, Value::Cell(to_cell(source, key.clone())));
        }
        Value::Target(out)
    }
}

// ============================================================================
// Cell proxy
// ============================================================================

/// Shallow view over a record whose slots may be cells: reads auto-unwrap,
/// writes forward into an existing cell. Structural reads through a raw
/// record do not track; the unwrapped cell read does.
pub struct CellProxy {
    inner: Value,
}

/// Build a [`CellProxy`] over an observed wrapper or raw record
pub fn cell_proxy(source: impl Into<Value>) -> CellProxy {
    CellProxy {
        inner: source.into(),
    }
}

impl CellProxy {
    pub fn get(&self, key: impl Into<Key>) -> Value {
        match &self.inner {
            // observed wrappers already unwrap nested cells on read
            Value::Reactive(r) => r.get(key),
            Value::Target(t) => {
                let value = handlers::raw_get(t, &key.into());
                match value {
                    Value::Cell(cell) => cell.get(),
                    other => other,
                }
            }
            other => other.clone(),
        }
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let value = value.into();
        match &self.inner {
            Value::Reactive(r) => r.set(key, value),
            Value::Target(t) => {
                let key = key.into();
                let old = handlers::raw_get(t, &key);
                if let Value::Cell(old_cell) = &old {
                    if !matches!(value, Value::Cell(_)) {
                        old_cell.set(value);
                        return true;
                    }
                }
                handlers::raw_set(t, &key, value);
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Whether `value` is an atomic cell
pub fn is_cell(value: &Value) -> bool {
    matches!(value, Value::Cell(_))
}

/// Read through a cell if `value` is one, otherwise return it unchanged
pub fn unwrap_cell(value: &Value) -> Value {
    match value {
        Value::Cell(cell) => cell.get(),
        other => other.clone(),
    }
}

/// Fire a cell's dependents with its current value, bypassing change
/// detection. The escape hatch for deep mutation behind a shallow cell.
pub fn trigger_cell(cell: &CellHandle) {
    cell.force_trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    use crate::effect::effect;
    use crate::reactive::is_reactive;

    #[test]
    fn test_cell_read_write() {
        let n = cell(1i64);
        assert_eq!(n.get(), Value::Int(1));
        n.set(2i64);
        assert_eq!(n.get(), Value::Int(2));
    }

    #[test]
    fn test_cell_of_cell_collapses() {
        let n = cell(1i64);
        let m = cell(Value::Cell(n.clone()));
        assert_eq!(n, m);
    }

    #[test]
    fn test_cell_tracks_and_triggers() {
        let n = cell(0i64);
        let runs = Rc::new(StdCell::new(0));
        let runs2 = Rc::clone(&runs);
        let n2 = n.clone();
        let _runner = effect(move || {
            n2.get();
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);
        n.set(1i64);
        assert_eq!(runs.get(), 2);
        // same-value-zero write is silent
        n.set(1i64);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_self_increment_terminates() {
        let n = cell(0i64);
        let n2 = n.clone();
        let _runner = effect(move || {
            let current = n2.get().as_int().unwrap();
            n2.set(current + 1);
        });
        // the running effect is excluded from its own trigger
        assert_eq!(n.get(), Value::Int(1));
        n.set(10i64);
        assert_eq!(n.get(), Value::Int(11));
    }

    #[test]
    fn test_deep_cell_wraps_containers() {
        let t = Target::obj_from([("x", 1i64)]);
        let c = cell(Value::Target(t.clone()));
        assert!(is_reactive(&c.get()));
        assert_eq!(to_raw(&c.get()), Value::Target(t.clone()));

        let sc = shallow_cell(Value::Target(t.clone()));
        assert_eq!(sc.get(), Value::Target(t));
    }

    #[test]
    fn test_shallow_cell_force_trigger() {
        let t = Target::obj_from([("x", 1i64)]);
        let sc = shallow_cell(Value::Target(t.clone()));
        let runs = Rc::new(StdCell::new(0));
        let runs2 = Rc::clone(&runs);
        let sc2 = sc.clone();
        let _runner = effect(move || {
            sc2.get();
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);
        // deep mutation is invisible to the shallow cell
        handlers::raw_set(&t, &Key::from("x"), Value::Int(2));
        assert_eq!(runs.get(), 1);
        trigger_cell(&sc);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_custom_cell_debounce_shape() {
        // a pass-through custom cell wired to its own dep
        let stored = Rc::new(RefCell::new(Value::Int(0)));
        let stored_get = Rc::clone(&stored);
        let stored_set = Rc::clone(&stored);
        let c = custom_cell(move |track, trigger| {
            (
                Box::new(move || {
                    track();
                    stored_get.borrow().clone()
                }),
                Box::new(move |v| {
                    *stored_set.borrow_mut() = v;
                    trigger();
                }),
            )
        });
        let runs = Rc::new(StdCell::new(0));
        let runs2 = Rc::clone(&runs);
        let c2 = c.clone();
        let _runner = effect(move || {
            c2.get();
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);
        c.set(5i64);
        assert_eq!(runs.get(), 2);
        assert_eq!(c.get(), Value::Int(5));
    }

    #[test]
    fn test_key_cell_forwards() {
        let o = reactive(Value::Target(Target::obj_from([("n", 1i64)])));
        let kc = to_cell(&o, "n");
        assert_eq!(kc.get(), Value::Int(1));
        kc.set(2i64);
        assert_eq!(o.as_reactive().unwrap().get("n"), Value::Int(2));

        // tracking flows through the source handlers
        let runs = Rc::new(StdCell::new(0));
        let runs2 = Rc::clone(&runs);
        let kc2 = kc.clone();
        let _runner = effect(move || {
            kc2.get();
            runs2.set(runs2.get() + 1);
        });
        o.as_reactive().unwrap().set("n", 3i64);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_to_cell_returns_existing_cell() {
        let inner = cell(1i64);
        let o = reactive(Value::Target(Target::obj_from([(
            "c",
            Value::Cell(inner.clone()),
        )])));
        assert_eq!(to_cell(&o, "c"), inner);
    }

    #[test]
    fn test_to_cells_expands_keys() {
        let o = reactive(Value::Target(Target::obj_from([("a", 1i64), ("b", 2i64)])));
        let cells = to_cells(&o);
        let cells = cells.as_target().unwrap();
        let a = handlers::raw_get(cells, &Key::from("a"));
        let a = a.as_cell().unwrap();
        assert_eq!(a.get(), Value::Int(1));
        a.set(10i64);
        assert_eq!(o.as_reactive().unwrap().get("a"), Value::Int(10));
    }

    #[test]
    fn test_cell_proxy_unwraps_and_forwards() {
        let n = cell(1i64);
        let record = Target::obj_from([("n", Value::Cell(n.clone())), ("plain", Value::Int(5i64))]);
        let proxy = cell_proxy(Value::Target(record));
        assert_eq!(proxy.get("n"), Value::Int(1));
        assert_eq!(proxy.get("plain"), Value::Int(5));
        // a non-cell write lands in the existing cell
        proxy.set("n", 2i64);
        assert_eq!(n.get(), Value::Int(2));
        // a plain slot is overwritten in place
        proxy.set("plain", 6i64);
        assert_eq!(proxy.get("plain"), Value::Int(6));
    }

    #[test]
    fn test_unwrap_helpers() {
        let n = cell(3i64);
        assert!(is_cell(&Value::Cell(n.clone())));
        assert_eq!(unwrap_cell(&Value::Cell(n)), Value::Int(3));
        assert_eq!(unwrap_cell(&Value::Int(4)), Value::Int(4));
    }
}
