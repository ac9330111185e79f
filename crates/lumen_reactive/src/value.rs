//! Dynamic value model for observed data
//!
//! The reactivity engine observes *targets* — reference-identified containers
//! holding dynamic [`Value`]s. A target is never observed directly; callers
//! wrap it through [`crate::reactive::reactive`] and friends, and the wrapper
//! talks to the engine on every access.
//!
//! Four container shapes exist:
//! - `Obj` — string/symbol-keyed record with insertion-ordered keys
//! - `Arr` — integer-indexed sequence with a `length` slot
//! - `Map` — keyed collection with arbitrary value keys
//! - `Set` — keyed collection of unique values
//!
//! # Equality
//!
//! [`Value`] equality is *same-value-zero*: `NaN` equals itself and `0.0`
//! equals `-0.0` on primitives, while containers, wrappers, and cells compare
//! by reference identity. This is exactly the change-detection relation the
//! engine needs: writing an identical value never triggers.

use std::cell::{Cell as StdCell, Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use indexmap::{IndexMap, IndexSet};

use crate::cell::CellHandle;
use crate::error::ValueError;
use crate::reactive::Reactive;

// ============================================================================
// Symbols
// ============================================================================

/// An identity-compared key token.
///
/// Two symbols are equal only if they are clones of the same allocation.
/// Built-in symbols (the well-known tokens a host embeds on every container)
/// are never tracked as dependencies.
#[derive(Clone)]
pub struct Symbol(Rc<SymbolInner>);

struct SymbolInner {
    name: Rc<str>,
    builtin: bool,
}

impl Symbol {
    /// Create a fresh user symbol
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Symbol(Rc::new(SymbolInner {
            name: name.into(),
            builtin: false,
        }))
    }

    /// Create a built-in symbol, which reads never track
    pub fn builtin(name: impl Into<Rc<str>>) -> Self {
        Symbol(Rc::new(SymbolInner {
            name: name.into(),
            builtin: true,
        }))
    }

    /// The symbol's description
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether this is a built-in (non-tracked) symbol
    pub fn is_builtin(&self) -> bool {
        self.0.builtin
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Rc::as_ptr(&self.0) as usize);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Meta-keys that reads never track
const NON_TRACKED_KEYS: &[&str] = &["__proto__", "__lumen_raw", "__lumen_skip"];

/// A slot address inside a target
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    /// A string property key
    Str(Rc<str>),
    /// An integer index into an array shape
    Index(usize),
    /// The array length slot
    Length,
    /// A symbol key
    Sym(Symbol),
    /// Sentinel addressed by key/value/entry enumeration
    Iterate,
    /// Sentinel addressed by key-only enumeration of a keyed collection
    MapIterate,
    /// An entry key inside a keyed collection
    Val(Value),
}

impl Key {
    /// Whether this key addresses an integer array index
    pub fn is_integer(&self) -> bool {
        matches!(self, Key::Index(_))
    }

    /// Whether a read of this key registers a dependency.
    ///
    /// Built-in symbols and a small block-list of meta-keys are exempt.
    pub(crate) fn is_trackable(&self) -> bool {
        match self {
            Key::Sym(s) => !s.is_builtin(),
            Key::Str(s) => !NON_TRACKED_KEYS.contains(&s.as_ref()),
            _ => true,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s}"),
            Key::Index(i) => write!(f, "{i}"),
            Key::Length => write!(f, "length"),
            Key::Sym(s) => write!(f, "{s:?}"),
            Key::Iterate => write!(f, "<iterate>"),
            Key::MapIterate => write!(f, "<map-iterate>"),
            Key::Val(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<Symbol> for Key {
    fn from(s: Symbol) -> Self {
        Key::Sym(s)
    }
}

// ============================================================================
// Targets
// ============================================================================

bitflags! {
    /// Per-target markers
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub(crate) struct TargetFlags: u8 {
        /// The target opted out of observation via `mark_raw`
        const SKIP = 1 << 0;
    }
}

/// Classification used by the observed-object factory
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetKind {
    /// Plain object or array — structural access
    Common,
    /// Keyed map or set — entry access
    Collection,
    /// Not observable (opted out)
    Invalid,
}

/// The stored form of a target
pub(crate) enum Shape {
    /// Insertion-ordered record
    Obj(IndexMap<Key, Value>),
    /// Integer-indexed sequence
    Arr(Vec<Value>),
    /// Keyed collection with value keys
    Map(IndexMap<Value, Value>),
    /// Keyed collection of unique values
    Set(IndexSet<Value>),
}

pub(crate) struct TargetInner {
    shape: RefCell<Shape>,
    flags: StdCell<TargetFlags>,
}

/// A reference-identified data container.
///
/// Cloning a `Target` clones the handle, not the data; two clones compare
/// equal and observe the same slots.
#[derive(Clone)]
pub struct Target(Rc<TargetInner>);

impl Target {
    fn from_shape(shape: Shape) -> Self {
        Target(Rc::new(TargetInner {
            shape: RefCell::new(shape),
            flags: StdCell::new(TargetFlags::empty()),
        }))
    }

    /// Create an empty record target
    pub fn obj() -> Self {
        Target::from_shape(Shape::Obj(IndexMap::new()))
    }

    /// Create a record target from key/value entries
    pub fn obj_from<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Target::from_shape(Shape::Obj(map))
    }

    /// Create an empty array target
    pub fn arr() -> Self {
        Target::from_shape(Shape::Arr(Vec::new()))
    }

    /// Create an array target from items
    pub fn arr_from<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Target::from_shape(Shape::Arr(items.into_iter().map(Into::into).collect()))
    }

    /// Create an empty keyed map target
    pub fn map() -> Self {
        Target::from_shape(Shape::Map(IndexMap::new()))
    }

    /// Create an empty keyed set target
    pub fn set() -> Self {
        Target::from_shape(Shape::Set(IndexSet::new()))
    }

    /// Classify this target for the observed-object factory
    pub fn kind(&self) -> TargetKind {
        if self.0.flags.get().contains(TargetFlags::SKIP) {
            return TargetKind::Invalid;
        }
        match &*self.shape() {
            Shape::Obj(_) | Shape::Arr(_) => TargetKind::Common,
            Shape::Map(_) | Shape::Set(_) => TargetKind::Collection,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(&*self.shape(), Shape::Obj(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.shape(), Shape::Arr(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(&*self.shape(), Shape::Map(_))
    }

    pub fn is_set(&self) -> bool {
        matches!(&*self.shape(), Shape::Set(_))
    }

    pub fn is_collection(&self) -> bool {
        matches!(&*self.shape(), Shape::Map(_) | Shape::Set(_))
    }

    /// Whether the target opted out of observation
    pub fn is_skipped(&self) -> bool {
        self.0.flags.get().contains(TargetFlags::SKIP)
    }

    pub(crate) fn set_skip(&self) {
        self.0.flags.set(self.0.flags.get() | TargetFlags::SKIP);
    }

    pub(crate) fn shape(&self) -> Ref<'_, Shape> {
        self.0.shape.borrow()
    }

    pub(crate) fn shape_mut(&self) -> RefMut<'_, Shape> {
        self.0.shape.borrow_mut()
    }

    /// Stable address used to key the dependency registry
    pub(crate) fn ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<TargetInner> {
        Rc::downgrade(&self.0)
    }

    /// Shallow copy of the current shape, used for debug trigger events
    pub(crate) fn snapshot(&self) -> Target {
        let shape = match &*self.shape() {
            Shape::Obj(m) => Shape::Obj(m.clone()),
            Shape::Arr(v) => Shape::Arr(v.clone()),
            Shape::Map(m) => Shape::Map(m.clone()),
            Shape::Set(s) => Shape::Set(s.clone()),
        };
        Target::from_shape(shape)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.ptr());
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.shape() {
            Shape::Obj(m) => format!("Obj[{}]", m.len()),
            Shape::Arr(v) => format!("Arr[{}]", v.len()),
            Shape::Map(m) => format!("Map[{}]", m.len()),
            Shape::Set(s) => format!("Set[{}]", s.len()),
        };
        write!(f, "Target({kind}@{:x})", self.ptr())
    }
}

// ============================================================================
// Values
// ============================================================================

/// A dynamic value stored in (or read out of) an observed container
#[derive(Clone)]
pub enum Value {
    /// Absent value: missing slots, void returns
    Unit,
    /// Explicit null
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A raw (unobserved) container
    Target(Target),
    /// An observed wrapper over a container
    Reactive(Reactive),
    /// An atomic observed cell
    Cell(CellHandle),
}

impl Value {
    /// Variant name, used in warnings and conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Target(_) => "target",
            Value::Reactive(_) => "reactive",
            Value::Cell(_) => "cell",
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Value::Target(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&CellHandle> {
        match self {
            Value::Cell(c) => Some(c),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

/// Same-value-zero equality: `NaN` equals itself, `0.0` equals `-0.0`,
/// containers compare by identity.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Unit, Value::Unit) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => (x.is_nan() && y.is_nan()) || x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Target(x), Value::Target(y)) => x == y,
        (Value::Reactive(x), Value::Reactive(y)) => x == y,
        (Value::Cell(x), Value::Cell(y)) => x == y,
        _ => false,
    }
}

/// Change detection for writes
pub(crate) fn has_changed(new: &Value, old: &Value) -> bool {
    !same_value_zero(new, old)
}

/// Strict equality: same-value-zero minus the `NaN` exception.
/// Positional search uses this; membership search uses same-value-zero.
pub(crate) fn strict_equals(a: &Value, b: &Value) -> bool {
    if matches!(a, Value::Float(v) if v.is_nan()) {
        return false;
    }
    same_value_zero(a, b)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        same_value_zero(self, other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Unit | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(v) => {
                // canonicalize so the hash agrees with same-value-zero
                let bits = if v.is_nan() {
                    f64::NAN.to_bits()
                } else if *v == 0.0 {
                    0u64
                } else {
                    v.to_bits()
                };
                bits.hash(state);
            }
            Value::Str(s) => s.hash(state),
            Value::Target(t) => t.hash(state),
            Value::Reactive(r) => r.hash(state),
            Value::Cell(c) => c.hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Target(t) => t.fmt(f),
            Value::Reactive(r) => r.fmt(f),
            Value::Cell(c) => c.fmt(f),
        }
    }
}

// ── conversions in ──────────────────────────────────────────────────────────

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<Target> for Value {
    fn from(t: Target) -> Self {
        Value::Target(t)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<CellHandle> for Value {
    fn from(c: CellHandle) -> Self {
        Value::Cell(c)
    }
}

// ── conversions out ─────────────────────────────────────────────────────────

macro_rules! try_from_value {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl TryFrom<Value> for $ty {
            type Error = ValueError;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(ValueError::TypeMismatch {
                        expected: $expected,
                        found: other.type_name(),
                    }),
                }
            }
        }
    };
}

try_from_value!(bool, Bool, "bool");
try_from_value!(i64, Int, "int");
try_from_value!(f64, Float, "float");
try_from_value!(Rc<str>, Str, "str");
try_from_value!(Target, Target, "target");
try_from_value!(Reactive, Reactive, "reactive");
try_from_value!(CellHandle, Cell, "cell");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_value_zero_semantics() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_ne!(Value::Unit, Value::Null);
    }

    #[test]
    fn test_target_identity() {
        let a = Target::obj();
        let b = Target::obj();
        assert_ne!(Value::Target(a.clone()), Value::Target(b));
        assert_eq!(Value::Target(a.clone()), Value::Target(a));
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        let mut set = IndexSet::new();
        set.insert(Value::Float(f64::NAN));
        assert!(!set.insert(Value::Float(f64::NAN)));
        set.insert(Value::Float(0.0));
        assert!(!set.insert(Value::Float(-0.0)));
    }

    #[test]
    fn test_symbol_identity() {
        let a = Symbol::new("tag");
        let b = Symbol::new("tag");
        assert_ne!(Key::Sym(a.clone()), Key::Sym(b));
        assert_eq!(Key::Sym(a.clone()), Key::Sym(a.clone()));
        assert!(Key::Sym(a).is_trackable());
    }

    #[test]
    fn test_builtin_symbols_and_meta_keys_not_trackable() {
        assert!(!Key::Sym(Symbol::builtin("iterator")).is_trackable());
        assert!(!Key::from("__proto__").is_trackable());
        assert!(Key::from("name").is_trackable());
        assert!(Key::Length.is_trackable());
    }

    #[test]
    fn test_builders() {
        let o = Target::obj_from([("a", 1i64), ("b", 2i64)]);
        assert!(o.is_object());
        assert_eq!(o.kind(), TargetKind::Common);

        let a = Target::arr_from([1i64, 2, 3]);
        assert!(a.is_array());

        let m = Target::map();
        assert_eq!(m.kind(), TargetKind::Collection);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(i64::try_from(Value::Int(3)), Ok(3));
        assert!(matches!(
            bool::try_from(Value::Int(3)),
            Err(ValueError::TypeMismatch { .. })
        ));
    }
}
