//! Lumen Reactive Core
//!
//! Fine-grained reactivity for the Lumen UI framework: this crate turns
//! ordinary data containers into *observed* data, records which computations
//! read which slots, and re-runs the affected computations when those slots
//! change.
//!
//! - **Observed wrappers**: [`reactive`], [`shallow_reactive`], [`readonly`],
//!   [`shallow_readonly`] over structural and collection targets
//! - **Effects**: [`effect`] computations with dynamic dependency
//!   re-tracking, nesting, schedulers, and stop
//! - **Atomic cells**: [`cell`], [`shallow_cell`], [`custom_cell`],
//!   forwarding cells via [`to_cell`] / [`to_cells`]
//! - **Derivations**: [`computed`] lazy memoized cells
//! - **Scopes**: [`effect_scope`] for bulk teardown
//!
//! # Example
//!
//! ```ignore
//! use lumen_reactive::{cell, computed, effect, Value};
//!
//! let count = cell(1i64);
//!
//! let count2 = count.clone();
//! let doubled = computed(move || {
//!     Value::Int(count2.get().as_int().unwrap() * 2)
//! });
//!
//! let doubled2 = doubled.clone();
//! effect(move || {
//!     println!("doubled is {:?}", doubled2.get());
//! });
//!
//! count.set(5i64); // prints "doubled is 10"
//! ```
//!
//! The engine is single-threaded and cooperative: all engine state is
//! thread-local, and one engine instance lives per thread. Effects run to
//! completion synchronously; integrators batch or defer by supplying a
//! scheduler.

pub mod cell;
mod collections;
pub mod computed;
pub mod debug;
mod dep;
pub mod effect;
pub mod error;
mod handlers;
pub mod operations;
pub mod reactive;
pub mod scope;
pub mod tracking;
pub mod value;


pub use cell::{
    cell, cell_proxy, custom_cell, is_cell, shallow_cell, to_cell, to_cells, trigger_cell,
    unwrap_cell, CellAccessors, CellHandle, CellLike, CellProxy,
};
pub use computed::{computed, computed_with};
pub use debug::{TrackEvent, TrackHook, TriggerEvent, TriggerHook};
pub use effect::{effect, effect_with, stop, EffectOptions, EffectRunner, ReactiveEffect};
pub use error::{Result, ValueError};
pub use operations::{TrackOpKind, TriggerOpKind};
pub use reactive::{
    is_proxy, is_reactive, is_readonly, mark_raw, reactive, readonly, shallow_reactive,
    shallow_readonly, to_raw, Reactive,
};
pub use scope::{effect_scope, on_scope_dispose, EffectScope};
pub use tracking::{enable_tracking, pause_tracking, reset_tracking, track, trigger};
pub use value::{same_value_zero, Key, Symbol, Target, TargetKind, Value};
