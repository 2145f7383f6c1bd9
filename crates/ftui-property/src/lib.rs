#![forbid(unsafe_code)]

//! Dependency-tracking property bindings for FrankenTUI.
//!
//! This crate provides:
//!
//! - [`Property`]: a shared value that is either set directly or computed by a
//!   binding.
//! - [`PropertyBinding`]: a closure whose property reads are recorded as
//!   dependencies while it runs. The [`binding!`] macro builds one.
//! - [`PropertyChangeHandler`] / [`PropertyNotifier`]: RAII tokens for change
//!   callbacks, collected per owner by [`ObserverScope`].
//! - [`PropertyUpdateGroup`]: RAII guard deferring notifications until a batch
//!   of writes is complete.
//! - [`ComputedProperty`], [`PropertyAdaptor`]: bring state that lives outside
//!   the engine (getters, host setters) into the dependency graph.
//! - [`UntypedBindable`], [`BindingStorage`]: type-erased, runtime-checked
//!   access for generic code.
//!
//! # Architecture
//!
//! Properties live behind `Rc`; handles are cheap to clone and never move the
//! data observers point at. Each property keeps a registration-ordered list
//! of observers: dependency links to bindings, handlers and notifiers.
//!
//! A thread-local status records the binding currently evaluating. Reading a
//! property during an evaluation links it to that binding. When a property
//! changes, every binding reachable from it is marked dirty and only the
//! properties someone listens to (or eager ones) are flushed. Everything else
//! is re-evaluated lazily on the next read, which keeps diamond-shaped graphs
//! glitch-free.
//!
//! # Invariants
//!
//! 1. After evaluation a binding depends on exactly the properties it read.
//! 2. Reads never return stale values. A binding stopped by a loop keeps its
//!    last value until an outside change breaks the cycle.
//! 3. Each logical change notifies each handler at most once, in registration
//!    order, after the graph is consistent.
//! 4. Binding loops are reported as [`BindingErrorKind::BindingLoop`], never
//!    recursed into, whether found by re-entry or by a change that comes back
//!    around to its own origin.
//! 5. Dropping properties, bindings or tokens at any point (including inside
//!    a callback) is memory-safe.
//! 6. Engine state is per thread; properties are `!Send`.

pub mod adaptor;
pub mod bindable;
pub mod binding;
mod binding_data;
pub mod computed;
pub mod error;
pub mod group;
pub mod handler;
mod observer;
pub mod property;
pub mod status;
pub mod storage;

pub use adaptor::PropertyAdaptor;
pub use bindable::UntypedBindable;
pub use binding::{PropertyBinding, UntypedPropertyBinding, ValueType};
pub use computed::ComputedProperty;
pub use error::{BindingError, BindingErrorKind};
pub use group::{
    PropertyUpdateGroup, begin_property_update_group, end_property_update_group,
    is_update_group_open, update_group, update_group_depth,
};
pub use handler::{ObserverScope, PropertyChangeHandler, PropertyNotifier};
pub use property::{Property, WeakProperty};
pub use status::{currently_evaluating_binding, is_any_binding_evaluating, report_binding_error};
pub use storage::{BindingStorage, StoredProperty};
