#![forbid(unsafe_code)]

//! Bindings: closures that compute a property's value from other properties.
//!
//! A [`PropertyBinding<T>`] wraps a closure. Once installed on a
//! [`Property<T>`](crate::Property) it is evaluated, and every property read
//! during that evaluation becomes a dependency. When any dependency changes
//! the binding is marked dirty and re-evaluated on the next read (or right
//! away for eager properties).
//!
//! # Usage
//!
//! ```
//! use ftui_property::{Property, binding};
//!
//! let width = Property::new(4);
//! let height = Property::new(3);
//! let area = Property::new(0);
//! area.set_binding(binding!([width, height] width.value() * height.value()));
//! assert_eq!(area.value(), 12);
//!
//! width.set_value(5);
//! assert_eq!(area.value(), 15);
//! ```
//!
//! # State machine
//!
//! ```text
//!  Clean --dependency changed--> Dirty --read/flush--> Evaluating --> Clean
//!                                                          |
//!                                                          +--> Error (value kept)
//! ```
//!
//! # Invariants
//!
//! 1. After an evaluation the dependency set is exactly the set of properties
//!    read during that evaluation.
//! 2. A binding re-entered while evaluating reports
//!    [`BindingErrorKind::BindingLoop`](crate::BindingErrorKind::BindingLoop)
//!    and never recurses.
//! 3. A binding that is not installed holds no dependency links.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::panic::Location;
use std::rc::{Rc, Weak};

use crate::binding_data::{PropertyNode, weak_node_addr};
use crate::error::{BindingError, BindingErrorKind};
use crate::observer::ObserverNode;
use crate::property::ValueSlot;
use crate::status::{self, EvaluationGuard};

/// Type-erased binding body: computes, writes into the target's value slot,
/// and returns whether the stored value changed.
pub(crate) type BindingFunction = Box<dyn Fn(&dyn Any) -> bool>;

/// Runtime identity of a property value type.
///
/// Two `ValueType`s are equal when they describe the same Rust type.
#[derive(Clone, Copy)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    /// The value type of `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Whether this is the value type of `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Human-readable type name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

impl Hash for ValueType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One edge from a property this binding read to the binding.
struct DependencyLink {
    source: Weak<dyn PropertyNode>,
    addr: usize,
    observer: Rc<ObserverNode>,
}

/// Shared state of one binding, independent of its value type.
pub(crate) struct BindingPrivate {
    function: BindingFunction,
    value_type: ValueType,
    location: &'static Location<'static>,
    dependencies: RefCell<Vec<DependencyLink>>,
    error: RefCell<BindingError>,
    dirty: Cell<bool>,
    evaluating: Cell<bool>,
    sticky: Cell<bool>,
    target: RefCell<Option<Weak<dyn PropertyNode>>>,
}

impl BindingPrivate {
    fn new(
        function: BindingFunction,
        value_type: ValueType,
        location: &'static Location<'static>,
    ) -> Rc<Self> {
        Rc::new(Self {
            function,
            value_type,
            location,
            dependencies: RefCell::new(Vec::new()),
            error: RefCell::new(BindingError::default()),
            dirty: Cell::new(false),
            evaluating: Cell::new(false),
            sticky: Cell::new(false),
            target: RefCell::new(None),
        })
    }

    pub(crate) fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    pub(crate) fn is_evaluating(&self) -> bool {
        self.evaluating.get()
    }

    pub(crate) fn set_evaluating(&self, evaluating: bool) {
        self.evaluating.set(evaluating);
    }

    pub(crate) fn is_sticky(&self) -> bool {
        self.sticky.get()
    }

    /// The property this binding is installed on, if it is still alive.
    pub(crate) fn target(&self) -> Option<Rc<dyn PropertyNode>> {
        self.target.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn is_installed(&self) -> bool {
        self.target().is_some()
    }

    pub(crate) fn attach(&self, target: Weak<dyn PropertyNode>) {
        *self.target.borrow_mut() = Some(target);
    }

    /// Forget the target and unlink every dependency.
    pub(crate) fn detach(&self) {
        self.target.borrow_mut().take();
        self.dirty.set(false);
        self.unlink_all();
    }

    fn unlink_all(&self) {
        let links = std::mem::take(&mut *self.dependencies.borrow_mut());
        for link in links {
            link.observer.deactivate();
        }
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies
            .borrow()
            .iter()
            .filter(|link| link.source.strong_count() > 0)
            .count()
    }

    /// Record a binding loop on this binding.
    ///
    /// If the binding is mid-evaluation, that evaluation's result is
    /// discarded and the previous value stays.
    pub(crate) fn report_loop(&self, description: &'static str) {
        tracing::warn!(
            location = %self.location,
            value_type = self.value_type.name,
            "{description}"
        );
        let error = BindingError::binding_loop(description);
        if self.evaluating.get() {
            status::fail_evaluation_of(self, error.clone());
        }
        *self.error.borrow_mut() = error;
    }

    pub(crate) fn error(&self) -> BindingError {
        self.error.borrow().clone()
    }

    pub(crate) fn has_loop_error(&self) -> bool {
        self.error.borrow().kind() == BindingErrorKind::BindingLoop
    }

    /// Run the binding function against its target and return whether the
    /// target's value changed.
    pub(crate) fn evaluate(self: &Rc<Self>) -> bool {
        if self.evaluating.get() {
            self.report_loop("Binding loop detected");
            return false;
        }
        self.dirty.set(false);
        let Some(target) = self.target() else {
            return false;
        };
        *self.error.borrow_mut() = BindingError::default();

        tracing::trace!(
            location = %self.location,
            value_type = self.value_type.name,
            "evaluating binding"
        );
        let guard = EvaluationGuard::enter(self);
        let changed = (self.function)(target.value_slot());
        let outcome = guard.finish();

        self.rebuild_dependencies(outcome.captured);
        if let Some(error) = outcome.error {
            *self.error.borrow_mut() = error;
        }

        if changed {
            let data = target.binding_data();
            if data.is_enrolled() {
                data.set_pending_change();
            }
            target.binding_wrote_value();
        }
        changed
    }

    /// Make the dependency set exactly `captured`, reusing surviving links.
    fn rebuild_dependencies(self: &Rc<Self>, captured: Vec<Weak<dyn PropertyNode>>) {
        if !self.is_installed() {
            self.unlink_all();
            return;
        }
        let mut stale = std::mem::take(&mut *self.dependencies.borrow_mut());
        let mut links = Vec::with_capacity(captured.len());
        for source in captured {
            let addr = weak_node_addr(&source);
            // A live `Weak` pins its allocation, so equal addresses are the
            // same property.
            if let Some(pos) = stale.iter().position(|link| link.addr == addr) {
                links.push(stale.swap_remove(pos));
                continue;
            }
            let Some(node) = source.upgrade() else {
                continue;
            };
            let observer = ObserverNode::dependency(Rc::downgrade(self));
            node.binding_data().add_observer(Rc::clone(&observer));
            links.push(DependencyLink {
                source,
                addr,
                observer,
            });
        }
        for link in stale {
            link.observer.deactivate();
        }
        *self.dependencies.borrow_mut() = links;
    }
}

impl Drop for BindingPrivate {
    fn drop(&mut self) {
        for link in self.dependencies.get_mut().drain(..) {
            link.observer.deactivate();
        }
    }
}

/// A type-erased binding handle.
///
/// Carries the [`ValueType`] of the property it computes, so it can be
/// installed through [`UntypedBindable`](crate::UntypedBindable) with a
/// runtime type check. Clones share the same binding.
#[derive(Clone)]
pub struct UntypedPropertyBinding {
    inner: Rc<BindingPrivate>,
}

impl UntypedPropertyBinding {
    pub(crate) fn from_private(inner: Rc<BindingPrivate>) -> Self {
        Self { inner }
    }

    pub(crate) fn private(&self) -> &Rc<BindingPrivate> {
        &self.inner
    }

    /// The value type this binding produces.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.inner.value_type()
    }

    /// Error state after the most recent evaluation.
    #[must_use]
    pub fn error(&self) -> BindingError {
        self.inner.error()
    }

    /// Where the binding was created.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.inner.location
    }

    /// Whether the binding survives [`Property::set_value`](crate::Property::set_value).
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.inner.is_sticky()
    }

    /// Make the binding survive (or not) direct writes to its property.
    pub fn set_sticky(&self, sticky: bool) {
        self.inner.sticky.set(sticky);
    }

    /// Whether the binding is installed on a live property.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.inner.is_installed()
    }

    /// Whether a dependency changed since the last evaluation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// Number of live properties read during the last evaluation.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count()
    }

    /// Whether both handles refer to the same binding.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Recover the typed binding, or give `self` back if `T` does not match.
    pub fn downcast<T: 'static>(self) -> Result<PropertyBinding<T>, Self> {
        if self.value_type().is::<T>() {
            Ok(PropertyBinding {
                untyped: self,
                _marker: PhantomData,
            })
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for UntypedPropertyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UntypedPropertyBinding")
            .field("value_type", &self.inner.value_type)
            .field("location", &format_args!("{}", self.inner.location))
            .field("installed", &self.is_installed())
            .field("dirty", &self.is_dirty())
            .field("error", &self.inner.error.borrow().kind())
            .finish()
    }
}

/// A binding producing values of type `T`.
///
/// Cloning yields another handle to the same binding, not a copy.
pub struct PropertyBinding<T> {
    untyped: UntypedPropertyBinding,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> PropertyBinding<T> {
    /// Create a binding from a closure.
    ///
    /// The closure must be side-effect free apart from reading properties:
    /// it may run at any time, any number of times.
    #[track_caller]
    pub fn new(f: impl Fn() -> T + 'static) -> Self {
        let location = Location::caller();
        let function: BindingFunction = Box::new(move |slot: &dyn Any| {
            let value = f();
            if status::evaluation_failed() {
                return false;
            }
            slot.downcast_ref::<ValueSlot<T>>()
                .is_some_and(|slot| slot.replace(value))
        });
        Self {
            untyped: UntypedPropertyBinding::from_private(BindingPrivate::new(
                function,
                ValueType::of::<T>(),
                location,
            )),
            _marker: PhantomData,
        }
    }

    /// Error state after the most recent evaluation.
    #[must_use]
    pub fn error(&self) -> BindingError {
        self.untyped.error()
    }

    /// Where the binding was created.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.untyped.location()
    }

    /// Whether the binding survives [`Property::set_value`](crate::Property::set_value).
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.untyped.is_sticky()
    }

    /// Make the binding survive (or not) direct writes to its property.
    pub fn set_sticky(&self, sticky: bool) {
        self.untyped.set_sticky(sticky);
    }

    /// Builder form of [`set_sticky`](Self::set_sticky).
    #[must_use]
    pub fn sticky(self) -> Self {
        self.set_sticky(true);
        self
    }

    /// Whether the binding is installed on a live property.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.untyped.is_installed()
    }

    /// Whether a dependency changed since the last evaluation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.untyped.is_dirty()
    }

    /// Number of live properties read during the last evaluation.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.untyped.dependency_count()
    }

    /// Whether both handles refer to the same binding.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.untyped.ptr_eq(&other.untyped)
    }

    /// The value type this binding produces.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.untyped.value_type()
    }

    /// Erase the value type.
    #[must_use]
    pub fn into_untyped(self) -> UntypedPropertyBinding {
        self.untyped
    }

    pub(crate) fn private(&self) -> &Rc<BindingPrivate> {
        self.untyped.private()
    }

    pub(crate) fn from_private(inner: Rc<BindingPrivate>) -> Self {
        Self {
            untyped: UntypedPropertyBinding::from_private(inner),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for PropertyBinding<T> {
    fn clone(&self) -> Self {
        Self {
            untyped: self.untyped.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for PropertyBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyBinding").field(&self.untyped).finish()
    }
}

impl<T: 'static> From<PropertyBinding<T>> for UntypedPropertyBinding {
    fn from(binding: PropertyBinding<T>) -> Self {
        binding.into_untyped()
    }
}

/// Create a [`PropertyBinding`] from an expression.
///
/// Handles listed in brackets are cloned into the closure, so the originals
/// stay usable.
///
/// # Examples
///
/// ```
/// use ftui_property::{Property, binding};
///
/// let a = Property::new(1);
/// let b = Property::new(2);
/// let sum = Property::new(0);
/// sum.set_binding(binding!([a, b] a.value() + b.value()));
/// assert_eq!(sum.value(), 3);
///
/// let constant = Property::new(0);
/// constant.set_binding(binding!(7));
/// assert_eq!(constant.value(), 7);
/// ```
#[macro_export]
macro_rules! binding {
    ([$($dep:ident),* $(,)?] $body:expr) => {{
        $(let $dep = ::std::clone::Clone::clone(&$dep);)*
        $crate::PropertyBinding::new(move || $body)
    }};
    ($body:expr) => {
        $crate::PropertyBinding::new(move || $body)
    };
}
