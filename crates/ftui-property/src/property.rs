#![forbid(unsafe_code)]

//! [`Property<T>`]: a value that can be set directly or computed by a binding.
//!
//! # Usage
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use ftui_property::{Property, binding};
//!
//! let celsius = Property::new(20.0_f64);
//! let fahrenheit = Property::new(0.0_f64);
//! fahrenheit.set_binding(binding!([celsius] celsius.value() * 9.0 / 5.0 + 32.0));
//!
//! let seen = Rc::new(Cell::new(0.0));
//! let s = Rc::clone(&seen);
//! let _handler = fahrenheit.on_value_changed(move |f| s.set(*f));
//!
//! celsius.set_value(100.0);
//! assert_eq!(seen.get(), 212.0);
//! ```
//!
//! # Invariants
//!
//! 1. A property has either no binding or exactly one.
//! 2. `value()` never returns a stale result: a dirty binding is evaluated
//!    first.
//! 3. Writing a value equal to the current one notifies nobody. Properties
//!    created with [`Property::new_incomparable`] treat every write as a
//!    change.
//! 4. Handlers fire in registration order, once per notified change.
//!
//! # Failure Modes
//!
//! - Binding loop: reported on the binding, the property keeps its value.
//! - Handler panic: propagates to whoever triggered the notification.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::binding::PropertyBinding;
use crate::binding_data::{self, BindingData, InstallRejected, PropertyNode};
use crate::handler::{PropertyChangeHandler, PropertyNotifier};
use crate::observer::ObserverNode;
use crate::status;

/// Value storage shared by properties and adaptors.
pub(crate) struct ValueSlot<T> {
    value: RefCell<T>,
    equal: Option<fn(&T, &T) -> bool>,
}

impl<T> ValueSlot<T> {
    pub(crate) fn comparable(value: T) -> Self
    where
        T: PartialEq,
    {
        Self {
            value: RefCell::new(value),
            equal: Some(<T as PartialEq>::eq),
        }
    }

    pub(crate) fn incomparable(value: T) -> Self {
        Self {
            value: RefCell::new(value),
            equal: None,
        }
    }

    /// Store `value`, returning whether this counts as a change.
    pub(crate) fn replace(&self, value: T) -> bool {
        let Ok(mut current) = self.value.try_borrow_mut() else {
            tracing::warn!(
                value_type = std::any::type_name::<T>(),
                "property written while its value is borrowed; write dropped"
            );
            return false;
        };
        let changed = self.equal.is_none_or(|eq| !eq(&current, &value));
        if changed {
            *current = value;
        }
        changed
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    pub(crate) fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }
}

pub(crate) struct PropertyCell<T> {
    data: BindingData,
    slot: ValueSlot<T>,
}

impl<T: 'static> PropertyNode for PropertyCell<T> {
    fn binding_data(&self) -> &BindingData {
        &self.data
    }

    fn value_slot(&self) -> &dyn Any {
        &self.slot
    }
}

/// A shared, bindable value.
///
/// Cloning a `Property` yields another handle to the same property. The
/// property lives until its last handle drops. Properties are `!Send`: each
/// graph belongs to the thread that created it.
pub struct Property<T> {
    cell: Rc<PropertyCell<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: PartialEq + 'static> Property<T> {
    /// Create a property holding `value`. Writes of an equal value are
    /// ignored.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_slot(ValueSlot::comparable(value))
    }
}

impl<T: PartialEq + Default + 'static> Property<T> {
    /// Create a property computed by `binding`.
    #[must_use]
    pub fn with_binding(binding: PropertyBinding<T>) -> Self {
        let property = Self::new(T::default());
        property.set_binding(binding);
        property
    }

    /// Create a property computed by `f`.
    #[must_use]
    #[track_caller]
    pub fn from_fn(f: impl Fn() -> T + 'static) -> Self {
        Self::with_binding(PropertyBinding::new(f))
    }
}

impl<T: 'static> Property<T> {
    /// Create a property for a type without meaningful equality. Every write
    /// and every evaluation of its binding notifies observers.
    #[must_use]
    pub fn new_incomparable(value: T) -> Self {
        Self::from_slot(ValueSlot::incomparable(value))
    }

    fn from_slot(slot: ValueSlot<T>) -> Self {
        Self {
            cell: Rc::new(PropertyCell {
                data: BindingData::default(),
                slot,
            }),
        }
    }

    pub(crate) fn node(&self) -> Rc<dyn PropertyNode> {
        self.cell.clone()
    }

    /// Borrow the current value, bringing the binding up to date first.
    ///
    /// Inside a binding evaluation the read is recorded as a dependency.
    /// `f` must not write to this property.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let node = self.node();
        binding_data::evaluate_if_dirty(&node);
        status::capture_dependency(&node);
        self.cell.slot.with(f)
    }

    /// Read the stored value without evaluating the binding or recording a
    /// dependency.
    pub fn with_bypassing_bindings<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.slot.with(f)
    }

    /// Store `value`, removing a non-sticky binding. Observers are notified
    /// if the value changed.
    pub fn set_value(&self, value: T) {
        let node = self.node();
        binding_data::release_for_write(&node);
        if self.cell.slot.replace(value) {
            binding_data::notify_observers(&node);
        }
    }

    /// Store `value` without touching the binding and without notifying.
    ///
    /// Returns whether the value changed. Pair with [`notify`](Self::notify)
    /// to announce a batch of silent writes.
    pub fn set_value_bypassing_bindings(&self, value: T) -> bool {
        self.cell.slot.replace(value)
    }

    /// Notify observers as if the value changed.
    pub fn notify(&self) {
        binding_data::notify_observers(&self.node());
    }

    /// Install `binding`, returning the binding it replaced.
    ///
    /// The binding is evaluated immediately. Installing while the current
    /// binding is evaluating is rejected: the current binding reports a
    /// binding loop and `None` is returned.
    pub fn set_binding(&self, binding: PropertyBinding<T>) -> Option<PropertyBinding<T>> {
        self.try_set_binding(binding).ok().flatten()
    }

    pub(crate) fn try_set_binding(
        &self,
        binding: PropertyBinding<T>,
    ) -> Result<Option<PropertyBinding<T>>, InstallRejected> {
        let old = binding_data::install_binding(&self.node(), Rc::clone(binding.private()))?;
        Ok(old.map(PropertyBinding::from_private))
    }

    /// Install a binding computed by `f`.
    #[track_caller]
    pub fn set_binding_fn(&self, f: impl Fn() -> T + 'static) -> Option<PropertyBinding<T>> {
        self.set_binding(PropertyBinding::new(f))
    }

    /// Whether a binding is installed.
    #[must_use]
    pub fn has_binding(&self) -> bool {
        self.cell.data.has_binding()
    }

    /// The installed binding.
    #[must_use]
    pub fn binding(&self) -> Option<PropertyBinding<T>> {
        self.cell.data.binding().map(PropertyBinding::from_private)
    }

    /// Remove the binding and return it. The property keeps the last value
    /// the binding produced.
    pub fn take_binding(&self) -> Option<PropertyBinding<T>> {
        binding_data::take_binding(&self.node()).map(PropertyBinding::from_private)
    }

    /// Eager properties re-evaluate their binding during notification instead
    /// of on the next read.
    pub fn set_eager(&self, eager: bool) {
        binding_data::set_eager(&self.node(), eager);
    }

    /// Whether the property is eager.
    #[must_use]
    pub fn is_eager(&self) -> bool {
        self.cell.data.is_eager()
    }

    /// Register a handler invoked with the new value after every notified
    /// change. Dropping the returned token unregisters it.
    #[must_use = "the handler is unregistered when the token drops"]
    pub fn on_value_changed(&self, f: impl Fn(&T) + 'static) -> PropertyChangeHandler
    where
        T: Clone,
    {
        let weak = self.downgrade();
        let callback: Rc<dyn Fn()> = Rc::new(move || {
            // Clone out so the handler may write to the property.
            let Some(value) = weak.upgrade().map(|p| p.value_untracked()) else {
                return;
            };
            f(&value);
        });
        let node = ObserverNode::change_handler(callback);
        self.cell.data.add_observer(Rc::clone(&node));
        PropertyChangeHandler::new(node)
    }

    /// Like [`on_value_changed`](Self::on_value_changed), but also invokes
    /// `f` with the current value right away.
    #[must_use = "the handler is unregistered when the token drops"]
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> PropertyChangeHandler
    where
        T: Clone,
    {
        f(&self.value_untracked());
        self.on_value_changed(f)
    }

    /// Register a callback that is told "something changed" without the
    /// value.
    #[must_use = "the notifier is unregistered when the token drops"]
    pub fn add_notifier(&self, f: impl Fn() + 'static) -> PropertyNotifier {
        let node = ObserverNode::notifier(Rc::new(f));
        self.cell.data.add_observer(Rc::clone(&node));
        PropertyNotifier::new(node)
    }

    /// Emit `signal` after the handlers of every notified change.
    ///
    /// Stands in for a host object's change signal. Replaces any previously
    /// connected signal.
    pub fn connect_signal(&self, signal: impl Fn() + 'static) {
        self.cell.data.set_signal(Some(Rc::new(signal)));
    }

    /// Remove the signal set by [`connect_signal`](Self::connect_signal).
    pub fn disconnect_signal(&self) {
        self.cell.data.set_signal(None);
    }

    /// Number of live observers: dependent bindings, handlers and notifiers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.cell.data.observer_count()
    }

    /// A non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakProperty<T> {
        WeakProperty {
            cell: Rc::downgrade(&self.cell),
        }
    }

    /// Whether both handles refer to the same property.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Up-to-date value, without recording a dependency.
    fn value_untracked(&self) -> T
    where
        T: Clone,
    {
        binding_data::evaluate_if_dirty(&self.node());
        self.cell.slot.get()
    }
}

impl<T: Clone + 'static> Property<T> {
    /// The current value, evaluating the binding first if needed.
    ///
    /// Inside a binding evaluation the read is recorded as a dependency.
    #[must_use]
    pub fn value(&self) -> T {
        self.with(T::clone)
    }

    /// The stored value, without evaluating the binding or recording a
    /// dependency.
    #[must_use]
    pub fn value_bypassing_bindings(&self) -> T {
        self.cell.slot.get()
    }
}

impl<T: PartialEq + Default + 'static> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Property");
        match self.cell.slot.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.field("has_binding", &self.has_binding())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Non-owning handle to a [`Property`].
pub struct WeakProperty<T> {
    cell: Weak<PropertyCell<T>>,
}

impl<T> WeakProperty<T> {
    /// The property, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Property<T>> {
        self.cell.upgrade().map(|cell| Property { cell })
    }
}

impl<T> Clone for WeakProperty<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for WeakProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakProperty")
            .field("alive", &(self.cell.strong_count() > 0))
            .finish()
    }
}
