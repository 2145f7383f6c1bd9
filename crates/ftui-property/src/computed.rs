#![forbid(unsafe_code)]

//! Read-only properties backed by a getter.
//!
//! A [`ComputedProperty<T>`] exposes state owned elsewhere (a field of a host
//! object, a cache) to the binding engine. Bindings that read it depend on it
//! like on any other property. The engine cannot see when the underlying
//! state changes, so the owner calls [`ComputedProperty::notify`] after each
//! change.

use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::bindable::{UntypedBindable, admit};
use crate::binding::{PropertyBinding, UntypedPropertyBinding, ValueType};
use crate::binding_data::{self, BindingData, PropertyNode};
use crate::handler::{PropertyChangeHandler, PropertyNotifier};
use crate::observer::ObserverNode;
use crate::status;

struct ComputedCell<T> {
    data: BindingData,
    getter: Box<dyn Fn() -> T>,
}

impl<T: 'static> PropertyNode for ComputedCell<T> {
    fn binding_data(&self) -> &BindingData {
        &self.data
    }

    fn value_slot(&self) -> &dyn Any {
        // Never bound: there is nothing for a binding to write into.
        &()
    }
}

/// A read-only, getter-backed property.
pub struct ComputedProperty<T> {
    cell: Rc<ComputedCell<T>>,
}

impl<T> Clone for ComputedProperty<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: 'static> ComputedProperty<T> {
    /// Wrap `getter`.
    #[must_use]
    pub fn new(getter: impl Fn() -> T + 'static) -> Self {
        Self {
            cell: Rc::new(ComputedCell {
                data: BindingData::default(),
                getter: Box::new(getter),
            }),
        }
    }

    fn node(&self) -> Rc<dyn PropertyNode> {
        self.cell.clone()
    }

    /// Call the getter. Inside a binding evaluation the read is recorded as a
    /// dependency.
    #[must_use]
    pub fn value(&self) -> T {
        status::capture_dependency(&self.node());
        (self.cell.getter)()
    }

    /// Announce that the getter's result changed.
    pub fn notify(&self) {
        binding_data::notify_observers(&self.node());
    }

    /// Register a handler invoked with the getter's result after every
    /// [`notify`](Self::notify).
    #[must_use = "the handler is unregistered when the token drops"]
    pub fn on_value_changed(&self, f: impl Fn(&T) + 'static) -> PropertyChangeHandler {
        let weak: Weak<ComputedCell<T>> = Rc::downgrade(&self.cell);
        let node = ObserverNode::change_handler(Rc::new(move || {
            let Some(value) = weak.upgrade().map(|cell| (cell.getter)()) else {
                return;
            };
            f(&value);
        }));
        self.cell.data.add_observer(Rc::clone(&node));
        PropertyChangeHandler::new(node)
    }

    /// Register a value-less change callback.
    #[must_use = "the notifier is unregistered when the token drops"]
    pub fn add_notifier(&self, f: impl Fn() + 'static) -> PropertyNotifier {
        let node = ObserverNode::notifier(Rc::new(f));
        self.cell.data.add_observer(Rc::clone(&node));
        PropertyNotifier::new(node)
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.cell.data.observer_count()
    }
}

impl<T> fmt::Debug for ComputedProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedProperty")
            .field("value_type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: 'static> UntypedBindable for ComputedProperty<T> {
    fn value_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn has_binding(&self) -> bool {
        false
    }

    fn untyped_binding(&self) -> Option<UntypedPropertyBinding> {
        None
    }

    fn set_untyped_binding(&self, binding: UntypedPropertyBinding) -> bool {
        admit(self, &binding)
    }

    fn take_untyped_binding(&self) -> Option<UntypedPropertyBinding> {
        None
    }

    fn add_untyped_notifier(&self, f: Box<dyn Fn()>) -> PropertyNotifier {
        self.add_notifier(f)
    }

    #[track_caller]
    fn make_binding(&self) -> UntypedPropertyBinding {
        let source = self.clone();
        PropertyBinding::new(move || source.value()).into_untyped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, binding};
    use std::cell::Cell;

    #[test]
    fn binding_depends_on_computed() {
        let backing = Rc::new(Cell::new(3));
        let b = Rc::clone(&backing);
        let computed = ComputedProperty::new(move || b.get());
        let doubled = Property::new(0);
        doubled.set_binding(binding!([computed] computed.value() * 2));
        assert_eq!(doubled.value(), 6);

        backing.set(5);
        assert_eq!(doubled.value(), 6, "no notify yet");
        computed.notify();
        assert_eq!(doubled.value(), 10);
    }

    #[test]
    fn handler_sees_getter_result() {
        let backing = Rc::new(Cell::new(0));
        let b = Rc::clone(&backing);
        let computed = ComputedProperty::new(move || b.get());
        let seen = Rc::new(Cell::new(-1));
        let s = Rc::clone(&seen);
        let _h = computed.on_value_changed(move |v| s.set(*v));
        backing.set(7);
        computed.notify();
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn read_only_rejects_bindings() {
        let computed = ComputedProperty::new(|| 1_i32);
        assert!(computed.is_read_only());
        assert!(!computed.set_untyped_binding(binding!(2_i32).into_untyped()));
        assert!(!computed.has_binding());
        assert_eq!(computed.value(), 1);
    }

    #[test]
    fn make_binding_reads_getter() {
        let backing = Rc::new(Cell::new(1_u8));
        let b = Rc::clone(&backing);
        let computed = ComputedProperty::new(move || b.get());
        let mirror = Property::new(0_u8);
        assert!(mirror.set_untyped_binding(computed.make_binding()));
        backing.set(9);
        computed.notify();
        assert_eq!(mirror.value(), 9);
    }
}
