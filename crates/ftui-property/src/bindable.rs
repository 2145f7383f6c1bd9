#![forbid(unsafe_code)]

//! Type-erased access to anything that can carry a binding.
//!
//! Generic code (inspectors, declarative loaders, [`BindingStorage`]) handles
//! properties without knowing their value type. [`UntypedBindable`] is the
//! object-safe surface it uses. Installing a binding checks the value type at
//! runtime: a mismatch or a read-only target is rejected with `false` and a
//! warning, and the target's current binding is left alone.
//!
//! [`BindingStorage`]: crate::BindingStorage

use crate::binding::{PropertyBinding, UntypedPropertyBinding, ValueType};
use crate::handler::PropertyNotifier;
use crate::property::Property;

/// Object-safe binding interface.
pub trait UntypedBindable {
    /// The value type bindings must produce.
    fn value_type(&self) -> ValueType;

    /// Read-only targets refuse bindings.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether a binding is installed.
    fn has_binding(&self) -> bool;

    /// The installed binding, type-erased.
    fn untyped_binding(&self) -> Option<UntypedPropertyBinding>;

    /// Install `binding`. Returns `false`, leaving the target unchanged, if
    /// the value types differ, the target is read-only, or the current
    /// binding is mid-evaluation.
    fn set_untyped_binding(&self, binding: UntypedPropertyBinding) -> bool;

    /// Remove and return the installed binding.
    fn take_untyped_binding(&self) -> Option<UntypedPropertyBinding>;

    /// Register a value-less change callback.
    fn add_untyped_notifier(&self, f: Box<dyn Fn()>) -> PropertyNotifier;

    /// A binding that reads this target, for binding another property to it.
    fn make_binding(&self) -> UntypedPropertyBinding;
}

/// Shared admission check for [`UntypedBindable::set_untyped_binding`].
pub(crate) fn admit(target: &dyn UntypedBindable, binding: &UntypedPropertyBinding) -> bool {
    if target.is_read_only() {
        tracing::warn!(
            value_type = target.value_type().name(),
            "binding rejected: target property is read-only"
        );
        return false;
    }
    if binding.value_type() != target.value_type() {
        tracing::warn!(
            expected = target.value_type().name(),
            found = binding.value_type().name(),
            location = %binding.location(),
            "binding rejected: value type mismatch"
        );
        return false;
    }
    true
}

impl<T: Clone + 'static> UntypedBindable for Property<T> {
    fn value_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn has_binding(&self) -> bool {
        Property::has_binding(self)
    }

    fn untyped_binding(&self) -> Option<UntypedPropertyBinding> {
        self.binding().map(PropertyBinding::into_untyped)
    }

    fn set_untyped_binding(&self, binding: UntypedPropertyBinding) -> bool {
        if !admit(self, &binding) {
            return false;
        }
        binding
            .downcast::<T>()
            .is_ok_and(|typed| self.try_set_binding(typed).is_ok())
    }

    fn take_untyped_binding(&self) -> Option<UntypedPropertyBinding> {
        self.take_binding().map(PropertyBinding::into_untyped)
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
    use crate::{ComputedProperty, binding};
    use tracing_test::traced_test;

    #[test]
    fn matching_type_installs() {
        let p = Property::new(0_i32);
        let target: &dyn UntypedBindable = &p;
        assert!(target.set_untyped_binding(binding!(5_i32).into_untyped()));
        assert!(target.has_binding());
        assert_eq!(p.value(), 5);
        assert_eq!(target.value_type(), ValueType::of::<i32>());
    }

    #[test]
    fn mismatched_type_leaves_binding_untouched() {
        let p = Property::new(0_i32);
        p.set_binding(binding!(1_i32));
        let before = p.binding().unwrap();
        let target: &dyn UntypedBindable = &p;
        assert!(!target.set_untyped_binding(binding!(2.5_f64).into_untyped()));
        assert!(p.binding().unwrap().ptr_eq(&before));
        assert_eq!(p.value(), 1);
    }

    #[test]
    #[traced_test]
    fn mismatch_is_logged_with_both_types() {
        let p = Property::new(0_u8);
        assert!(!p.set_untyped_binding(binding!(String::new()).into_untyped()));
        assert!(logs_contain("value type mismatch"));
        assert!(logs_contain("u8"));
        assert!(logs_contain("String"));
    }

    #[test]
    #[traced_test]
    fn read_only_target_is_logged() {
        let computed = ComputedProperty::new(|| 1_i32);
        let target: &dyn UntypedBindable = &computed;
        assert!(!target.set_untyped_binding(binding!(2_i32).into_untyped()));
        assert!(logs_contain("target property is read-only"));
    }

    #[test]
    fn make_binding_links_two_properties() {
        let source = Property::new(String::from("a"));
        let mirror = Property::new(String::new());
        assert!(mirror.set_untyped_binding(source.make_binding()));
        source.set_value("b".into());
        assert_eq!(mirror.value(), "b");
    }

    #[test]
    fn take_untyped_round_trip() {
        let a = Property::new(1);
        let b = Property::new(0);
        let target: &dyn UntypedBindable = &b;
        target.set_untyped_binding(binding!([a] a.value() * 2).into_untyped());
        let taken = target.take_untyped_binding().unwrap();
        assert!(!target.has_binding());
        assert!(target.set_untyped_binding(taken));
        a.set_value(4);
        assert_eq!(b.value(), 8);
    }

    #[test]
    fn untyped_notifier_fires() {
        let p = Property::new(0);
        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let h = std::rc::Rc::clone(&hits);
        let _n = p.add_untyped_notifier(Box::new(move || h.set(h.get() + 1)));
        p.set_value(3);
        assert_eq!(hits.get(), 1);
    }
}
