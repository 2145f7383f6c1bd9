#![forbid(unsafe_code)]

//! Binding support for host properties that only offer a getter, a setter
//! and a change signal.
//!
//! A [`PropertyAdaptor<T>`] wraps such a property. Reads go through the
//! getter. Direct writes and binding results go through the setter. The host
//! forwards its change signal to [`PropertyAdaptor::host_changed`] so that
//! dependents and handlers hear about changes made on the host side.
//!
//! Adaptor bindings are eager: when a dependency changes, the binding runs
//! during notification and pushes its result into the host right away, as the
//! host cannot pull values on demand.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use ftui_property::{Property, PropertyAdaptor, binding};
//!
//! // A host widget with a plain field.
//! let field = Rc::new(Cell::new(0_u16));
//! let (get, set) = (Rc::clone(&field), Rc::clone(&field));
//! let width = PropertyAdaptor::new(move || get.get(), move |v| set.set(v));
//!
//! let columns = Property::new(10_u16);
//! width.set_binding(binding!([columns] columns.value() * 8));
//! assert_eq!(field.get(), 80);
//!
//! columns.set_value(12);
//! assert_eq!(field.get(), 96);
//! ```

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::bindable::{UntypedBindable, admit};
use crate::binding::{PropertyBinding, UntypedPropertyBinding, ValueType};
use crate::binding_data::{self, BindingData, InstallRejected, PropertyNode};
use crate::handler::{PropertyChangeHandler, PropertyNotifier};
use crate::observer::ObserverNode;
use crate::property::ValueSlot;
use crate::status;

struct AdaptorCell<T> {
    data: BindingData,
    /// Last value written by a binding or `set_value`.
    slot: ValueSlot<T>,
    getter: Box<dyn Fn() -> T>,
    setter: Box<dyn Fn(T)>,
    /// Set while the setter runs, so the host echoing its own change signal
    /// does not notify twice.
    writing: Cell<bool>,
}

impl<T: Clone + 'static> AdaptorCell<T> {
    fn write_host(&self, value: T) {
        self.writing.set(true);
        (self.setter)(value);
        self.writing.set(false);
    }
}

impl<T: Clone + 'static> PropertyNode for AdaptorCell<T> {
    fn binding_data(&self) -> &BindingData {
        &self.data
    }

    fn value_slot(&self) -> &dyn Any {
        &self.slot
    }

    fn binding_wrote_value(&self) {
        self.write_host(self.slot.get());
    }
}

/// Binding adaptor over a host getter/setter pair.
pub struct PropertyAdaptor<T> {
    cell: Rc<AdaptorCell<T>>,
}

impl<T> Clone for PropertyAdaptor<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: Clone + PartialEq + 'static> PropertyAdaptor<T> {
    /// Wrap a host property.
    #[must_use]
    pub fn new(getter: impl Fn() -> T + 'static, setter: impl Fn(T) + 'static) -> Self {
        let initial = getter();
        Self {
            cell: Rc::new(AdaptorCell {
                data: BindingData::eager(),
                slot: ValueSlot::comparable(initial),
                getter: Box::new(getter),
                setter: Box::new(setter),
                writing: Cell::new(false),
            }),
        }
    }

    fn node(&self) -> Rc<dyn PropertyNode> {
        self.cell.clone()
    }

    /// The host's current value. Inside a binding evaluation the read is
    /// recorded as a dependency.
    #[must_use]
    pub fn value(&self) -> T {
        let node = self.node();
        binding_data::evaluate_if_dirty(&node);
        status::capture_dependency(&node);
        (self.cell.getter)()
    }

    /// Write `value` to the host, removing a non-sticky binding.
    pub fn set_value(&self, value: T) {
        let node = self.node();
        binding_data::release_for_write(&node);
        let changed = (self.cell.getter)() != value;
        self.cell.slot.replace(value.clone());
        self.cell.write_host(value);
        if changed {
            binding_data::notify_observers(&node);
        }
    }

    /// Forward the host's change signal here.
    ///
    /// Ignored while the adaptor itself is writing to the host.
    pub fn host_changed(&self) {
        if self.cell.writing.get() {
            return;
        }
        self.cell.slot.replace((self.cell.getter)());
        binding_data::notify_observers(&self.node());
    }

    /// Install `binding`, returning the binding it replaced. The result is
    /// pushed into the host immediately.
    pub fn set_binding(&self, binding: PropertyBinding<T>) -> Option<PropertyBinding<T>> {
        self.try_set_binding(binding).ok().flatten()
    }

    fn try_set_binding(
        &self,
        binding: PropertyBinding<T>,
    ) -> Result<Option<PropertyBinding<T>>, InstallRejected> {
        let old = binding_data::install_binding(&self.node(), Rc::clone(binding.private()))?;
        Ok(old.map(PropertyBinding::from_private))
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

    /// Remove the binding and return it. The host keeps its current value.
    pub fn take_binding(&self) -> Option<PropertyBinding<T>> {
        binding_data::take_binding(&self.node()).map(PropertyBinding::from_private)
    }

    /// Register a handler invoked with the host's value after every notified
    /// change.
    #[must_use = "the handler is unregistered when the token drops"]
    pub fn on_value_changed(&self, f: impl Fn(&T) + 'static) -> PropertyChangeHandler {
        let weak: Weak<AdaptorCell<T>> = Rc::downgrade(&self.cell);
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
}

impl<T> fmt::Debug for PropertyAdaptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyAdaptor")
            .field("value_type", &std::any::type_name::<T>())
            .field("has_binding", &self.cell.data.has_binding())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> UntypedBindable for PropertyAdaptor<T> {
    fn value_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn has_binding(&self) -> bool {
        PropertyAdaptor::has_binding(self)
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
    use crate::{Property, binding};
    use std::cell::RefCell;

    struct Host {
        text: RefCell<String>,
        writes: Cell<u32>,
    }

    fn adaptor(host: &Rc<Host>) -> PropertyAdaptor<String> {
        let (g, s) = (Rc::clone(host), Rc::clone(host));
        PropertyAdaptor::new(
            move || g.text.borrow().clone(),
            move |v| {
                s.writes.set(s.writes.get() + 1);
                *s.text.borrow_mut() = v;
            },
        )
    }

    fn host() -> Rc<Host> {
        Rc::new(Host {
            text: RefCell::new("init".into()),
            writes: Cell::new(0),
        })
    }

    #[test]
    fn binding_pushes_into_host() {
        let host = host();
        let title = adaptor(&host);
        let name = Property::new(String::from("x"));
        title.set_binding(binding!([name] format!("[{}]", name.value())));
        assert_eq!(*host.text.borrow(), "[x]");

        name.set_value("y".into());
        assert_eq!(*host.text.borrow(), "[y]", "eager: no read needed");
        assert_eq!(host.writes.get(), 2);
    }

    #[test]
    fn host_change_reaches_dependents() {
        let host = host();
        let title = adaptor(&host);
        let len = Property::new(0_usize);
        len.set_binding(binding!([title] title.value().len()));
        assert_eq!(len.value(), 4);

        *host.text.borrow_mut() = "longer".into();
        title.host_changed();
        assert_eq!(len.value(), 6);
    }

    #[test]
    fn echoed_signal_notifies_once() {
        let host = host();
        // A host whose setter emits its change signal synchronously.
        let me: Rc<RefCell<Option<PropertyAdaptor<String>>>> = Rc::new(RefCell::new(None));
        let (g, s, m) = (Rc::clone(&host), Rc::clone(&host), Rc::clone(&me));
        let title = PropertyAdaptor::new(
            move || g.text.borrow().clone(),
            move |v| {
                *s.text.borrow_mut() = v;
                if let Some(adaptor) = m.borrow().as_ref() {
                    adaptor.host_changed();
                }
            },
        );
        *me.borrow_mut() = Some(title.clone());

        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _n = title.add_notifier(move || h.set(h.get() + 1));
        title.set_value("new".into());
        assert_eq!(hits.get(), 1);

        let name = Property::new(String::from("a"));
        title.set_binding(binding!([name] name.value()));
        assert_eq!(hits.get(), 2);
        assert_eq!(*host.text.borrow(), "a");

        me.borrow_mut().take();
    }

    #[test]
    fn set_value_removes_binding() {
        let host = host();
        let title = adaptor(&host);
        let name = Property::new(String::from("x"));
        title.set_binding(binding!([name] name.value()));
        title.set_value("manual".into());
        assert!(!title.has_binding());
        name.set_value("ignored".into());
        assert_eq!(title.value(), "manual");
    }

    #[test]
    fn untyped_install_checks_type() {
        let host = host();
        let title = adaptor(&host);
        assert!(!title.set_untyped_binding(binding!(1_u32).into_untyped()));
        assert!(title.set_untyped_binding(binding!(String::from("ok")).into_untyped()));
        assert_eq!(title.value(), "ok");
    }
}
