#![forbid(unsafe_code)]

//! Per-property binding header and the notification passes.
//!
//! Every property kind ([`Property`](crate::Property),
//! [`ComputedProperty`](crate::ComputedProperty),
//! [`PropertyAdaptor`](crate::PropertyAdaptor)) embeds a [`BindingData`] and
//! exposes it through [`PropertyNode`]. The engine only ever talks to
//! `Rc<dyn PropertyNode>`.
//!
//! # Notification
//!
//! A change runs in two passes:
//!
//! 1. **Mark.** Breadth-first over dependency observers from the origin. Each
//!    reached binding is marked dirty; each property is visited once. Properties
//!    that somebody listens to, or whose binding is eager, are collected (origin
//!    first).
//! 2. **Flush.** Unless an update group defers it, every collected property
//!    that is still alive is evaluated if dirty, and its callbacks fire if its
//!    value changed.
//!
//! Collected properties are flagged *enrolled* until flushed. A lazy read that
//! re-evaluates an enrolled property before the flush reaches it records a
//! pending change, so the notification is not lost. Since every intermediate
//! binding is only evaluated on demand, a handler never observes a
//! half-updated graph.
//!
//! A mark pass that leads back to the origin's own binding has found a cycle:
//! that binding reports [`BindingLoop`](crate::BindingErrorKind::BindingLoop)
//! and keeps its value. A lazy evaluation that changes a value re-marks any
//! clean dependents, skipping bindings already stopped by a loop, so reads
//! settle instead of chasing the cycle.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::binding::BindingPrivate;
use crate::group;
use crate::observer::{ObserverList, ObserverNode};

/// Engine-facing view of a property.
pub(crate) trait PropertyNode {
    fn binding_data(&self) -> &BindingData;

    /// Storage a binding function writes into (a `ValueSlot<T>`).
    fn value_slot(&self) -> &dyn Any;

    /// Called after a binding stored a new value.
    fn binding_wrote_value(&self) {}
}

/// Identity of a node, stable for as long as any `Rc` or `Weak` to it lives.
pub(crate) fn node_addr(node: &Rc<dyn PropertyNode>) -> usize {
    Rc::as_ptr(node).cast::<()>() as usize
}

pub(crate) fn weak_node_addr(node: &Weak<dyn PropertyNode>) -> usize {
    Weak::as_ptr(node).cast::<()>() as usize
}

#[derive(Default)]
enum BindingSlot {
    #[default]
    Unbound,
    Bound(Rc<BindingPrivate>),
}

/// The installed binding was mid-evaluation and cannot be replaced.
#[derive(Debug)]
pub(crate) struct InstallRejected;

#[derive(Default)]
pub(crate) struct BindingData {
    slot: RefCell<BindingSlot>,
    observers: RefCell<ObserverList>,
    eager: Cell<bool>,
    pending_change: Cell<bool>,
    enrolled: Cell<bool>,
    signal: RefCell<Option<Rc<dyn Fn()>>>,
}

impl BindingData {
    pub(crate) fn eager() -> Self {
        let data = Self::default();
        data.eager.set(true);
        data
    }

    pub(crate) fn binding(&self) -> Option<Rc<BindingPrivate>> {
        match &*self.slot.borrow() {
            BindingSlot::Bound(binding) => Some(Rc::clone(binding)),
            BindingSlot::Unbound => None,
        }
    }

    pub(crate) fn has_binding(&self) -> bool {
        matches!(*self.slot.borrow(), BindingSlot::Bound(_))
    }

    fn replace_binding(&self, binding: Option<Rc<BindingPrivate>>) -> Option<Rc<BindingPrivate>> {
        let next = binding.map_or(BindingSlot::Unbound, BindingSlot::Bound);
        match self.slot.replace(next) {
            BindingSlot::Bound(old) => Some(old),
            BindingSlot::Unbound => None,
        }
    }

    pub(crate) fn is_eager(&self) -> bool {
        self.eager.get()
    }

    pub(crate) fn set_eager_flag(&self, eager: bool) {
        self.eager.set(eager);
    }

    pub(crate) fn is_enrolled(&self) -> bool {
        self.enrolled.get()
    }

    /// Flag for enrollment. Returns `false` if already enrolled.
    pub(crate) fn enroll(&self) -> bool {
        !self.enrolled.replace(true)
    }

    pub(crate) fn set_pending_change(&self) {
        self.pending_change.set(true);
    }

    pub(crate) fn add_observer(&self, node: Rc<ObserverNode>) {
        self.observers.borrow_mut().push(node);
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    pub(crate) fn set_signal(&self, signal: Option<Rc<dyn Fn()>>) {
        *self.signal.borrow_mut() = signal;
    }

    /// Whether a change of this property must be delivered somewhere.
    fn wants_flush(&self) -> bool {
        self.eager.get()
            || self.signal.borrow().is_some()
            || self.observers.borrow().has_callbacks()
    }
}

impl Drop for BindingData {
    fn drop(&mut self) {
        if let BindingSlot::Bound(binding) = std::mem::take(self.slot.get_mut()) {
            binding.detach();
        }
        self.observers.get_mut().clear();
    }
}

/// Evaluate the property's binding if a dependency changed since the last
/// evaluation. Returns whether the value changed.
///
/// Reading a property whose binding is currently evaluating is a binding loop.
pub(crate) fn evaluate_if_dirty(node: &Rc<dyn PropertyNode>) -> bool {
    let Some(binding) = node.binding_data().binding() else {
        return false;
    };
    if binding.is_evaluating() {
        binding.report_loop("Binding loop detected");
        return false;
    }
    let changed = binding.is_dirty() && binding.evaluate();
    if changed {
        mark_dependents(node, MarkPass::Refresh);
    }
    changed
}

/// Install `binding` on `node`, returning the binding it replaces.
pub(crate) fn install_binding(
    node: &Rc<dyn PropertyNode>,
    binding: Rc<BindingPrivate>,
) -> Result<Option<Rc<BindingPrivate>>, InstallRejected> {
    let data = node.binding_data();
    if let Some(existing) = data.binding() {
        if Rc::ptr_eq(&existing, &binding) {
            return Ok(None);
        }
        if existing.is_evaluating() {
            existing.report_loop("Binding set during binding evaluation!");
            return Err(InstallRejected);
        }
    }
    if binding.is_evaluating() {
        binding.report_loop("Binding set during binding evaluation!");
        return Err(InstallRejected);
    }
    if let Some(previous) = binding.target() {
        // Moving a binding leaves its old property unbound.
        previous.binding_data().replace_binding(None);
        binding.detach();
    }

    let old = data.replace_binding(Some(Rc::clone(&binding)));
    if let Some(old) = &old {
        old.detach();
    }
    binding.attach(Rc::downgrade(node));
    binding.mark_dirty();
    if binding.evaluate() {
        notify_observers(node);
    }
    Ok(old)
}

/// Remove the binding from `node`, keeping the last computed value.
pub(crate) fn take_binding(node: &Rc<dyn PropertyNode>) -> Option<Rc<BindingPrivate>> {
    evaluate_if_dirty(node);
    let binding = node.binding_data().replace_binding(None)?;
    binding.detach();
    Some(binding)
}

/// Prepare `node` for a direct write: a sticky binding stays installed,
/// any other binding is removed.
pub(crate) fn release_for_write(node: &Rc<dyn PropertyNode>) {
    let data = node.binding_data();
    let Some(binding) = data.binding() else {
        return;
    };
    if binding.is_sticky() {
        binding.clear_dirty();
    } else {
        data.replace_binding(None);
        binding.detach();
    }
}

/// Flip the eager flag; a dirty binding that becomes eager is brought up to
/// date right away.
pub(crate) fn set_eager(node: &Rc<dyn PropertyNode>, eager: bool) {
    node.binding_data().set_eager_flag(eager);
    if !eager {
        return;
    }
    let Some(binding) = node.binding_data().binding() else {
        return;
    };
    if binding.is_dirty() && !binding.is_evaluating() && binding.evaluate() {
        notify_observers(node);
    }
}

/// Announce that `origin` changed.
pub(crate) fn notify_observers(origin: &Rc<dyn PropertyNode>) {
    origin.binding_data().set_pending_change();
    let collected = mark_dependents(origin, MarkPass::Notify);
    if group::enroll(&collected) {
        return;
    }
    let entries = collected
        .iter()
        .filter(|node| node.binding_data().enroll() || Rc::ptr_eq(node, origin))
        .map(Rc::downgrade)
        .collect();
    // Handlers may destroy collected properties; hold none of them strongly.
    drop(collected);
    flush(entries);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MarkPass {
    /// A change to announce: mark everything reachable, collect what needs a
    /// flush.
    Notify,
    /// A lazy evaluation changed a value: mark clean dependents only.
    Refresh,
}

/// Mark every binding reachable from `origin` dirty. In a
/// [`MarkPass::Notify`] pass, also collect the properties that need a flush,
/// origin first.
fn mark_dependents(origin: &Rc<dyn PropertyNode>, pass: MarkPass) -> Vec<Rc<dyn PropertyNode>> {
    let origin_addr = node_addr(origin);
    let mut visited = AHashSet::new();
    visited.insert(origin_addr);
    let mut collected = Vec::new();
    if pass == MarkPass::Notify {
        collected.push(Rc::clone(origin));
    }
    let mut looped = false;
    let mut queue = VecDeque::from([Rc::clone(origin)]);

    while let Some(node) = queue.pop_front() {
        let dependents = node.binding_data().observers.borrow().dependent_bindings();
        for binding in dependents {
            let Some(target) = binding.target() else {
                continue;
            };
            if node_addr(&target) == origin_addr {
                // The origin's own binding depends on the origin.
                if !looped {
                    looped = true;
                    binding.report_loop("Binding loop detected");
                }
                continue;
            }
            if pass == MarkPass::Refresh
                && (binding.is_dirty() || binding.is_evaluating() || binding.has_loop_error())
            {
                continue;
            }
            if !visited.insert(node_addr(&target)) {
                continue;
            }
            binding.mark_dirty();
            if pass == MarkPass::Notify && target.binding_data().wants_flush() {
                collected.push(Rc::clone(&target));
            }
            queue.push_back(target);
        }
    }
    collected
}

/// Properties still waiting for their turn in a flush.
///
/// If a callback panics, the entries that never got their turn are released
/// on unwind. Left enrolled, they would be skipped by every later
/// notification.
struct FlushQueue {
    entries: std::vec::IntoIter<Weak<dyn PropertyNode>>,
}

impl Drop for FlushQueue {
    fn drop(&mut self) {
        for weak in self.entries.by_ref() {
            if let Some(node) = weak.upgrade() {
                let data = node.binding_data();
                data.enrolled.set(false);
                data.pending_change.set(false);
            }
        }
    }
}

/// Deliver notifications for enrolled properties, in order.
pub(crate) fn flush(entries: Vec<Weak<dyn PropertyNode>>) {
    let mut queue = FlushQueue {
        entries: entries.into_iter(),
    };
    while let Some(weak) = queue.entries.next() {
        let Some((callbacks, signal)) = take_notification(&weak) else {
            continue;
        };
        // No strong reference is held while user code runs, so a callback
        // may drop the property.
        for observer in callbacks {
            if weak.strong_count() == 0 {
                break;
            }
            if !observer.is_active() {
                continue;
            }
            if let Some(callback) = observer.callback() {
                callback();
            }
        }
        if let Some(signal) = signal {
            if weak.strong_count() > 0 {
                signal();
            }
        }
    }
}

type Notification = (Vec<Rc<ObserverNode>>, Option<Rc<dyn Fn()>>);

/// Settle one enrolled property and return what to invoke if it changed.
fn take_notification(weak: &Weak<dyn PropertyNode>) -> Option<Notification> {
    let node = weak.upgrade()?;
    let data = node.binding_data();
    data.enrolled.set(false);
    // Once unenrolled, evaluation no longer records a pending change.
    let pending = data.pending_change.replace(false);
    let evaluated = evaluate_if_dirty(&node);
    if !(evaluated || pending) {
        return None;
    }
    let callbacks = data.observers.borrow().callbacks();
    let signal = data.signal.borrow().clone();
    Some((callbacks, signal))
}
