#![forbid(unsafe_code)]

//! Observer nodes attached to a property's change list.
//!
//! Every property owns an [`ObserverList`]. Nodes are shared (`Rc`) between
//! the list and whoever created them: a binding for dependency links, a
//! [`PropertyChangeHandler`](crate::PropertyChangeHandler) or
//! [`PropertyNotifier`](crate::PropertyNotifier) token for callbacks.
//!
//! # Invariants
//!
//! 1. Nodes are visited in registration order.
//! 2. Unlinking a node is O(1): the node is marked vacant and skipped from then
//!    on. Vacant nodes are compacted out of the list lazily on insertion.
//! 3. Notification iterates over a snapshot of the callback nodes and
//!    re-checks liveness before every callback, so a callback may unlink
//!    itself or any later node without corrupting the walk.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::binding::BindingPrivate;

/// Smallest list length at which vacant nodes are compacted.
const MIN_COMPACT_LEN: usize = 8;

pub(crate) enum ObserverKind {
    /// Link from a property to a binding that read it.
    Dependency(Weak<BindingPrivate>),
    /// User callback fired once per notified change.
    ChangeHandler(RefCell<Option<Rc<dyn Fn()>>>),
    /// Value-less callback, used by adaptors and the untyped interface.
    Notifier(RefCell<Option<Rc<dyn Fn()>>>),
}

pub(crate) struct ObserverNode {
    kind: ObserverKind,
    active: Cell<bool>,
}

impl ObserverNode {
    pub(crate) fn dependency(binding: Weak<BindingPrivate>) -> Rc<Self> {
        Self::with_kind(ObserverKind::Dependency(binding))
    }

    pub(crate) fn change_handler(callback: Rc<dyn Fn()>) -> Rc<Self> {
        Self::with_kind(ObserverKind::ChangeHandler(RefCell::new(Some(callback))))
    }

    pub(crate) fn notifier(callback: Rc<dyn Fn()>) -> Rc<Self> {
        Self::with_kind(ObserverKind::Notifier(RefCell::new(Some(callback))))
    }

    fn with_kind(kind: ObserverKind) -> Rc<Self> {
        Rc::new(Self {
            kind,
            active: Cell::new(true),
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Mark the node vacant and release its callback. Idempotent.
    ///
    /// A callback that is currently running stays alive until it returns:
    /// the notifier holds its own clone for the duration of the call.
    pub(crate) fn deactivate(&self) {
        self.active.set(false);
        if let ObserverKind::ChangeHandler(cb) | ObserverKind::Notifier(cb) = &self.kind {
            if let Ok(mut cb) = cb.try_borrow_mut() {
                cb.take();
            }
        }
    }

    pub(crate) fn is_dependency(&self) -> bool {
        matches!(self.kind, ObserverKind::Dependency(_))
    }

    /// The binding a dependency node points at, if it is still alive.
    pub(crate) fn binding(&self) -> Option<Rc<BindingPrivate>> {
        match &self.kind {
            ObserverKind::Dependency(binding) => binding.upgrade(),
            ObserverKind::ChangeHandler(_) | ObserverKind::Notifier(_) => None,
        }
    }

    /// The user callback of a live handler or notifier node.
    pub(crate) fn callback(&self) -> Option<Rc<dyn Fn()>> {
        match &self.kind {
            ObserverKind::ChangeHandler(cb) | ObserverKind::Notifier(cb) => cb.borrow().clone(),
            ObserverKind::Dependency(_) => None,
        }
    }
}

impl std::fmt::Debug for ObserverNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ObserverKind::Dependency(_) => "dependency",
            ObserverKind::ChangeHandler(_) => "change_handler",
            ObserverKind::Notifier(_) => "notifier",
        };
        f.debug_struct("ObserverNode")
            .field("kind", &kind)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Registration-ordered observers of one property.
#[derive(Debug, Default)]
pub(crate) struct ObserverList {
    nodes: Vec<Rc<ObserverNode>>,
    compact_at: usize,
}

impl ObserverList {
    pub(crate) fn push(&mut self, node: Rc<ObserverNode>) {
        if self.nodes.len() >= self.compact_at.max(MIN_COMPACT_LEN) {
            self.nodes.retain(|n| n.is_active());
            self.compact_at = self.nodes.len() * 2;
        }
        self.nodes.push(node);
    }

    /// Active handler and notifier nodes, in registration order.
    pub(crate) fn callbacks(&self) -> Vec<Rc<ObserverNode>> {
        self.nodes
            .iter()
            .filter(|n| n.is_active() && !n.is_dependency())
            .cloned()
            .collect()
    }

    /// Bindings that depend on this property and are still alive.
    pub(crate) fn dependent_bindings(&self) -> Vec<Rc<BindingPrivate>> {
        self.nodes
            .iter()
            .filter(|n| n.is_active())
            .filter_map(|n| n.binding())
            .collect()
    }

    pub(crate) fn has_callbacks(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.is_active() && !n.is_dependency())
    }

    /// Number of active nodes of any kind.
    pub(crate) fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_active()).count()
    }

    /// Deactivate and drop every node.
    pub(crate) fn clear(&mut self) {
        for node in self.nodes.drain(..) {
            node.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Rc<dyn Fn()> {
        Rc::new(|| {})
    }

    #[test]
    fn callbacks_preserve_registration_order() {
        let mut list = ObserverList::default();
        let a = ObserverNode::change_handler(noop());
        let b = ObserverNode::notifier(noop());
        list.push(Rc::clone(&a));
        list.push(Rc::clone(&b));

        let snap = list.callbacks();
        assert_eq!(snap.len(), 2);
        assert!(Rc::ptr_eq(&snap[0], &a));
        assert!(Rc::ptr_eq(&snap[1], &b));
    }

    #[test]
    fn deactivated_nodes_are_skipped() {
        let mut list = ObserverList::default();
        let a = ObserverNode::change_handler(noop());
        let b = ObserverNode::change_handler(noop());
        list.push(Rc::clone(&a));
        list.push(Rc::clone(&b));

        a.deactivate();
        assert_eq!(list.len(), 1);
        assert!(Rc::ptr_eq(&list.callbacks()[0], &b));
    }

    #[test]
    fn vacant_nodes_are_compacted_on_push() {
        let mut list = ObserverList::default();
        let nodes: Vec<_> = (0..MIN_COMPACT_LEN)
            .map(|_| ObserverNode::change_handler(noop()))
            .collect();
        for n in &nodes {
            list.push(Rc::clone(n));
        }
        for n in &nodes {
            n.deactivate();
        }
        list.push(ObserverNode::notifier(noop()));
        assert_eq!(list.nodes.len(), 1, "vacant slots should be reclaimed");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn dead_dependency_links_yield_no_binding() {
        let mut list = ObserverList::default();
        list.push(ObserverNode::dependency(Weak::new()));
        assert!(list.dependent_bindings().is_empty());
        assert!(!list.has_callbacks());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn deactivate_releases_callback() {
        let marker = Rc::new(());
        let held = Rc::clone(&marker);
        let node = ObserverNode::change_handler(Rc::new(move || {
            let _ = &held;
        }));
        assert_eq!(Rc::strong_count(&marker), 2);
        node.deactivate();
        assert_eq!(Rc::strong_count(&marker), 1, "callback should be dropped");
        assert!(node.callback().is_none());
    }

    #[test]
    fn clear_deactivates_everything() {
        let mut list = ObserverList::default();
        let a = ObserverNode::change_handler(noop());
        list.push(Rc::clone(&a));
        list.clear();
        assert!(!a.is_active());
        assert_eq!(list.len(), 0);
    }
}
