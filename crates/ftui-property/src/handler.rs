#![forbid(unsafe_code)]

//! RAII tokens for change callbacks.
//!
//! [`Property::on_value_changed`](crate::Property::on_value_changed) and
//! [`Property::add_notifier`](crate::Property::add_notifier) return a token.
//! The callback stays registered exactly as long as the token lives. Dropping
//! a token unregisters immediately, including from inside the callback
//! itself or while a notification pass is running.
//!
//! [`ObserverScope`] collects tokens for a logical owner (a widget, a
//! controller) and releases them together.

use std::fmt;
use std::rc::Rc;

use crate::observer::ObserverNode;
use crate::property::Property;

struct ObserverGuard {
    node: Rc<ObserverNode>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.node.deactivate();
    }
}

/// Keeps a value-change handler registered. Drop to unregister.
#[must_use = "the handler is unregistered when the token drops"]
pub struct PropertyChangeHandler {
    guard: ObserverGuard,
}

impl PropertyChangeHandler {
    pub(crate) fn new(node: Rc<ObserverNode>) -> Self {
        Self {
            guard: ObserverGuard { node },
        }
    }

    /// Whether the handler is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.node.is_active()
    }
}

impl fmt::Debug for PropertyChangeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChangeHandler")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Keeps a value-less change callback registered. Drop to unregister.
#[must_use = "the notifier is unregistered when the token drops"]
pub struct PropertyNotifier {
    guard: ObserverGuard,
}

impl PropertyNotifier {
    pub(crate) fn new(node: Rc<ObserverNode>) -> Self {
        Self {
            guard: ObserverGuard { node },
        }
    }

    /// Whether the notifier is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.node.is_active()
    }
}

impl fmt::Debug for PropertyNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyNotifier")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Collects change tokens for one owner.
///
/// # Invariants
///
/// 1. Tokens are released in reverse registration order.
/// 2. After drop or [`clear`](Self::clear), no callback from this scope fires.
/// 3. A cleared scope is reusable.
#[derive(Default)]
pub struct ObserverScope {
    guards: Vec<ObserverGuard>,
}

impl ObserverScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `handler` registered for the lifetime of the scope.
    pub fn hold(&mut self, handler: PropertyChangeHandler) {
        self.guards.push(handler.guard);
    }

    /// Keep `notifier` registered for the lifetime of the scope.
    pub fn hold_notifier(&mut self, notifier: PropertyNotifier) {
        self.guards.push(notifier.guard);
    }

    /// Register a change handler on `property`, owned by this scope.
    pub fn on_value_changed<T: Clone + 'static>(
        &mut self,
        property: &Property<T>,
        f: impl Fn(&T) + 'static,
    ) -> &mut Self {
        self.hold(property.on_value_changed(f));
        self
    }

    /// Like [`on_value_changed`](Self::on_value_changed), but invokes `f`
    /// with the current value first.
    pub fn subscribe<T: Clone + 'static>(
        &mut self,
        property: &Property<T>,
        f: impl Fn(&T) + 'static,
    ) -> &mut Self {
        self.hold(property.subscribe(f));
        self
    }

    /// Register a value-less callback on `property`, owned by this scope.
    pub fn add_notifier<T: 'static>(
        &mut self,
        property: &Property<T>,
        f: impl Fn() + 'static,
    ) -> &mut Self {
        self.hold_notifier(property.add_notifier(f));
        self
    }

    /// Number of tokens held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether the scope holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Release every token now.
    pub fn clear(&mut self) {
        while self.guards.pop().is_some() {}
    }
}

impl Drop for ObserverScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for ObserverScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverScope")
            .field("len", &self.guards.len())
            .finish()
    }
}
