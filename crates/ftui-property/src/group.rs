#![forbid(unsafe_code)]

//! Update groups: defer notifications until a batch of writes is complete.
//!
//! Inside a group, writes are stored immediately and dependents are marked
//! dirty immediately, so reads see fresh, consistent values. What is deferred
//! is notification (handlers, notifiers, signals) and eager evaluation. When
//! the outermost group closes, every affected property is flushed once.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use ftui_property::{Property, PropertyUpdateGroup, binding};
//!
//! let first = Property::new(String::from("Ada"));
//! let last = Property::new(String::from("Lovelace"));
//! let full = Property::new(String::new());
//! full.set_binding(binding!([first, last] format!("{} {}", first.value(), last.value())));
//!
//! let fired = Rc::new(Cell::new(0));
//! let f = Rc::clone(&fired);
//! let _h = full.on_value_changed(move |_| f.set(f.get() + 1));
//!
//! {
//!     let _group = PropertyUpdateGroup::begin();
//!     first.set_value("Grace".into());
//!     last.set_value("Hopper".into());
//!     assert_eq!(full.value(), "Grace Hopper");
//!     assert_eq!(fired.get(), 0);
//! }
//! assert_eq!(fired.get(), 1);
//! ```
//!
//! Groups nest. They are per thread: a group opened on one thread never
//! defers notifications on another.

use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::binding_data::{self, PropertyNode};
use crate::status::with_status;

/// Open groups on one thread and the properties enrolled in them.
#[derive(Default)]
pub(crate) struct UpdateGroupStack {
    depth: usize,
    entries: Vec<Weak<dyn PropertyNode>>,
}

/// Open an update group. Must be balanced by [`end_property_update_group`].
///
/// Prefer [`PropertyUpdateGroup`] or [`update_group`], which cannot be left
/// unbalanced.
pub fn begin_property_update_group() {
    with_status(|status| status.groups.borrow_mut().depth += 1);
}

/// Close the innermost update group. Closing the outermost one flushes every
/// enrolled property.
///
/// Calling this with no group open logs a warning and does nothing.
pub fn end_property_update_group() {
    let entries = with_status(|status| {
        let mut groups = status.groups.borrow_mut();
        if groups.depth == 0 {
            tracing::warn!("end_property_update_group called without a matching begin");
            return None;
        }
        groups.depth -= 1;
        (groups.depth == 0).then(|| std::mem::take(&mut groups.entries))
    })
    .flatten();

    if let Some(entries) = entries {
        let _span = tracing::debug_span!("property_update_group_flush", entries = entries.len())
            .entered();
        binding_data::flush(entries);
    }
}

/// Whether an update group is open on this thread.
#[must_use]
pub fn is_update_group_open() -> bool {
    update_group_depth() > 0
}

/// How many update groups are open on this thread.
#[must_use]
pub fn update_group_depth() -> usize {
    with_status(|status| status.groups.borrow().depth).unwrap_or(0)
}

/// Enroll `nodes` in the open group. Returns `false` if no group is open.
pub(crate) fn enroll(nodes: &[Rc<dyn PropertyNode>]) -> bool {
    with_status(|status| {
        let mut groups = status.groups.borrow_mut();
        if groups.depth == 0 {
            return false;
        }
        for node in nodes {
            if node.binding_data().enroll() {
                groups.entries.push(Rc::downgrade(node));
            }
        }
        true
    })
    .unwrap_or(false)
}

/// RAII update group: opened by [`begin`](Self::begin), closed on drop.
#[must_use = "the group closes as soon as it is dropped"]
pub struct PropertyUpdateGroup {
    _not_send: PhantomData<Rc<()>>,
}

impl PropertyUpdateGroup {
    /// Open a group that closes when the returned guard drops.
    pub fn begin() -> Self {
        begin_property_update_group();
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for PropertyUpdateGroup {
    fn drop(&mut self) {
        end_property_update_group();
    }
}

impl std::fmt::Debug for PropertyUpdateGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyUpdateGroup")
            .field("depth", &update_group_depth())
            .finish()
    }
}

/// Run `f` inside an update group.
pub fn update_group<R>(f: impl FnOnce() -> R) -> R {
    let _group = PropertyUpdateGroup::begin();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, binding};
    use std::cell::Cell;
    use tracing_test::traced_test;

    fn count_changes(p: &Property<i32>) -> (Rc<Cell<u32>>, crate::PropertyChangeHandler) {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let h = p.on_value_changed(move |_| c.set(c.get() + 1));
        (count, h)
    }

    #[test]
    fn depth_tracks_nesting() {
        assert!(!is_update_group_open());
        let outer = PropertyUpdateGroup::begin();
        let inner = PropertyUpdateGroup::begin();
        assert_eq!(update_group_depth(), 2);
        drop(inner);
        assert!(is_update_group_open());
        drop(outer);
        assert_eq!(update_group_depth(), 0);
    }

    #[test]
    fn notifications_deferred_to_outermost_end() {
        let p = Property::new(0);
        let (count, _h) = count_changes(&p);
        begin_property_update_group();
        begin_property_update_group();
        p.set_value(1);
        end_property_update_group();
        assert_eq!(count.get(), 0, "inner end does not flush");
        p.set_value(2);
        end_property_update_group();
        assert_eq!(count.get(), 1, "each property flushes once");
        assert_eq!(p.value(), 2);
    }

    #[test]
    fn reads_inside_group_are_fresh() {
        let a = Property::new(1);
        let b = Property::new(0);
        b.set_binding(binding!([a] a.value() * 10));
        update_group(|| {
            a.set_value(2);
            assert_eq!(b.value(), 20);
        });
    }

    #[test]
    fn eager_evaluation_deferred() {
        let a = Property::new(1);
        let b = Property::new(0);
        b.set_binding(binding!([a] a.value() + 1));
        b.set_eager(true);
        update_group(|| {
            a.set_value(5);
            assert_eq!(b.value_bypassing_bindings(), 2);
        });
        assert_eq!(b.value_bypassing_bindings(), 6);
    }

    #[test]
    fn value_restored_inside_group_still_notifies_once() {
        let p = Property::new(0);
        let (count, _h) = count_changes(&p);
        update_group(|| {
            p.set_value(1);
            p.set_value(0);
        });
        // Enrolled once; flushed once.
        assert_eq!(count.get(), 1);
    }

    #[test]
    #[traced_test]
    fn unbalanced_end_is_ignored() {
        end_property_update_group();
        assert_eq!(update_group_depth(), 0);
        let p = Property::new(0);
        let (count, _h) = count_changes(&p);
        p.set_value(1);
        assert_eq!(count.get(), 1);
        assert!(logs_contain("without a matching begin"));
    }

    #[test]
    fn property_dropped_inside_group_is_skipped() {
        let a = Property::new(0);
        update_group(|| {
            let b = Property::new(0);
            let _h = b.on_value_changed(|_| panic!("dropped property must not notify"));
            b.set_value(1);
            a.set_value(1);
        });
        assert_eq!(a.value(), 1);
    }
}
