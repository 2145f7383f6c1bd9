#![forbid(unsafe_code)]

//! Per-thread binding status: which binding is evaluating, and whether an
//! update group is open.
//!
//! Every thread owns an independent status record. A binding pushes an
//! evaluation frame while its function runs; each property read during that
//! time is recorded into the top frame. This is how binding functions "just
//! read properties" without declaring their inputs.
//!
//! Properties and bindings are `!Send`, so a graph cannot migrate between
//! threads and never observes another thread's frames. A thread that has
//! never evaluated anything starts with an empty status.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::binding::{BindingPrivate, UntypedPropertyBinding};
use crate::binding_data::{PropertyNode, node_addr};
use crate::error::BindingError;
use crate::group::UpdateGroupStack;

thread_local! {
    static STATUS: BindingStatus = BindingStatus::default();
}

/// Thread-local engine state.
#[derive(Default)]
pub(crate) struct BindingStatus {
    frames: RefCell<Vec<EvaluationFrame>>,
    pub(crate) groups: RefCell<UpdateGroupStack>,
}

/// Run `f` against this thread's status.
///
/// Returns `None` during thread teardown, after the status was destroyed.
pub(crate) fn with_status<R>(f: impl FnOnce(&BindingStatus) -> R) -> Option<R> {
    STATUS.try_with(f).ok()
}

struct EvaluationFrame {
    binding: Rc<BindingPrivate>,
    captured: Vec<Weak<dyn PropertyNode>>,
    seen: AHashSet<usize>,
    error: Option<BindingError>,
}

/// What one evaluation pass observed.
pub(crate) struct FrameOutcome {
    /// Properties read, in first-read order, without duplicates.
    pub(crate) captured: Vec<Weak<dyn PropertyNode>>,
    /// Error reported by the binding function, if any.
    pub(crate) error: Option<BindingError>,
}

/// RAII frame for one binding evaluation.
///
/// Keeps the frame stack balanced and the binding's `evaluating` flag
/// accurate even if the binding function panics.
pub(crate) struct EvaluationGuard {
    binding: Rc<BindingPrivate>,
    finished: bool,
}

impl EvaluationGuard {
    pub(crate) fn enter(binding: &Rc<BindingPrivate>) -> Self {
        binding.set_evaluating(true);
        with_status(|status| {
            status.frames.borrow_mut().push(EvaluationFrame {
                binding: Rc::clone(binding),
                captured: Vec::new(),
                seen: AHashSet::new(),
                error: None,
            });
        });
        Self {
            binding: Rc::clone(binding),
            finished: false,
        }
    }

    pub(crate) fn finish(mut self) -> FrameOutcome {
        self.finished = true;
        match self.pop() {
            Some(frame) => FrameOutcome {
                captured: frame.captured,
                error: frame.error,
            },
            None => FrameOutcome {
                captured: Vec::new(),
                error: None,
            },
        }
    }

    fn pop(&self) -> Option<EvaluationFrame> {
        self.binding.set_evaluating(false);
        let frame = with_status(|status| status.frames.borrow_mut().pop()).flatten();
        debug_assert!(
            frame
                .as_ref()
                .is_none_or(|f| Rc::ptr_eq(&f.binding, &self.binding)),
            "evaluation frames popped out of order"
        );
        frame
    }
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Record `node` as a dependency of the binding evaluating on this thread.
///
/// Reads of the evaluating binding's own property are not recorded: a binding
/// never depends on itself.
pub(crate) fn capture_dependency(node: &Rc<dyn PropertyNode>) {
    with_status(|status| {
        let mut frames = status.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        let own = node
            .binding_data()
            .binding()
            .is_some_and(|b| Rc::ptr_eq(&b, &frame.binding));
        if !own && frame.seen.insert(node_addr(node)) {
            frame.captured.push(Rc::downgrade(node));
        }
    });
}

/// Whether the binding evaluating on this thread reported an error.
pub(crate) fn evaluation_failed() -> bool {
    with_status(|status| {
        status
            .frames
            .borrow()
            .last()
            .is_some_and(|f| f.error.is_some())
    })
    .unwrap_or(false)
}

/// Fail the in-flight evaluation of `binding` so its result is discarded.
pub(crate) fn fail_evaluation_of(binding: &BindingPrivate, error: BindingError) {
    with_status(|status| {
        let mut frames = status.frames.borrow_mut();
        if let Some(frame) = frames
            .iter_mut()
            .rev()
            .find(|f| std::ptr::eq(Rc::as_ptr(&f.binding), binding))
        {
            frame.error = Some(error);
        }
    });
}

/// The binding currently evaluating on this thread, if any.
#[must_use]
pub fn currently_evaluating_binding() -> Option<UntypedPropertyBinding> {
    with_status(|status| {
        status
            .frames
            .borrow()
            .last()
            .map(|f| UntypedPropertyBinding::from_private(Rc::clone(&f.binding)))
    })
    .flatten()
}

/// Whether any binding is evaluating on this thread.
#[must_use]
pub fn is_any_binding_evaluating() -> bool {
    with_status(|status| !status.frames.borrow().is_empty()).unwrap_or(false)
}

/// Report a failure from inside a binding function.
///
/// The evaluating binding keeps its previous value and exposes `error`
/// through [`PropertyBinding::error`](crate::PropertyBinding::error) until
/// its next successful evaluation. Returns `false` when called outside of a
/// binding evaluation.
///
/// ```
/// use ftui_property::{BindingError, Property, PropertyBinding, report_binding_error};
///
/// let width = Property::new(10);
/// let area = Property::new(0);
/// let w = width.clone();
/// area.set_binding(PropertyBinding::new(move || {
///     let w = w.value();
///     if w < 0 {
///         report_binding_error(BindingError::evaluation("negative width"));
///     }
///     w * 2
/// }));
/// assert_eq!(area.value(), 20);
///
/// width.set_value(-1);
/// assert_eq!(area.value(), 20);
/// assert!(area.binding().unwrap().error().has_error());
/// ```
pub fn report_binding_error(error: BindingError) -> bool {
    with_status(|status| match status.frames.borrow_mut().last_mut() {
        Some(frame) => {
            frame.error = Some(error);
            true
        }
        None => false,
    })
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingErrorKind, Property, PropertyBinding};
    use std::cell::Cell;

    #[test]
    fn nothing_evaluating_by_default() {
        assert!(!is_any_binding_evaluating());
        assert!(currently_evaluating_binding().is_none());
    }

    #[test]
    fn report_outside_evaluation_is_rejected() {
        assert!(!report_binding_error(BindingError::evaluation("nope")));
    }

    #[test]
    fn binding_sees_itself_as_current() {
        let seen = Rc::new(Cell::new(false));
        let s = Rc::clone(&seen);
        let prop = Property::new(0);
        let binding = PropertyBinding::new(move || {
            s.set(is_any_binding_evaluating() && currently_evaluating_binding().is_some());
            1
        });
        prop.set_binding(binding.clone());
        assert!(seen.get());
        assert!(!is_any_binding_evaluating(), "frame must be popped");
        assert_eq!(prop.value(), 1);
    }

    #[test]
    fn reported_error_keeps_previous_value() {
        let input = Property::new(1);
        let output = Property::new(0);
        let i = input.clone();
        output.set_binding(PropertyBinding::new(move || {
            let v = i.value();
            if v > 5 {
                report_binding_error(BindingError::evaluation("too large"));
            }
            v
        }));
        assert_eq!(output.value(), 1);

        input.set_value(9);
        assert_eq!(output.value(), 1, "failed evaluation keeps last good value");
        let err = output.binding().map(|b| b.error()).unwrap_or_default();
        assert_eq!(err.kind(), BindingErrorKind::EvaluationError);
        assert_eq!(err.description(), "too large");

        input.set_value(3);
        assert_eq!(output.value(), 3);
        assert!(!output.binding().is_some_and(|b| b.error().has_error()));
    }

    #[test]
    fn each_thread_has_its_own_status() {
        let prop = Property::new(0);
        let inner = Rc::new(Cell::new(true));
        let flag = Rc::clone(&inner);
        prop.set_binding(PropertyBinding::new(move || {
            let other = std::thread::spawn(is_any_binding_evaluating)
                .join()
                .unwrap_or(true);
            flag.set(other);
            2
        }));
        assert!(!inner.get(), "a fresh thread must not see this thread's frame");
    }
}
