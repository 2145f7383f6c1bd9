#![forbid(unsafe_code)]

//! Binding evaluation errors.
//!
//! Errors are local to a binding: they never propagate out of
//! [`Property::value`](crate::Property::value) or
//! [`Property::set_binding`](crate::Property::set_binding). Callers poll them
//! through [`PropertyBinding::error`](crate::PropertyBinding::error).
//!
//! | Kind | Cause | Recovery |
//! |------|-------|----------|
//! | `BindingLoop` | Binding re-entered while evaluating, or replaced from inside its own evaluation | Previous value kept |
//! | `EvaluationError` | Binding function called [`report_binding_error`](crate::report_binding_error) | Previous value kept |
//! | `UnknownError` | Generic failure | Previous value kept |

use std::fmt;

/// Classification of a [`BindingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BindingErrorKind {
    /// The binding evaluated successfully.
    #[default]
    NoError,
    /// The binding was asked to evaluate while it was already evaluating.
    BindingLoop,
    /// The binding function reported a semantic failure.
    EvaluationError,
    /// Reserved for failures that fit no other kind.
    UnknownError,
}

impl BindingErrorKind {
    fn label(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::BindingLoop => "binding loop",
            Self::EvaluationError => "evaluation error",
            Self::UnknownError => "unknown error",
        }
    }
}

/// Error state attached to a binding after its most recent evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindingError {
    kind: BindingErrorKind,
    description: String,
}

impl BindingError {
    /// Create an error of the given kind with a human-readable description.
    #[must_use]
    pub fn new(kind: BindingErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Shorthand for a [`BindingErrorKind::BindingLoop`] error.
    #[must_use]
    pub fn binding_loop(description: impl Into<String>) -> Self {
        Self::new(BindingErrorKind::BindingLoop, description)
    }

    /// Shorthand for a [`BindingErrorKind::EvaluationError`] error.
    #[must_use]
    pub fn evaluation(description: impl Into<String>) -> Self {
        Self::new(BindingErrorKind::EvaluationError, description)
    }

    /// The error kind.
    #[must_use]
    pub fn kind(&self) -> BindingErrorKind {
        self.kind
    }

    /// The description supplied when the error was recorded. May be empty.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether this represents an actual failure.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.kind != BindingErrorKind::NoError
    }
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.kind.label())
        } else {
            write!(f, "{}: {}", self.kind.label(), self.description)
        }
    }
}

impl std::error::Error for BindingError {}
