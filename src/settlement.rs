//! Facilities to represent the settlement of asynchronous tasks
//!
//! This module provides facilities to represent and reason about the outcome
//! of asynchronously executed work. The model is the following: every task
//! handle is a small state machine which starts out in a pending state when
//! the work is submitted, and settles exactly once, either with the value
//! that the work produced or with an error describing why no value will ever
//! be produced.
//!
//! Settlement is irreversible. Once a handle has left the pending state, its
//! outcome is frozen, and every continuation and joiner attached to the
//! handle observes that same outcome.

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Outcome of a settled task, as observed by continuations and joiners
///
/// `Result` makes the settlement dichotomy structural: a settled handle
/// carries exactly one of a value or an error, never both, never neither.
pub type Outcome<T> = Result<T, StageError>;

/// Representation of a task handle's settlement state
///
/// This enumeration follows a state machine design. Here are the possible
/// state transitions:
///
/// - Pending -> Fulfilled / Failed
///
/// Note that once a handle is in either of the Fulfilled or Failed states,
/// its state won't change anymore.
#[derive(Clone, Debug, PartialEq)]
pub enum Settlement<T> {
    /// The work has been submitted, but no outcome has been produced yet
    Pending,

    /// The work ran to completion and produced a value
    Fulfilled(T),

    /// The work will never produce a value, for the attached reason
    Failed(StageError),
}
//
impl<T> Settlement<T> {
    /// Check if a settlement state is final (i.e. won't change anymore)
    pub fn is_settled(&self) -> bool {
        match *self {
            Settlement::Pending => false,
            Settlement::Fulfilled(_) | Settlement::Failed(_) => true,
        }
    }
}
//
impl<T: Clone> Settlement<T> {
    /// Snapshot the outcome of a settled handle, or None while pending
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match self {
            Settlement::Pending => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Failed(error) => Some(Err(error.clone())),
        }
    }
}

/// Errors which can settle a task handle
///
/// A failure inside a stage does not unwind into the thread which submitted
/// the work. It settles the stage's handle instead, and propagates from
/// there through whatever combinator chain was built on top of the handle.
/// Since every dependent stage and joiner observes the same error, the
/// variants are cheap to clone.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    /// The stage reported failure with the given cause
    #[error("stage failed: {0}")]
    Failed(Arc<str>),

    /// The stage's closure panicked; the payload is carried as text
    #[error("stage panicked: {0}")]
    Panicked(Arc<str>),

    /// The fulfilling side of the stage went away before settling
    #[error("stage abandoned before settling")]
    Abandoned,
}
//
impl StageError {
    /// Build an explicit failure from any printable cause
    pub fn failed(cause: impl Into<String>) -> Self {
        StageError::Failed(cause.into().into())
    }

    /// Convert a caught panic payload into a stage error
    ///
    /// Panic payloads are almost always `&str` or `String`; anything else
    /// is kept but cannot be rendered.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let text = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        StageError::Panicked(text.into())
    }
}

/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    /// Test that settlement states report finality correctly
    #[test]
    fn finality() {
        assert!(!Settlement::<i32>::Pending.is_settled());
        assert!(Settlement::Fulfilled(42).is_settled());
        assert!(Settlement::<i32>::Failed(StageError::Abandoned).is_settled());
    }

    /// Test that outcome snapshots match the settlement state
    #[test]
    fn outcome_snapshot() {
        assert_eq!(Settlement::<i32>::Pending.outcome(), None);
        assert_eq!(Settlement::Fulfilled(42).outcome(), Some(Ok(42)));
        assert_eq!(
            Settlement::<i32>::Failed(StageError::Abandoned).outcome(),
            Some(Err(StageError::Abandoned))
        );
    }

    /// Test that explicit failures compare by cause text
    #[test]
    fn explicit_failure() {
        let error = StageError::failed("backend unavailable");
        assert_eq!(error, StageError::failed("backend unavailable"));
        assert_ne!(error, StageError::failed("some other cause"));
        assert_eq!(error.to_string(), "stage failed: backend unavailable");
    }

    /// Test that panic payloads of the usual shapes are captured as text
    #[test]
    fn panic_payloads() {
        let from_str = StageError::from_panic(Box::new("boom"));
        assert_eq!(from_str, StageError::Panicked("boom".into()));

        let from_string = StageError::from_panic(Box::new("boom".to_string()));
        assert_eq!(from_string, StageError::Panicked("boom".into()));

        let from_other = StageError::from_panic(Box::new(42));
        assert_eq!(
            from_other,
            StageError::Panicked("<non-string panic payload>".into())
        );
    }
}
