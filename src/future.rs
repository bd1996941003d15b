//! Task handles and their settling side
//!
//! This module provides the handle through which the eventual outcome of a
//! unit of work is observed. A handle starts out pending, settles exactly
//! once, and supports two consumption styles: blocking (a joiner parks on a
//! condition variable until settlement) and continuation-based (a closure
//! registered on the handle is dispatched to the worker pool once the
//! handle settles).
//!
//! The handle and its settling side are two views of one piece of shared
//! state, split so that they can be sent to different threads: whichever
//! worker executes the unit of work holds the [`Settler`], and everyone
//! else holds [`TaskFuture`] clones.

use log::trace;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::pool::ThreadPool;
use crate::settlement::{Outcome, Settlement, StageError};

/// Continuation fired exactly once with the settled outcome
pub(crate) type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// State shared between a task handle and its settler
struct Shared<T> {
    /// Settlement slot and registered continuations (mutex-protected)
    cell: Mutex<SettleCell<T>>,

    /// Condition variable used to wake joiners on settlement
    settled_cv: Condvar,

    /// Continuations are dispatched to this pool, never run inline
    pool: ThreadPool,
}
//
struct SettleCell<T> {
    /// Current settlement state
    state: Settlement<T>,

    /// Continuations awaiting the transition out of Pending
    continuations: Vec<Continuation<T>>,
}
//
impl<T: Clone + Send + 'static> Shared<T> {
    /// Build fresh shared state in a given settlement state
    fn new(pool: &ThreadPool, state: Settlement<T>) -> Arc<Self> {
        Arc::new(Shared {
            cell: Mutex::new(SettleCell {
                state,
                continuations: Vec::new(),
            }),
            settled_cv: Condvar::new(),
            pool: pool.clone(),
        })
    }

    /// Write the settlement slot
    ///
    /// The first writer wins; later attempts are ignored, which is what
    /// racing inputs of the any-style combinators rely on. Returns whether
    /// this call performed the transition.
    fn try_settle(&self, outcome: Outcome<T>) -> bool {
        // Take the transition under the lock...
        let mut cell = self.cell.lock().unwrap();
        if cell.state.is_settled() {
            return false;
        }
        cell.state = match outcome.clone() {
            Ok(value) => Settlement::Fulfilled(value),
            Err(error) => Settlement::Failed(error),
        };
        let continuations = mem::take(&mut cell.continuations);
        drop(cell);

        // ...then wake the joiners and dispatch the continuations outside
        // of it, each with its own snapshot of the outcome
        self.settled_cv.notify_all();
        for continuation in continuations {
            let observed = outcome.clone();
            self.pool.execute(move || continuation(observed));
        }
        true
    }

    /// Register a continuation, dispatching immediately if already settled
    fn attach(&self, continuation: Continuation<T>) {
        let mut cell = self.cell.lock().unwrap();
        match cell.state.outcome() {
            None => cell.continuations.push(continuation),
            Some(outcome) => {
                drop(cell);
                self.pool.execute(move || continuation(outcome));
            }
        }
    }
}

/// Handle to the eventual outcome of an asynchronously executed unit of work
///
/// Handles are cheap to clone, and every clone observes the same
/// settlement. The value type must be `Clone` for the same reason: any
/// number of continuations and joiners may each take a copy of the outcome.
pub struct TaskFuture<T> {
    /// Reference-counted shared state
    shared: Arc<Shared<T>>,
}
//
impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        TaskFuture {
            shared: self.shared.clone(),
        }
    }
}
//
impl<T: Clone + Send + 'static> TaskFuture<T> {
    /// Create an unsettled handle together with its settling side
    ///
    /// This is the seam through which work is wired to the pool: the
    /// settler goes wherever the work runs, the handle stays with whoever
    /// wants the outcome.
    pub fn pending(pool: &ThreadPool) -> (Settler<T>, TaskFuture<T>) {
        let shared = Shared::new(pool, Settlement::Pending);
        (
            Settler {
                shared: shared.clone(),
                attempted: false,
            },
            TaskFuture { shared },
        )
    }

    /// Create a handle which is already fulfilled with a value
    pub fn fulfilled(pool: &ThreadPool, value: T) -> Self {
        TaskFuture {
            shared: Shared::new(pool, Settlement::Fulfilled(value)),
        }
    }

    /// Create a handle which has already failed with an error
    pub fn failed(pool: &ThreadPool, error: StageError) -> Self {
        TaskFuture {
            shared: Shared::new(pool, Settlement::Failed(error)),
        }
    }

    /// Check whether the handle has settled yet, without blocking
    pub fn is_settled(&self) -> bool {
        self.shared.cell.lock().unwrap().state.is_settled()
    }

    /// Snapshot the outcome without blocking, or None while pending
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.shared.cell.lock().unwrap().state.outcome()
    }

    /// Block the calling thread until the handle settles
    ///
    /// This is the only place where a consumer of this crate blocks; every
    /// combinator is a non-blocking registration. An error settlement is
    /// handed back as the `Err` side of the outcome.
    pub fn join(&self) -> Outcome<T> {
        let mut cell = self.shared.cell.lock().unwrap();
        loop {
            match cell.state.outcome() {
                Some(outcome) => return outcome,
                None => cell = self.shared.settled_cv.wait(cell).unwrap(),
            }
        }
    }

    /// Block until the handle settles or the timeout elapses
    ///
    /// Returns None if the handle was still pending when the timeout
    /// expired.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.shared.cell.lock().unwrap();
        loop {
            if let Some(outcome) = cell.state.outcome() {
                return Some(outcome);
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return None,
            };
            let (reacquired, _timed_out) = self
                .shared
                .settled_cv
                .wait_timeout(cell, remaining)
                .unwrap();
            cell = reacquired;
        }
    }

    /// Register a continuation to be dispatched on settlement
    pub(crate) fn attach(&self, continuation: Continuation<T>) {
        self.shared.attach(continuation);
    }

    /// Access the pool backing this handle
    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.shared.pool
    }
}

/// Settling side of a task handle
///
/// A settler is consumed by settling, which makes "settles at most once
/// per settler" a compile-time property. Combinators with several racing
/// inputs instead claim a shared settler, and the settlement slot itself
/// enforces that the first writer wins.
pub struct Settler<T: Clone + Send + 'static> {
    /// Reference-counted shared state
    shared: Arc<Shared<T>>,

    /// Whether a settlement was attempted, to tell deliberate settlement
    /// apart from abandonment on drop
    attempted: bool,
}
//
impl<T: Clone + Send + 'static> Settler<T> {
    /// Fulfill the associated handle with a value
    ///
    /// Has no effect if the handle has settled already.
    pub fn fulfill(mut self, value: T) {
        self.attempted = true;
        self.shared.try_settle(Ok(value));
    }

    /// Fail the associated handle with an error
    ///
    /// Has no effect if the handle has settled already.
    pub fn fail(mut self, error: StageError) {
        self.attempted = true;
        self.shared.try_settle(Err(error));
    }

    /// Run a stage closure to completion, fulfilling the handle with its
    /// value or failing it with the captured panic
    pub(crate) fn settle_from(self, stage: impl FnOnce() -> T) {
        match catch_unwind(AssertUnwindSafe(stage)) {
            Ok(value) => self.fulfill(value),
            Err(payload) => self.fail(StageError::from_panic(payload)),
        }
    }
}
//
impl<T: Clone + Send + 'static> Drop for Settler<T> {
    /// A settler dropped before settling would leave joiners parked
    /// forever; settle the handle with an abandonment error instead
    fn drop(&mut self) {
        if !self.attempted {
            trace!("settler dropped before settling, abandoning its handle");
            self.shared.try_settle(Err(StageError::Abandoned));
        }
    }
}
