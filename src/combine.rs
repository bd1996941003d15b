//! Multi-input combinators
//!
//! Combining several handles raises a question that single-input chaining
//! never does: several inputs settle independently, on different workers,
//! in an order nobody controls. The shared rule across this module is that
//! the settlement slot of the combined handle is claimed exactly once, by
//! whichever input event gets there first. Fulfillment claims it once the
//! required inputs are all in; a failure claims it immediately, without
//! waiting for the remaining inputs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::future::{Settler, TaskFuture};
use crate::pool::ThreadPool;
use crate::settlement::StageError;

impl<T: Clone + Send + 'static> TaskFuture<T> {
    /// Wait for this handle and `other` to fulfill, then run `combine` on
    /// both values and fulfill the returned handle with the result
    ///
    /// The first observed failure of either input fails the returned
    /// handle immediately, without waiting for the other input.
    pub fn then_combine<U, V, F>(&self, other: &TaskFuture<U>, combine: F) -> TaskFuture<V>
    where
        U: Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        let (settler, output) = TaskFuture::pending(self.pool());
        let state = Arc::new(Mutex::new(BothState {
            left: None,
            right: None,
            combine: Some(combine),
            settler: Some(settler),
        }));

        let left_state = state.clone();
        self.attach(Box::new(move |outcome| match outcome {
            Ok(value) => {
                let claimed = {
                    let mut state = left_state.lock().unwrap();
                    state.left = Some(value);
                    state.claim()
                };
                fire(claimed);
            }
            Err(error) => fail_once(&left_state, error),
        }));

        other.attach(Box::new(move |outcome| match outcome {
            Ok(value) => {
                let claimed = {
                    let mut state = state.lock().unwrap();
                    state.right = Some(value);
                    state.claim()
                };
                fire(claimed);
            }
            Err(error) => fail_once(&state, error),
        }));
        output
    }

    /// Like [`then_combine`](TaskFuture::then_combine), but `consume`
    /// discards its result; the returned handle settles with unit
    pub fn then_accept_both<U, F>(&self, other: &TaskFuture<U>, consume: F) -> TaskFuture<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T, U) + Send + 'static,
    {
        self.then_combine(other, move |left, right| consume(left, right))
    }

    /// Run `next` once this handle and `other` have both fulfilled,
    /// ignoring both values
    pub fn run_after_both<U, F>(&self, other: &TaskFuture<U>, next: F) -> TaskFuture<()>
    where
        U: Clone + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.then_combine(other, move |_left, _right| next())
    }

    /// Adopt whichever of this handle and `other` settles first, running
    /// `next` on the value if that settlement was a fulfillment
    ///
    /// A first settlement that is a failure fails the returned handle;
    /// the slower input is ignored entirely. Repeated runs may adopt
    /// different inputs.
    pub fn apply_to_either<U, F>(&self, other: &TaskFuture<T>, next: F) -> TaskFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (settler, output) = TaskFuture::pending(self.pool());
        let claim = Arc::new(Mutex::new(Some((next, settler))));
        for input in [self, other] {
            let claim = claim.clone();
            input.attach(Box::new(move |outcome| {
                let claimed = claim.lock().unwrap().take();
                if let Some((next, settler)) = claimed {
                    match outcome {
                        Ok(value) => settler.settle_from(move || next(value)),
                        Err(error) => settler.fail(error),
                    }
                }
            }));
        }
        output
    }
}

/// Handle settling once every input handle has fulfilled
///
/// The returned handle fulfills with unit after the last input fulfills,
/// and fails with the first observed input failure; the failures of the
/// other inputs are not aggregated. An empty input set fulfills
/// immediately.
pub fn all_of<T: Clone + Send + 'static>(
    pool: &ThreadPool,
    futures: &[TaskFuture<T>],
) -> TaskFuture<()> {
    if futures.is_empty() {
        return TaskFuture::fulfilled(pool, ());
    }
    let (settler, output) = TaskFuture::pending(pool);
    let claim = Arc::new(Mutex::new(Some(settler)));
    let remaining = Arc::new(AtomicUsize::new(futures.len()));
    for future in futures {
        let claim = claim.clone();
        let remaining = remaining.clone();
        future.attach(Box::new(move |outcome| match outcome {
            Ok(_value) => {
                // The last fulfilled input completes the aggregate
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let claimed = claim.lock().unwrap().take();
                    if let Some(settler) = claimed {
                        settler.fulfill(());
                    }
                }
            }
            Err(error) => {
                let claimed = claim.lock().unwrap().take();
                if let Some(settler) = claimed {
                    settler.fail(error);
                }
            }
        }));
    }
    output
}

/// Handle adopting the first settlement among the input handles
///
/// Settles with whichever input settles first, fulfillment or failure
/// alike; which input that is may legitimately differ between runs. An
/// empty input set fails with [`StageError::Abandoned`], since a handle
/// which nothing can ever settle would otherwise park its joiners forever.
pub fn any_of<T: Clone + Send + 'static>(
    pool: &ThreadPool,
    futures: &[TaskFuture<T>],
) -> TaskFuture<T> {
    let (settler, output) = TaskFuture::pending(pool);
    if futures.is_empty() {
        settler.fail(StageError::Abandoned);
        return output;
    }
    let claim = Arc::new(Mutex::new(Some(settler)));
    for future in futures {
        let claim = claim.clone();
        future.attach(Box::new(move |outcome| {
            let claimed = claim.lock().unwrap().take();
            if let Some(settler) = claimed {
                match outcome {
                    Ok(value) => settler.fulfill(value),
                    Err(error) => settler.fail(error),
                }
            }
        }));
    }
    output
}

/// Value slots and single-use claim shared by the two sides of a
/// both-style combinator
struct BothState<T, U, V: Clone + Send + 'static, F> {
    left: Option<T>,
    right: Option<U>,
    combine: Option<F>,
    settler: Option<Settler<V>>,
}
//
impl<T, U, V: Clone + Send + 'static, F> BothState<T, U, V, F> {
    /// Claim the combiner once both values are in; succeeds at most once
    fn claim(&mut self) -> Option<(T, U, F, Settler<V>)> {
        if self.left.is_some() && self.right.is_some() {
            match (
                self.left.take(),
                self.right.take(),
                self.combine.take(),
                self.settler.take(),
            ) {
                (Some(left), Some(right), Some(combine), Some(settler)) => {
                    Some((left, right, combine, settler))
                }
                _ => None,
            }
        } else {
            None
        }
    }
}

/// Run a claimed combiner outside of the state lock
fn fire<T, U, V, F>(claimed: Option<(T, U, F, Settler<V>)>)
where
    V: Clone + Send + 'static,
    F: FnOnce(T, U) -> V,
{
    if let Some((left, right, combine, settler)) = claimed {
        settler.settle_from(move || combine(left, right));
    }
}

/// Fail the combined handle on the first observed input failure
fn fail_once<T, U, V, F>(state: &Mutex<BothState<T, U, V, F>>, error: StageError)
where
    V: Clone + Send + 'static,
{
    let claimed = state.lock().unwrap().settler.take();
    if let Some(settler) = claimed {
        settler.fail(error);
    }
}
