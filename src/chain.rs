//! Single-input combinators
//!
//! A combinator builds a new pending handle from an existing one plus a
//! closure, and wires the closure up as a continuation. The value-carrying
//! combinators short-circuit on error: when the predecessor settles with an
//! error, their closure is skipped entirely and the error propagates to the
//! new handle, until an [`exceptionally`](TaskFuture::exceptionally) or
//! [`handle`](TaskFuture::handle) stage intercepts it.
//!
//! A panic inside any stage closure settles that stage's handle with the
//! captured panic, following the same propagation rules as any other stage
//! failure.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::future::TaskFuture;
use crate::settlement::{Outcome, StageError};

impl<T: Clone + Send + 'static> TaskFuture<T> {
    /// When this handle fulfills, run `next` on its value and fulfill the
    /// returned handle with the result; an error skips `next` and
    /// propagates
    pub fn then_apply<U, F>(&self, next: F) -> TaskFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (settler, output) = TaskFuture::pending(self.pool());
        self.attach(Box::new(move |outcome| match outcome {
            Ok(value) => settler.settle_from(move || next(value)),
            Err(error) => settler.fail(error),
        }));
        output
    }

    /// Like [`then_apply`](TaskFuture::then_apply), but `next` consumes the
    /// value without producing one; the returned handle settles with unit
    pub fn then_accept<F>(&self, next: F) -> TaskFuture<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.then_apply(move |value| next(value))
    }

    /// Like [`then_apply`](TaskFuture::then_apply), but `next` ignores the
    /// value entirely and serves as a pure sequencing step
    pub fn then_run<F>(&self, next: F) -> TaskFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_apply(move |_value| next())
    }

    /// When this handle fulfills, run `next` on its value and settle the
    /// returned handle with the outcome of the handle that `next` returns
    ///
    /// This is the flattening chain step: it avoids the nested handle that
    /// [`then_apply`](TaskFuture::then_apply) would produce when `next`
    /// itself starts asynchronous work.
    pub fn then_compose<U, F>(&self, next: F) -> TaskFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> TaskFuture<U> + Send + 'static,
    {
        let (settler, output) = TaskFuture::pending(self.pool());
        self.attach(Box::new(move |outcome| match outcome {
            Err(error) => settler.fail(error),
            Ok(value) => match catch_unwind(AssertUnwindSafe(move || next(value))) {
                Err(payload) => settler.fail(StageError::from_panic(payload)),
                Ok(inner) => inner.attach(Box::new(move |inner_outcome| match inner_outcome {
                    Ok(value) => settler.fulfill(value),
                    Err(error) => settler.fail(error),
                })),
            },
        }));
        output
    }

    /// If this handle fails, run `recover` on the error and fulfill the
    /// returned handle with its result; a fulfilled value passes through
    /// unchanged and `recover` is never invoked
    pub fn exceptionally<F>(&self, recover: F) -> TaskFuture<T>
    where
        F: FnOnce(StageError) -> T + Send + 'static,
    {
        let (settler, output) = TaskFuture::pending(self.pool());
        self.attach(Box::new(move |outcome| match outcome {
            Ok(value) => settler.fulfill(value),
            Err(error) => settler.settle_from(move || recover(error)),
        }));
        output
    }

    /// Run `combine` on the settled outcome, whichever side it is, and
    /// settle the returned handle with its result
    ///
    /// This is the one single-input combinator that can turn a failed
    /// predecessor into a fulfilled successor of a different type, which
    /// makes it the natural place to funnel a chain back onto the success
    /// track for further composition.
    pub fn handle<U, F>(&self, combine: F) -> TaskFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Outcome<T>) -> U + Send + 'static,
    {
        let (settler, output) = TaskFuture::pending(self.pool());
        self.attach(Box::new(move |outcome| {
            settler.settle_from(move || combine(outcome))
        }));
        output
    }
}

/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ThreadPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pool() -> ThreadPool {
        ThreadPool::with_workers(2)
    }

    /// Check that chained stages compose like plain function application
    #[test]
    fn sequential_composition() {
        let pool = pool();
        let composed = pool.supply(|| 21).then_apply(|value| value * 2);
        assert_eq!(composed.join(), Ok(42));
    }

    /// Check that then_accept consumes the value and settles with unit
    #[test]
    fn accept_consumes_value() {
        let pool = pool();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let done = pool
            .supply(|| 42)
            .then_accept(move |value| sink.store(value, Ordering::SeqCst));
        assert_eq!(done.join(), Ok(()));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    /// Check that then_run sequences without looking at the value
    #[test]
    fn run_ignores_value() {
        let pool = pool();
        let ran = Arc::new(AtomicUsize::new(0));
        let marker = ran.clone();
        let done = pool
            .supply(|| "ignored")
            .then_run(move || {
                marker.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(done.join(), Ok(()));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    /// Check that an error skips downstream value stages entirely
    #[test]
    fn errors_short_circuit() {
        let pool = pool();
        let reached = Arc::new(AtomicUsize::new(0));
        let marker = reached.clone();
        let chained = pool
            .supply(|| -> i32 { panic!("boom") })
            .then_apply(move |value| {
                marker.fetch_add(1, Ordering::SeqCst);
                value + 1
            })
            .then_run(|| {});
        assert_eq!(chained.join(), Err(StageError::Panicked("boom".into())));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    /// Check that exceptionally is skipped when its predecessor fulfills
    #[test]
    fn recovery_skipped_on_success() {
        let pool = pool();
        let invoked = Arc::new(AtomicUsize::new(0));
        let marker = invoked.clone();
        let passed_through = pool.supply(|| 42).exceptionally(move |_error| {
            marker.fetch_add(1, Ordering::SeqCst);
            0
        });
        assert_eq!(passed_through.join(), Ok(42));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    /// Check that a failed stage is recovered exactly once and the chain
    /// continues on the success track
    #[test]
    fn recovery_after_failure() {
        let pool = pool();
        let invoked = Arc::new(AtomicUsize::new(0));
        let marker = invoked.clone();
        let recovered = pool
            .supply(|| -> String { panic!("backend down") })
            .exceptionally(move |_error| {
                marker.fetch_add(1, Ordering::SeqCst);
                "R".to_string()
            })
            .then_apply(|recovered| recovered + "X");
        assert_eq!(recovered.join(), Ok("RX".to_string()));
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    /// Check that handle inspects either side of the outcome and funnels a
    /// failed chain back onto the success track
    #[test]
    fn interception_after_failure() {
        let pool = pool();
        let value = pool
            .supply(|| "A".to_string())
            .then_apply(|a| a + "B")
            .then_apply(|_b| -> String { panic!("stage blew up") })
            .handle(|outcome| match outcome {
                Ok(value) => value,
                Err(_error) => "C".to_string(),
            })
            .then_apply(|c| c + "D");
        assert_eq!(value.join(), Ok("CD".to_string()));
    }

    /// Check that handle passes fulfilled values through its closure
    #[test]
    fn interception_on_success() {
        let pool = pool();
        let doubled = pool.supply(|| 21).handle(|outcome| match outcome {
            Ok(value) => value * 2,
            Err(_error) => 0,
        });
        assert_eq!(doubled.join(), Ok(42));
    }

    /// Check that then_compose flattens a nested asynchronous step
    #[test]
    fn composition_flattens() {
        let pool = pool();
        let inner_pool = pool.clone();
        let flattened = pool
            .supply(|| 6)
            .then_compose(move |value| inner_pool.supply(move || value * 7));
        assert_eq!(flattened.join(), Ok(42));
    }

    /// Check that then_compose propagates both outer and inner failures
    #[test]
    fn composition_propagates_failures() {
        let pool = pool();

        // Outer failure: the composing closure never runs
        let inner_pool = pool.clone();
        let outer_failed = pool
            .supply(|| -> i32 { panic!("outer") })
            .then_compose(move |value| inner_pool.supply(move || value + 1));
        assert_eq!(
            outer_failed.join(),
            Err(StageError::Panicked("outer".into()))
        );

        // Inner failure: the composed handle's error is adopted
        let inner_pool = pool.clone();
        let inner_failed = pool.supply(|| 1).then_compose(move |_value| {
            inner_pool.supply(|| -> i32 { panic!("inner") })
        });
        assert_eq!(
            inner_failed.join(),
            Err(StageError::Panicked("inner".into()))
        );
    }

    /// Check that preset failures short-circuit like any stage failure
    #[test]
    fn preset_failure_short_circuits() {
        let pool = pool();
        let failed = TaskFuture::<i32>::failed(&pool, StageError::failed("nope"));
        let chained = failed.then_apply(|value| value + 1);
        assert_eq!(chained.join(), Err(StageError::failed("nope")));
    }
}
