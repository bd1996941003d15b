//! Composable task futures on a shared worker pool
//!
//! Picture yourself in a situation where: you want to delegate a unit of
//! work to a worker thread. You know that the work is going to take some
//! time, and you have other things to do meanwhile, so you would rather not
//! wait for its completion. But you would also like to say, up front, what
//! should happen to the result once it exists: transform it, feed it into
//! another computation, merge it with the result of a second unit of work,
//! recover if it failed.
//!
//! The traditional answer is to block on the result and write the follow-up
//! inline, which gives up the concurrency you delegated the work for in the
//! first place. This crate takes the other road: submitting work returns a
//! [`TaskFuture`] handle immediately, and a set of combinators builds new
//! handles out of existing ones without blocking anybody. Each handle
//! settles exactly once, with a value or with an error, and everything
//! registered on it fires on a worker of the shared [`ThreadPool`]. The
//! only blocking operation in the whole crate is an explicit
//! [`join`](TaskFuture::join).
//!
//! Failures travel the same road as values: a panicking stage settles its
//! handle with a [`StageError`] instead of unwinding into your thread, the
//! error short-circuits past the value-oriented stages, and a recovery
//! stage ([`exceptionally`](TaskFuture::exceptionally) or
//! [`handle`](TaskFuture::handle)) can put the chain back on the success
//! track.
//!
//! # Examples
//!
//! Sequential chaining, and recovery from a failed stage:
//!
//! ```
//! use threaded_futures::ThreadPool;
//!
//! let pool = ThreadPool::with_workers(2);
//!
//! let greeting = pool
//!     .supply(|| "result A".to_string())
//!     .then_apply(|a| a + " and B");
//! assert_eq!(greeting.join(), Ok("result A and B".to_string()));
//!
//! let recovered = pool
//!     .supply(|| -> String { panic!("backend unavailable") })
//!     .exceptionally(|error| format!("fell back after: {error}"))
//!     .then_apply(|text| text + "!");
//! assert!(recovered.join().unwrap().starts_with("fell back"));
//! ```
//!
//! Parallel combination and aggregation of several handles:
//!
//! ```
//! use threaded_futures::{all_of, any_of, ThreadPool};
//!
//! let pool = ThreadPool::with_workers(4);
//!
//! let left = pool.supply(|| 40);
//! let right = pool.supply(|| 2);
//! assert_eq!(left.then_combine(&right, |a, b| a + b).join(), Ok(42));
//!
//! let parts: Vec<_> = (0..4).map(|i| pool.supply(move || i * i)).collect();
//! assert_eq!(all_of(&pool, &parts).join(), Ok(()));
//! assert!(any_of(&pool, &parts).join().is_ok());
//! ```

mod chain;
pub mod combine;
pub mod future;
pub mod pool;
pub mod settlement;

pub use combine::{all_of, any_of};
pub use future::{Settler, TaskFuture};
pub use pool::{default_pool, run, supply, ThreadPool};
pub use settlement::{Outcome, Settlement, StageError};
