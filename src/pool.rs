//! Shared worker pool executing submitted work and continuations
//!
//! Whenever work is delegated to another thread, one important design issue
//! is to decide where that work should actually run. Spawning a fresh thread
//! per unit of work is simple, but the cost of thread creation quickly
//! dwarfs the work itself when many small stages are chained together.
//!
//! For this reason, we would rather have a fixed set of worker threads
//! draining a shared job queue. Submitted units of work go through this
//! queue, and so do the continuations which combinators attach to task
//! handles: a continuation never runs inline on the thread which attached
//! it, only on a worker. The submitting thread therefore never blocks,
//! except at an explicit join.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, trace};
use once_cell::sync::Lazy;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::future::TaskFuture;

/// Unit of work shipped to the worker threads
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cheaply cloneable handle to a shared worker pool
///
/// All clones submit to the same job queue. Task handles keep a clone of
/// their pool, so the workers stay up for as long as anything that could
/// still dispatch a continuation is alive.
#[derive(Clone)]
pub struct ThreadPool {
    /// Reference-counted pool state
    shared: Arc<PoolShared>,
}
//
impl ThreadPool {
    /// Create a pool with one worker per available CPU
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get())
    }

    /// Create a pool with an explicit worker count
    pub fn with_workers(count: usize) -> Self {
        assert!(count > 0, "a worker pool needs at least one worker");

        // Set up the shared job queue...
        let (sender, receiver) = unbounded::<Job>();

        // ...then bring up the workers, each holding its own receiver
        let workers = (0..count)
            .map(|index| spawn_worker(index, receiver.clone()))
            .collect();
        ThreadPool {
            shared: Arc::new(PoolShared {
                sender: Some(sender),
                workers,
            }),
        }
    }

    /// Number of worker threads in this pool
    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Submit a fire-and-forget job to the pool
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The sender is only vacated during teardown, which cannot run
        // while this handle is alive. The send itself can only fail if
        // every worker died, which the panic guard in the worker loop
        // prevents; dropping the job on the floor then settles any handle
        // it was carrying as abandoned.
        if let Some(sender) = self.shared.sender.as_ref() {
            if sender.send(Box::new(job)).is_err() {
                error!("job queue disconnected, dropping a job");
            }
        }
    }

    /// Run value-producing work on the pool, returning a pending handle to
    /// its eventual outcome
    ///
    /// The handle settles with the closure's return value, or with a
    /// [`StageError::Panicked`](crate::StageError::Panicked) if the closure
    /// panics; the panic never unwinds into the submitting thread.
    pub fn supply<T, F>(&self, work: F) -> TaskFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (settler, future) = TaskFuture::pending(self);
        self.execute(move || settler.settle_from(work));
        future
    }

    /// Run value-less work on the pool
    ///
    /// The returned handle settles with the unit value once the work has
    /// completed, which makes it usable as a pure sequencing point.
    pub fn run<F>(&self, work: F) -> TaskFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.supply(work)
    }
}
//
impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between all handles to one pool
struct PoolShared {
    /// Job submission side of the queue; vacated on teardown so that the
    /// workers observe a disconnect
    sender: Option<Sender<Job>>,

    /// Handles of the worker threads, collected on teardown
    workers: Vec<JoinHandle<()>>,
}
//
impl Drop for PoolShared {
    /// Disconnect the job queue, then collect the workers
    ///
    /// The last pool handle can be dropped from inside a worker thread (a
    /// continuation may hold the last clone), and joining the current
    /// thread would deadlock; that worker exits on its own right after.
    fn drop(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

/// Bring up one worker thread draining the shared job queue
fn spawn_worker(index: usize, receiver: Receiver<Job>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("task-worker-{index}"))
        .spawn(move || worker_loop(receiver))
        .expect("failed to spawn a worker thread")
}

/// Worker thread body: drain the job queue until it disconnects
fn worker_loop(receiver: Receiver<Job>) {
    let name = thread::current()
        .name()
        .unwrap_or("task-worker")
        .to_string();
    trace!("worker '{name}' starting");
    while let Ok(job) = receiver.recv() {
        // A panicking job must not take the worker down with it. Stage
        // wrappers settle their handle before a panic reaches this frame,
        // so only raw execute() jobs can trip this guard.
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("worker '{name}' caught a panicking job");
        }
    }
    trace!("worker '{name}' exiting");
}

/// Process-wide default pool, brought up on first use
static DEFAULT_POOL: Lazy<ThreadPool> = Lazy::new(ThreadPool::new);

/// Access the process-wide default pool
pub fn default_pool() -> &'static ThreadPool {
    &DEFAULT_POOL
}

/// Run value-producing work on the default pool
pub fn supply<T, F>(work: F) -> TaskFuture<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    default_pool().supply(work)
}

/// Run value-less work on the default pool
pub fn run<F>(work: F) -> TaskFuture<()>
where
    F: FnOnce() + Send + 'static,
{
    default_pool().run(work)
}
