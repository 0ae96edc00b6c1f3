use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use once_cell::sync::Lazy;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::utils;

type Job = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: Lazy<WorkerPool> =
    Lazy::new(|| WorkerPool::with_limits(PoolLimits::from_available_parallelism()));

/// Sizing of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Threads kept alive even when idle. At least one.
    pub min_threads: usize,
    pub max_threads: usize,
    /// Jobs that may wait for a thread before submitters start running them inline.
    pub max_queue: usize,
    /// How long a thread above `min_threads` waits for work before exiting.
    pub keep_alive: Duration,
}

impl PoolLimits {
    pub fn for_parallelism(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            min_threads: 2,
            max_threads: (4 * parallelism).max(2),
            max_queue: (10 * parallelism).max(2),
            keep_alive: Duration::from_secs(60),
        }
    }

    pub fn from_available_parallelism() -> Self {
        let parallelism = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::for_parallelism(parallelism)
    }

    fn normalized(self) -> Self {
        let max_threads = self.max_threads.max(1);
        Self {
            min_threads: self.min_threads.clamp(1, max_threads),
            max_threads,
            ..self
        }
    }
}

struct Shared {
    receiver: Receiver<Job>,
    limits: PoolLimits,
    size: AtomicUsize,
    idle: AtomicUsize,
    inline_runs: AtomicUsize,
    spawned: AtomicUsize,
}

/// Bounded thread pool that never drops or indefinitely parks a submission.
///
/// Jobs go to a bounded queue served by between `min_threads` and `max_threads`
/// workers. When no worker is idle a new one is started, up to the maximum. When
/// the queue is full the submitting thread runs the job itself.
pub struct WorkerPool {
    sender: Sender<Job>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Process-wide pool sized from the available parallelism, created on first use.
    pub fn global() -> &'static WorkerPool {
        &GLOBAL
    }

    pub fn with_limits(limits: PoolLimits) -> Self {
        let limits = limits.normalized();
        let (sender, receiver) = channel::bounded(limits.max_queue);
        let pool = Self {
            sender,
            shared: Arc::new(Shared {
                receiver,
                limits,
                size: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                inline_runs: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        };

        for _ in 0..limits.min_threads {
            pool.try_grow();
        }
        tracing::debug!("Worker pool started with {:?}", limits);
        pool
    }

    /// Run `job` on a worker, or on the calling thread if the queue is full.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.idle.load(Ordering::Acquire) == 0 {
            self.try_grow();
        }

        match self.sender.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                self.shared.inline_runs.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Worker pool saturated, running job on the calling thread");
                run_job(job);
            }
        }
    }

    /// Current number of worker threads.
    pub fn size(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.shared.idle.load(Ordering::Acquire)
    }

    /// Number of jobs that ran on a submitting thread because the queue was full.
    pub fn inline_runs(&self) -> usize {
        self.shared.inline_runs.load(Ordering::Relaxed)
    }

    pub fn limits(&self) -> PoolLimits {
        self.shared.limits
    }

    fn try_grow(&self) {
        let max_threads = self.shared.limits.max_threads;
        let mut size = self.shared.size.load(Ordering::Acquire);
        loop {
            if size >= max_threads {
                return;
            }
            match self.shared.size.compare_exchange_weak(
                size,
                size + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => size = current,
            }
        }

        let id = self.shared.spawned.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("tasklane-worker-{id}"))
            .spawn(move || work(shared));

        if let Err(e) = spawned {
            self.shared.size.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("Failed to start worker thread: {}", e);
        }
    }
}

impl Debug for WorkerPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("limits", &self.shared.limits)
            .field("size", &self.size())
            .field("idle", &self.idle())
            .field("queued", &self.sender.len())
            .finish()
    }
}

fn work(shared: Arc<Shared>) {
    tracing::trace!("Worker started");
    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let received = shared.receiver.recv_timeout(shared.limits.keep_alive);
        shared.idle.fetch_sub(1, Ordering::AcqRel);

        match received {
            Ok(job) => run_job(job),
            Err(RecvTimeoutError::Timeout) => {
                if retire(&shared) {
                    tracing::trace!("Idle worker retired");
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.size.fetch_sub(1, Ordering::AcqRel);
    tracing::trace!("Worker stopped");
}

/// Give up this worker's slot if the pool is above its core size and nothing is queued.
fn retire(shared: &Shared) -> bool {
    if !shared.receiver.is_empty() {
        return false;
    }
    let mut size = shared.size.load(Ordering::Acquire);
    while size > shared.limits.min_threads {
        match shared
            .size
            .compare_exchange_weak(size, size - 1, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return true,
            Err(current) => size = current,
        }
    }
    false
}

fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!("Worker pool job panicked: {}", utils::panic_message(payload.as_ref()));
    }
}
