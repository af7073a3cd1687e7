//! Bounded worker pool with caller-runs backpressure.
//!
//! Jobs go into a bounded backlog drained by `core_size` long-lived workers.
//! When the backlog is full, extra workers are started, up to `max_size`, and
//! each of those retires after `keep_alive` without work. When the backlog is
//! full and every worker slot is taken, `submit` runs the job on the caller's
//! task, which stalls the caller until it finishes.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::WorkerPoolConfig;
use crate::metrics_consts::{
    CALLER_RUNS, TASKS_PANICKED, WORKERS_LIVE, WORKERS_RETIRED, WORKERS_SPAWNED, WORKER_BLOCKED,
};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Handed to a newly started extra worker.
    Spawned,
    /// Ran to completion on the submitting task.
    RanInline,
}

#[derive(Error, Debug)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

struct Shared {
    jobs: Mutex<mpsc::Receiver<Job>>,
    live: AtomicUsize,
    max_size: usize,
    keep_alive: Duration,
}

impl Shared {
    async fn next_job(&self) -> Option<Job> {
        self.jobs.lock().await.recv().await
    }

    fn record_live(&self) {
        metrics::gauge!(WORKERS_LIVE).set(self.live.load(Ordering::SeqCst) as f64);
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    shared: Arc<Shared>,
    // Each worker holds a clone; recv() yields None once they have all exited
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

impl WorkerPool {
    /// Start the core workers. Must be called from within a tokio runtime.
    pub fn new(config: &WorkerPoolConfig) -> Self {
        Self::with_limits(
            config.worker_core_size,
            config.worker_max_size,
            config.worker_queue_capacity,
            config.keep_alive(),
        )
    }

    pub fn with_limits(
        core_size: usize,
        max_size: usize,
        queue_capacity: usize,
        keep_alive: Duration,
    ) -> Self {
        let core_size = core_size.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let (done_tx, done_rx) = mpsc::channel(1);

        let pool = WorkerPool {
            sender,
            shared: Arc::new(Shared {
                jobs: Mutex::new(receiver),
                live: AtomicUsize::new(core_size),
                max_size: max_size.max(core_size),
                keep_alive,
            }),
            done_tx,
            done_rx,
        };

        for _ in 0..core_size {
            pool.spawn_worker(None, true);
        }
        pool.shared.record_live();
        pool
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Hand `job` to the pool.
    ///
    /// Never waits for backlog space: a full backlog either starts an extra
    /// worker or runs the job here.
    pub async fn submit<F>(&self, job: F) -> Result<Submission, PoolClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = match self.sender.try_send(Box::pin(job)) {
            Ok(()) => return Ok(Submission::Queued),
            Err(TrySendError::Closed(_)) => return Err(PoolClosed),
            Err(TrySendError::Full(job)) => job,
        };

        metrics::counter!(WORKER_BLOCKED).increment(1);

        if self.reserve_worker_slot() {
            debug!(live = self.live_workers(), "backlog full, starting extra worker");
            metrics::counter!(WORKERS_SPAWNED).increment(1);
            self.spawn_worker(Some(job), false);
            self.shared.record_live();
            return Ok(Submission::Spawned);
        }

        warn!("Worker pool saturated, running task on the consumer");
        metrics::counter!(CALLER_RUNS).increment(1);
        run_job(job).await;
        Ok(Submission::RanInline)
    }

    fn reserve_worker_slot(&self) -> bool {
        let mut live = self.shared.live.load(Ordering::SeqCst);
        loop {
            if live >= self.shared.max_size {
                return false;
            }
            match self.shared.live.compare_exchange(
                live,
                live + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
    }

    fn spawn_worker(&self, first: Option<Job>, core: bool) {
        tokio::spawn(worker_loop(
            self.shared.clone(),
            first,
            core,
            self.done_tx.clone(),
        ));
    }

    /// Stop accepting jobs and wait for the backlog to drain.
    pub async fn shutdown(self) {
        let WorkerPool {
            sender,
            shared,
            done_tx,
            mut done_rx,
        } = self;
        drop(sender);
        drop(done_tx);
        drop(shared);

        while done_rx.recv().await.is_some() {}
    }
}

async fn worker_loop(shared: Arc<Shared>, first: Option<Job>, core: bool, _done: mpsc::Sender<()>) {
    if let Some(job) = first {
        run_job(job).await;
    }

    loop {
        let next = if core {
            shared.next_job().await
        } else {
            match tokio::time::timeout(shared.keep_alive, shared.next_job()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("extra worker idle, retiring");
                    metrics::counter!(WORKERS_RETIRED).increment(1);
                    break;
                }
            }
        };

        match next {
            Some(job) => run_job(job).await,
            None => break,
        }
    }

    shared.live.fetch_sub(1, Ordering::SeqCst);
    shared.record_live();
}

/// Run `job`, containing any panic so the calling worker survives it.
async fn run_job(job: Job) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        error!(reason = %panic_message(panic.as_ref()), "task panicked");
        metrics::counter!(TASKS_PANICKED).increment(1);
    }
}

pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
