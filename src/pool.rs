//! Bounded worker pool running certificate checks.
//!
//! Tasks go in through a bounded queue shared by all workers; every task
//! produces exactly one [`CheckResult`] on a bounded result stream. The
//! pool moves through [`PoolState`] once: created, started, stopping,
//! stopped. [`WorkerPool::stop`] is the single join point, and no worker
//! outlives it.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CheckError;
use crate::probe::{Certificate, ProbeContext, Prober};
use crate::store::{DomainId, UserId};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// One unit of work: check the certificate of one hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Task {
    pub hostname: String,
    pub domain_id: DomainId,
    pub user_id: UserId,
}

impl Task {
    pub fn new(hostname: impl Into<String>, domain_id: DomainId, user_id: UserId) -> Self {
        Self {
            hostname: hostname.into(),
            domain_id,
            user_id,
        }
    }
}

/// Outcome of processing one [`Task`].
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub task: Task,
    pub outcome: Result<Certificate, CheckError>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn certificate(&self) -> Option<&Certificate> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&CheckError> {
        self.outcome.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Sizing and timing of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub workers: usize,
    /// Capacity of both the task queue and the result stream
    pub queue_capacity: usize,
    /// Ceiling on a single check, layered under the pool's cancellation
    pub task_timeout: Duration,
    /// How long `stop` waits for workers before cancelling them
    pub shutdown_timeout: Duration,
    pub prober: Prober,
}

impl PoolOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: 20,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            prober: Prober::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Created => "created",
            PoolState::Started => "started",
            PoolState::Stopping => "stopping",
            PoolState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub struct WorkerPool {
    options: PoolOptions,
    root: ProbeContext,
    state: Mutex<PoolState>,
    tasks_tx: Mutex<Option<mpsc::Sender<Task>>>,
    tasks_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    results_tx: Mutex<Option<mpsc::Sender<CheckResult>>>,
    results_rx: Mutex<Option<mpsc::Receiver<CheckResult>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a pool of `workers` workers with default queue sizes and
    /// timeouts. Nothing runs until [`start`](Self::start).
    pub fn new(workers: usize) -> Self {
        Self::with_options(PoolOptions::new(workers))
    }

    pub fn with_options(options: PoolOptions) -> Self {
        let capacity = options.queue_capacity.max(1);
        let (tasks_tx, tasks_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        Self {
            options,
            root: ProbeContext::new(),
            state: Mutex::new(PoolState::Created),
            tasks_tx: Mutex::new(Some(tasks_tx)),
            tasks_rx: Arc::new(tokio::sync::Mutex::new(tasks_rx)),
            results_tx: Mutex::new(Some(results_tx)),
            results_rx: Mutex::new(Some(results_rx)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    pub fn worker_count(&self) -> usize {
        self.options.workers
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Fires when the pool is cancelled, at the latest when `stop` returns.
    pub fn cancellation(&self) -> CancellationToken {
        self.root.token().clone()
    }

    /// Spawns the workers. Must be called from within a tokio runtime.
    ///
    /// Only the first call from [`PoolState::Created`] has any effect.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if *state != PoolState::Created {
            warn!(state = %*state, "worker pool already started");
            return;
        }
        let Some(results) = self.results_tx.lock().take() else {
            return;
        };

        let mut workers = self.workers.lock();
        for id in 0..self.options.workers {
            workers.push(tokio::spawn(worker(
                id,
                Arc::clone(&self.tasks_rx),
                results.clone(),
                self.root.clone(),
                self.options.prober.clone(),
                self.options.task_timeout,
            )));
        }
        *state = PoolState::Started;
        info!(workers = self.options.workers, "worker pool started");
    }

    /// Enqueues `task`, waiting for queue space if needed.
    ///
    /// Returns `false` if the task was dropped: the pool is not running, or
    /// it was cancelled while the task waited for space.
    pub async fn add_task(&self, task: Task) -> bool {
        let sender = {
            let state = self.state.lock();
            if *state != PoolState::Started {
                debug!(hostname = %task.hostname, state = %*state, "pool not running; dropping task");
                return false;
            }
            match self.tasks_tx.lock().as_ref() {
                Some(tx) => tx.clone(),
                None => return false,
            }
        };

        tokio::select! {
            biased;
            _ = self.root.token().cancelled() => {
                debug!("pool cancelled; dropping task");
                false
            }
            sent = sender.send(task) => sent.is_ok(),
        }
    }

    /// Hands out the result stream. There is a single consumer, so only the
    /// first call returns `Some`.
    ///
    /// The stream must be drained continuously while the pool runs, or
    /// workers stall on publish until cancellation.
    pub fn take_results(&self) -> Option<mpsc::Receiver<CheckResult>> {
        self.results_rx.lock().take()
    }

    /// Closes submission, lets the workers finish the queued tasks and joins
    /// them, then closes the result stream and fires cancellation.
    ///
    /// If the workers have not exited within the shutdown timeout,
    /// cancellation fires early, which aborts in-flight probes and pending
    /// publishes.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, PoolState::Stopping | PoolState::Stopped) {
                debug!(state = %*state, "worker pool already stopping");
                return;
            }
            *state = PoolState::Stopping;
            self.tasks_tx.lock().take();
            // nobody took the stream; publishing into it would block forever
            self.results_rx.lock().take();
            self.results_tx.lock().take();
        }

        let handles = mem::take(&mut *self.workers.lock());
        let grace = tokio::time::sleep(self.options.shutdown_timeout);
        tokio::pin!(grace);

        let mut pending = handles.into_iter();
        let mut remaining = Vec::new();
        for mut handle in pending.by_ref() {
            tokio::select! {
                joined = &mut handle => log_join(joined),
                _ = &mut grace => {
                    remaining.push(handle);
                    break;
                }
            }
        }
        remaining.extend(pending);

        if !remaining.is_empty() {
            warn!(
                workers = remaining.len(),
                timeout = ?self.options.shutdown_timeout,
                "workers still busy at shutdown; cancelling"
            );
            self.root.cancel();
            for handle in remaining {
                log_join(handle.await);
            }
        }

        self.root.cancel();
        *self.state.lock() = PoolState::Stopped;
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.root.cancel();
        for handle in self.workers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "worker task failed");
    }
}

async fn worker(
    id: usize,
    tasks: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    results: mpsc::Sender<CheckResult>,
    root: ProbeContext,
    prober: Prober,
    task_timeout: Duration,
) {
    loop {
        // queued tasks still publish a result after cancellation; the probe
        // returns `Cancelled` at once for a finished context
        let next = {
            let mut rx = tasks.lock().await;
            rx.recv().await
        };
        let Some(task) = next else {
            break;
        };

        let ctx = root.child_with_timeout(task_timeout);
        let outcome = prober.probe(&ctx, &task.hostname).await;
        let result = CheckResult {
            task,
            outcome,
            checked_at: Utc::now(),
        };

        // publishing wins over cancellation whenever a slot is free
        tokio::select! {
            biased;
            sent = results.send(result) => {
                if let Err(mpsc::error::SendError(result)) = sent {
                    debug!(worker = id, hostname = %result.task.hostname, "result stream closed; discarding result");
                }
            }
            _ = root.token().cancelled() => {
                debug!(worker = id, "publish aborted by cancellation");
                break;
            }
        }
    }
    debug!(worker = id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(hostname: &str, id: u64) -> Task {
        Task::new(hostname, DomainId(id), UserId(1))
    }

    #[tokio::test]
    async fn test_new_pool_is_idle() {
        let pool = WorkerPool::new(3);
        assert_eq!(pool.state(), PoolState::Created);
        assert_eq!(pool.worker_count(), 3);
        assert!(!pool.add_task(task("example.com", 1)).await);
    }

    #[tokio::test]
    async fn test_results_taken_once() {
        let pool = WorkerPool::new(1);
        assert!(pool.take_results().is_some());
        assert!(pool.take_results().is_none());
    }

    #[tokio::test]
    async fn test_invalid_task_yields_error_result() {
        let pool = WorkerPool::new(1);
        let mut results = pool.take_results().unwrap();
        pool.start();

        assert!(pool.add_task(task("", 9)).await);
        let result = results.recv().await.unwrap();
        assert_eq!(result.task.domain_id, DomainId(9));
        assert!(result.certificate().is_none());
        assert!(matches!(
            result.error(),
            Some(CheckError::InvalidHostname { .. })
        ));

        pool.stop().await;
        assert!(results.recv().await.is_none());
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn test_add_after_stop_is_dropped() {
        let pool = WorkerPool::new(2);
        pool.start();
        pool.stop().await;
        assert!(!pool.add_task(task("example.com", 1)).await);
        assert!(pool.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let pool = WorkerPool::new(2);
        pool.start();
        pool.start();
        assert_eq!(pool.workers.lock().len(), 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let pool = WorkerPool::new(1);
        pool.start();
        pool.stop().await;
        pool.stop().await;
        assert_eq!(pool.state(), PoolState::Stopped);
    }
}
