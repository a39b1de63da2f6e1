//! Certificate service: one worker pool, one draining loop, one handler.
//!
//! Results are dispatched by a single background task. It reads the
//! current handler under a lock, releases the lock, and then calls the
//! handler, so a handler may be replaced while another call is in flight.
//! Results that belong to a running batch are routed to the batch first and
//! never reach the registered handler.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pool::{CheckResult, Task, WorkerPool};
use crate::store::{DomainId, UserId};

/// Callback invoked once per [`CheckResult`] by the draining loop.
pub type ResultHandler = Arc<dyn Fn(&CheckResult) + Send + Sync>;

type HandlerSlot = Arc<Mutex<Option<ResultHandler>>>;
type BatchSlot = Arc<Mutex<Option<BatchRoute>>>;
type BatchClaim = (ResultHandler, mpsc::UnboundedSender<CheckResult>);

/// Routing state of the batch in flight.
struct BatchRoute {
    pending: HashMap<Task, usize>,
    handler: ResultHandler,
    done: mpsc::UnboundedSender<CheckResult>,
}

impl BatchRoute {
    /// Claims `task` for the batch, returning its handler and completion
    /// sender when the task was still outstanding.
    fn claim(&mut self, task: &Task) -> Option<BatchClaim> {
        match self.pending.get_mut(task) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Some((Arc::clone(&self.handler), self.done.clone()))
            }
            _ => None,
        }
    }

    fn release(&mut self, task: &Task) {
        if let Some(n) = self.pending.get_mut(task) {
            *n = n.saturating_sub(1);
        }
    }
}

/// Logs the outcome of a check. Used when no handler is registered.
pub fn default_handler(result: &CheckResult) {
    match &result.outcome {
        Ok(cert) => info!(
            hostname = %result.task.hostname,
            domain_id = %result.task.domain_id,
            days_remaining = cert.days_remaining,
            expires_at = %cert.expires_at,
            "certificate check succeeded"
        ),
        Err(e) => warn!(
            hostname = %result.task.hostname,
            domain_id = %result.task.domain_id,
            error = %e,
            "certificate check failed"
        ),
    }
}

pub struct CertService {
    pool: WorkerPool,
    handler: HandlerSlot,
    batch_route: BatchSlot,
    started: Mutex<bool>,
    drain: Mutex<Option<JoinHandle<()>>>,
    drained: CancellationToken,
    batch: tokio::sync::Mutex<()>,
}

impl Default for CertService {
    fn default() -> Self {
        Self::new()
    }
}

impl CertService {
    /// A service over a 20-worker pool with default timeouts.
    pub fn new() -> Self {
        Self::with_pool(WorkerPool::new(20))
    }

    pub fn with_pool(pool: WorkerPool) -> Self {
        Self {
            pool,
            handler: Arc::new(Mutex::new(None)),
            batch_route: Arc::new(Mutex::new(None)),
            started: Mutex::new(false),
            drain: Mutex::new(None),
            drained: CancellationToken::new(),
            batch: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    /// Starts the pool and the draining loop. Later calls do nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut started = self.started.lock();
        if *started {
            debug!("certificate service already started");
            return;
        }
        self.pool.start();
        match self.pool.take_results() {
            Some(results) => {
                let handle = tokio::spawn(drain_results(
                    results,
                    Arc::clone(&self.handler),
                    Arc::clone(&self.batch_route),
                    self.drained.clone(),
                ));
                *self.drain.lock() = Some(handle);
            }
            None => warn!("result stream already taken; results will not be dispatched"),
        }
        *started = true;
    }

    pub fn set_result_handler(&self, handler: ResultHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Falls back to [`default_handler`].
    pub fn clear_result_handler(&self) {
        self.handler.lock().take();
    }

    /// Schedules a check of `hostname`. Returns `false` if the task was
    /// dropped because the service is not running.
    pub async fn check_domain(
        &self,
        hostname: impl Into<String>,
        domain_id: DomainId,
        user_id: UserId,
    ) -> bool {
        self.pool
            .add_task(Task::new(hostname, domain_id, user_id))
            .await
    }

    /// Stops the pool. The draining loop ends on its own once the result
    /// stream closes; use [`join_drain`](Self::join_drain) to wait for it.
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    /// Waits for the draining loop to exit.
    pub async fn join_drain(&self) {
        let handle = self.drain.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "draining loop failed");
            }
        }
    }

    /// Runs every task and waits until each accepted one has been handled.
    ///
    /// `handler` sees each result belonging to the batch; results for other
    /// tasks keep going to the registered handler, which may be replaced
    /// while the batch runs. Batches are serialised.
    ///
    /// Returns early, with whatever was collected, if the draining loop
    /// exits before all results arrive.
    pub async fn check_batch(&self, tasks: Vec<Task>, handler: ResultHandler) -> Vec<CheckResult> {
        let _batch = self.batch.lock().await;

        let mut pending: HashMap<Task, usize> = HashMap::new();
        for task in &tasks {
            *pending.entry(task.clone()).or_default() += 1;
        }
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        *self.batch_route.lock() = Some(BatchRoute {
            pending,
            handler,
            done: done_tx,
        });

        let total = tasks.len();
        let mut accepted = 0;
        for task in tasks {
            if self.pool.add_task(task.clone()).await {
                accepted += 1;
            } else if let Some(route) = self.batch_route.lock().as_mut() {
                route.release(&task);
            }
        }
        debug!(total, accepted, "batch submitted");

        let mut collected = Vec::with_capacity(accepted);
        while collected.len() < accepted {
            tokio::select! {
                biased;
                Some(result) = done_rx.recv() => collected.push(result),
                _ = self.drained.cancelled() => break,
            }
        }
        // results routed before the loop exited are still queued
        while collected.len() < accepted {
            match done_rx.try_recv() {
                Ok(result) => collected.push(result),
                Err(_) => break,
            }
        }
        if collected.len() < accepted {
            warn!(
                expected = accepted,
                received = collected.len(),
                "result stream closed before batch completed"
            );
        }

        self.batch_route.lock().take();
        collected
    }
}

async fn drain_results(
    mut results: mpsc::Receiver<CheckResult>,
    handler: HandlerSlot,
    batch: BatchSlot,
    drained: CancellationToken,
) {
    while let Some(result) = results.recv().await {
        let claimed = batch
            .lock()
            .as_mut()
            .and_then(|route| route.claim(&result.task));
        let dispatched = match claimed {
            Some((batch_handler, done)) => {
                let dispatched = catch_unwind(AssertUnwindSafe(|| batch_handler(&result)));
                let _ = done.send(result.clone());
                dispatched
            }
            None => {
                let current = handler.lock().clone();
                catch_unwind(AssertUnwindSafe(|| match current {
                    Some(h) => h(&result),
                    None => default_handler(&result),
                }))
            }
        };
        if dispatched.is_err() {
            error!(hostname = %result.task.hostname, "result handler panicked");
        }
    }
    debug!("result stream closed; draining loop exiting");
    drained.cancel();
}
