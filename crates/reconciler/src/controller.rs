//! Work-queue controller.
//!
//! Receives change notifications (record keys) and runs
//! [`Reconciler::reconcile`] for them with bounded parallelism. A key is
//! never reconciled twice at the same time: a notification that arrives
//! while its key is in flight marks the key dirty, and it runs again once
//! the current cycle ends. Failed cycles are requeued with exponential
//! backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Interval;
use tracing::{debug, error, info, warn};

use crate::context::{Canceller, Context};
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::types::{ReconcileOutcome, ResourceKey};

/// Configuration for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Records reconciled in parallel.
    pub workers: usize,
    /// Deadline for a single cycle.
    #[serde(with = "duration_secs")]
    pub reconcile_timeout: Duration,
    /// Delay before the first retry of a failed cycle.
    pub base_backoff_ms: u64,
    /// Upper bound on the retry delay.
    pub max_backoff_ms: u64,
    /// Interval between full resyncs; zero disables them.
    #[serde(with = "duration_secs")]
    pub resync_interval: Duration,
    /// Capacity of the notification queue.
    pub queue_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            reconcile_timeout: Duration::from_secs(30),
            base_backoff_ms: 100,
            max_backoff_ms: 60_000,
            resync_interval: Duration::from_secs(300),
            queue_capacity: 1024,
        }
    }
}

impl ControllerConfig {
    /// Set the number of workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-cycle deadline.
    #[must_use]
    pub const fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Set the retry backoff bounds, in milliseconds.
    #[must_use]
    pub const fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.base_backoff_ms = base_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Set the resync interval.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero workers, a zero timeout,
    /// an empty queue, or a backoff base above its cap.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::invalid_config("reconcile_timeout must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::invalid_config("queue_capacity must be at least 1"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(Error::invalid_config(format!(
                "base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.base_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Exponential backoff: `base_ms * 2^attempt`, capped at `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Result of one worker task: the key and either the cycle result or a
/// panic message.
type Completion = (ResourceKey, std::result::Result<Result<ReconcileOutcome>, String>);

/// Dispatches reconcile cycles for queued keys.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
    queue_tx: mpsc::Sender<ResourceKey>,
    queue_rx: mpsc::Receiver<ResourceKey>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Controller {
    /// Create a new controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(reconciler: Arc<Reconciler>, config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            reconciler,
            config,
            queue_tx,
            queue_rx,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    /// A handle for submitting keys.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            queue_tx: self.queue_tx.clone(),
        }
    }

    /// A handle for stopping the controller.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run until stopped.
    ///
    /// On stop, in-flight cycles are cancelled through their [`Context`]
    /// and awaited; pending retries are dropped.
    pub async fn run(self) {
        let Self {
            reconciler,
            config,
            queue_tx,
            mut queue_rx,
            stop_tx,
            mut stop_rx,
        } = self;
        // Held so `changed()` only fires on an explicit stop.
        let _stop_tx = stop_tx;

        info!(
            workers = config.workers,
            resync_secs = config.resync_interval.as_secs(),
            "Starting controller"
        );

        let canceller = Canceller::new();
        let ctx = canceller.context();
        let mut resync = (!config.resync_interval.is_zero())
            .then(|| tokio::time::interval(config.resync_interval));
        let mut dispatch = Dispatch::new(reconciler, config, queue_tx);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                Some(joined) = dispatch.workers.join_next(), if !dispatch.workers.is_empty() => {
                    match joined {
                        Ok((key, result)) => dispatch.complete(&ctx, key, result),
                        Err(e) => error!(error = %e, "Worker task failed"),
                    }
                }
                Some(_) = dispatch.retries.join_next(), if !dispatch.retries.is_empty() => {}
                received = queue_rx.recv() => match received {
                    Some(key) => dispatch.submit(&ctx, key),
                    None => break,
                },
                () = tick(&mut resync) => dispatch.resync(&ctx).await,
            }
        }

        info!(in_flight = dispatch.workers.len(), "Stopping controller");
        canceller.cancel();
        dispatch.retries.abort_all();
        while let Some(joined) = dispatch.workers.join_next().await {
            if let Ok((key, Ok(Err(e)))) = joined {
                debug!(resource = %key, error = %e, "Cycle interrupted by shutdown");
            }
        }
        info!("Controller stopped");
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Queue state owned by a running controller.
struct Dispatch {
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
    queue_tx: mpsc::Sender<ResourceKey>,
    semaphore: Arc<Semaphore>,
    /// Keys waiting for a worker, in arrival order.
    pending: VecDeque<ResourceKey>,
    queued: HashSet<ResourceKey>,
    in_flight: HashSet<ResourceKey>,
    /// In-flight keys notified again since their cycle started.
    dirty: HashSet<ResourceKey>,
    /// Consecutive failures per key.
    attempts: HashMap<ResourceKey, u32>,
    workers: JoinSet<Completion>,
    retries: JoinSet<()>,
}

impl Dispatch {
    fn new(
        reconciler: Arc<Reconciler>,
        config: ControllerConfig,
        queue_tx: mpsc::Sender<ResourceKey>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers));
        Self {
            reconciler,
            config,
            queue_tx,
            semaphore,
            pending: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            attempts: HashMap::new(),
            workers: JoinSet::new(),
            retries: JoinSet::new(),
        }
    }

    fn submit(&mut self, ctx: &Context, key: ResourceKey) {
        if self.in_flight.contains(&key) {
            debug!(resource = %key, "Cycle in flight; marking dirty");
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
        self.pump(ctx);
    }

    /// Start cycles for pending keys while workers are free.
    fn pump(&mut self, ctx: &Context) {
        while !self.pending.is_empty() {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            let Some(key) = self.pending.pop_front() else {
                break;
            };
            self.queued.remove(&key);
            self.in_flight.insert(key.clone());

            let reconciler = Arc::clone(&self.reconciler);
            let cycle_ctx = ctx.with_timeout(self.config.reconcile_timeout);
            self.workers.spawn(async move {
                let _permit = permit;
                let result = AssertUnwindSafe(reconciler.reconcile(&cycle_ctx, &key))
                    .catch_unwind()
                    .await
                    .map_err(|_| "reconcile cycle panicked".to_string());
                (key, result)
            });
        }
    }

    fn complete(
        &mut self,
        ctx: &Context,
        key: ResourceKey,
        result: std::result::Result<Result<ReconcileOutcome>, String>,
    ) {
        self.in_flight.remove(&key);
        let rerun = self.dirty.remove(&key);

        match result {
            Ok(Ok(outcome)) => {
                self.attempts.remove(&key);
                debug!(
                    resource = %key,
                    outcome = ?outcome,
                    wrote_remote = outcome.wrote_remote(),
                    "Cycle finished"
                );
            }
            Ok(Err(e)) if rerun => {
                debug!(resource = %key, error = %e, "Cycle failed; record changed meanwhile");
            }
            Ok(Err(e)) => self.retry_later(key.clone(), &e.to_string()),
            Err(panic) => {
                error!(resource = %key, error = %panic, "Cycle aborted");
                self.retry_later(key.clone(), &panic);
            }
        }

        if rerun {
            self.submit(ctx, key);
        } else {
            self.pump(ctx);
        }
    }

    fn retry_later(&mut self, key: ResourceKey, reason: &str) {
        let attempt = self.attempts.entry(key.clone()).or_insert(0);
        let delay = calculate_backoff(
            *attempt,
            self.config.base_backoff_ms,
            self.config.max_backoff_ms,
        );
        *attempt = attempt.saturating_add(1);

        warn!(
            resource = %key,
            error = %reason,
            attempt = *attempt,
            backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Cycle failed; requeueing"
        );

        let queue_tx = self.queue_tx.clone();
        self.retries.spawn(async move {
            tokio::time::sleep(delay).await;
            // The controller may have stopped meanwhile.
            let _ = queue_tx.send(key).await;
        });
    }

    async fn resync(&mut self, ctx: &Context) {
        let list_ctx = ctx.with_timeout(self.config.reconcile_timeout);
        match self.reconciler.store().list(&list_ctx).await {
            Ok(keys) => {
                debug!(count = keys.len(), "Resync");
                for key in keys {
                    self.submit(ctx, key);
                }
            }
            Err(e) => warn!(error = %e, "Resync failed to list records"),
        }
    }
}

/// Handle for submitting change notifications to a [`Controller`].
#[derive(Clone)]
pub struct ControllerHandle {
    queue_tx: mpsc::Sender<ResourceKey>,
}

impl ControllerHandle {
    /// Queue `key` for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ControllerStopped`] once the controller has exited.
    pub async fn enqueue(&self, key: ResourceKey) -> Result<()> {
        self.queue_tx
            .send(key)
            .await
            .map_err(|_| Error::ControllerStopped)
    }
}

/// Handle to stop a controller.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl LoopStopper {
    /// Stop the controller.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
