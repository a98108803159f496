//! Worker loop that drains the `requests` queue into the `results` queue.
//!
//! Each poll leases up to `max_batch` requests, runs them through the
//! [`Processor`] with at most `concurrency` in flight, publishes one result
//! per request and only then acknowledges the request. The loop does not
//! poll again until every unit of the batch has finished, so a stop request
//! always lets the current batch drain.

mod dispatch;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::processor::Processor;
use crate::queue::{QueueStore, Result, REQUESTS_QUEUE};

/// Worker tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum requests processed at once.
    pub concurrency: usize,
    /// Maximum requests leased per poll.
    pub max_batch: usize,
    /// Sleep between polls that found nothing.
    pub poll_interval: Duration,
    /// Lease duration for requests.
    pub lease_seconds: u64,
    /// Bound on a single processor invocation.
    pub processing_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_batch: 5,
            poll_interval: Duration::from_millis(1000),
            lease_seconds: 120,
            processing_timeout: Duration::from_secs(120),
        }
    }
}

/// Counters updated as the worker runs.
#[derive(Debug, Default)]
pub struct WorkerStats {
    batches: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub batches: u64,
    pub processed: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_unit(&self, failed: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Leases requests, processes them, and publishes results.
pub struct WorkerScheduler {
    store: QueueStore,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    /// Admission gate bounding in-flight units.
    gate: Arc<Semaphore>,
}

impl WorkerScheduler {
    pub fn new(store: QueueStore, processor: Arc<dyn Processor>, config: WorkerConfig) -> Self {
        let gate = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            store,
            processor,
            config,
            stats: Arc::new(WorkerStats::default()),
            gate,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Lease and fully process one batch. Returns the number of requests handled.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .store
            .lease(REQUESTS_QUEUE, self.config.max_batch, self.config.lease_seconds)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let size = batch.len();
        self.stats.record_batch();
        tracing::info!("Leased {} request(s)", size);

        self.dispatch_batch(batch).await?;
        Ok(size)
    }

    /// Run until `stop` flips to `true` (or its sender is dropped).
    ///
    /// Store faults end the loop with an error after the current batch has
    /// drained.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "Worker started (concurrency={}, max_batch={}, lease={}s)",
            self.config.concurrency,
            self.config.max_batch,
            self.config.lease_seconds
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let handled = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("Worker stopping on store error: {}", e);
                    return Err(e);
                }
            };

            if handled == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            "Worker stopped ({} processed, {} failed)",
            stats.processed,
            stats.failed
        );
        Ok(())
    }

    /// Start the loop on the runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let stats = self.stats();
        let task = tokio::spawn(async move {
            let result = self.run(stop_rx).await;
            let _ = done_tx.send(true);
            result
        });
        WorkerHandle {
            stop: stop_tx,
            done: done_rx,
            task,
            stats,
        }
    }
}

/// Running worker started by [`WorkerScheduler::spawn`].
pub struct WorkerHandle {
    stop: watch::Sender<bool>,
    /// Flips to `true` when the loop returns.
    done: watch::Receiver<bool>,
    task: JoinHandle<Result<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerHandle {
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Resolves once the loop has returned on its own or been stopped.
    ///
    /// Collect the outcome with [`WorkerHandle::stop`].
    pub fn exited(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut done = self.done.clone();
        async move {
            // A dropped sender means the task is gone too.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Signal the loop to stop and wait for the in-flight batch to drain.
    ///
    /// Returns the store fault that ended the loop, if one did.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(true);
        self.task.await?
    }
}
