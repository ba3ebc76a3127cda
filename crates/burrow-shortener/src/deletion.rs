//! Bulk soft-delete pipeline.
//!
//! The requested codes are cut into fixed-size batches and fed through a
//! bounded channel to a fixed pool of workers, each calling
//! [`Repository::mark_deleted`]. The caller waits until every worker has
//! drained. A failed batch is logged and counted, never returned as an error;
//! resubmitting the same codes is safe because deletion is idempotent.
//!
//! Cancellation (explicit, or through the configured timeout) stops the
//! dispatch of further batches. A batch already handed to the backend runs
//! to completion.

use burrow_core::{DeletionReport, Repository, ShortCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_WORKERS: usize = 5;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DeletionConfig {
    /// Codes per `mark_deleted` call.
    #[builder(default = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Concurrent workers.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Upper bound for a whole run, after which remaining batches are dropped.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Cloneable cancellation signal shared between a caller and a pipeline run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelHandle::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct WorkerTally {
    completed: usize,
    failed: usize,
    deleted: u64,
}

#[derive(Debug, Clone)]
pub struct DeletionPipeline<R> {
    repository: Arc<R>,
    config: DeletionConfig,
}

impl<R: Repository> DeletionPipeline<R> {
    pub fn new(repository: Arc<R>, config: DeletionConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &DeletionConfig {
        &self.config
    }

    pub async fn run(&self, owner_id: &str, codes: Vec<ShortCode>) -> DeletionReport {
        self.run_with_cancel(owner_id, codes, CancelHandle::new())
            .await
    }

    /// Runs the pipeline until every batch is handled or `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        owner_id: &str,
        codes: Vec<ShortCode>,
        cancel: CancelHandle,
    ) -> DeletionReport {
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<ShortCode>> =
            codes.chunks(batch_size).map(<[ShortCode]>::to_vec).collect();
        let total = batches.len();
        if total == 0 {
            return DeletionReport::default();
        }
        if cancel.is_cancelled() {
            return DeletionReport {
                batches: total,
                cancelled: total,
                ..Default::default()
            };
        }

        let workers = self.config.workers.max(1).min(total);
        debug!(owner_id, batches = total, workers, "starting deletion run");

        // Local signal fired by the caller's handle or the timeout.
        let stop = CancelHandle::new();
        let watcher = spawn_watcher(cancel, stop.clone(), self.config.timeout);

        let (tx, rx) = mpsc::channel::<Vec<ShortCode>>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let owner: Arc<str> = Arc::from(owner_id);

        let handles: Vec<JoinHandle<WorkerTally>> = (0..workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&self.repository),
                    Arc::clone(&owner),
                    Arc::clone(&rx),
                    stop.clone(),
                ))
            })
            .collect();

        for batch in batches {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        let mut report = DeletionReport {
            batches: total,
            ..Default::default()
        };
        for handle in handles {
            match handle.await {
                Ok(tally) => {
                    report.completed += tally.completed;
                    report.failed += tally.failed;
                    report.deleted += tally.deleted;
                }
                Err(e) => warn!(error = %e, "deletion worker did not finish"),
            }
        }
        watcher.abort();

        report.cancelled = total - report.completed - report.failed;
        if report.is_complete() {
            debug!(owner_id, deleted = report.deleted, "deletion run finished");
        } else {
            info!(
                owner_id,
                batches = report.batches,
                completed = report.completed,
                failed = report.failed,
                cancelled = report.cancelled,
                "deletion run finished with unprocessed batches"
            );
        }
        report
    }
}

fn spawn_watcher(
    cancel: CancelHandle,
    stop: CancelHandle,
    timeout: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match timeout {
            Some(limit) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        warn!(timeout_ms = limit.as_millis() as u64, "deletion run timed out");
                    }
                }
            }
            None => cancel.cancelled().await,
        }
        stop.cancel();
    })
}

async fn run_worker<R: Repository>(
    worker: usize,
    repository: Arc<R>,
    owner: Arc<str>,
    rx: Arc<Mutex<mpsc::Receiver<Vec<ShortCode>>>>,
    stop: CancelHandle,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        let batch = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                batch = rx.recv() => batch,
            }
        };
        let Some(batch) = batch else {
            break;
        };

        match repository.mark_deleted(&owner, &batch).await {
            Ok(flipped) => {
                tally.completed += 1;
                tally.deleted += flipped;
            }
            Err(e) => {
                tally.failed += 1;
                warn!(
                    worker,
                    owner_id = %owner,
                    codes = batch.len(),
                    error = %e,
                    "failed to delete batch"
                );
            }
        }
    }

    tally
}
