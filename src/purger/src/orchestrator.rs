//! Purge run lifecycle.
//!
//! The orchestrator runs two concurrent stages: one producer task that pages
//! through the store and stages closed partitions, and a fixed pool of
//! deletion workers draining the work queue. A run first retries any staging
//! ledgers left behind by a crashed run, then starts the fresh pipeline; the
//! phases are strictly ordered so a partition key can never be owned by two
//! workers at once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::error::{PurgeError, PurgeResult};
use common::keys;
use common::store::{RangeQuery, TableStore};

use crate::deleter::BatchDeleter;
use crate::ledger;
use crate::pager::PageStream;
use crate::queue::{self, WorkReceiver};
use crate::stager::PartitionStager;

pub const DEFAULT_WORKERS: usize = 32;

/// Knobs for one purge run.
#[derive(Debug, Clone)]
pub struct PurgeOptions {
    /// Rows older than this many days are purged.
    pub older_than_days: u32,
    /// Constant prefix in front of the tick-encoded partition keys.
    pub partition_key_prefix: String,
    /// Worker pool width. 1 means sequential deletion.
    pub workers: usize,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            older_than_days: 365,
            partition_key_prefix: String::new(),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Totals for a finished (or aborted) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub pages_read: u64,
    pub partitions_queued: u64,
    pub partitions_completed: u64,
    pub rows_deleted: u64,
}

/// Shared progress counters. The queue and these counters are the only
/// state shared across tasks; everything else is owned by one stage.
#[derive(Debug, Default)]
pub struct PurgeCounters {
    pub pages_read: AtomicU64,
    pub partitions_queued: AtomicU64,
    pub partitions_completed: AtomicU64,
    pub rows_deleted: AtomicU64,
}

impl PurgeCounters {
    fn snapshot(&self) -> PurgeSummary {
        PurgeSummary {
            pages_read: self.pages_read.load(Ordering::Relaxed),
            partitions_queued: self.partitions_queued.load(Ordering::Relaxed),
            partitions_completed: self.partitions_completed.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
        }
    }
}

pub struct Purger {
    client: Arc<dyn TableStore>,
    table: String,
    options: PurgeOptions,
    staging_dir: PathBuf,
}

impl Purger {
    pub fn new(
        client: Arc<dyn TableStore>,
        table: impl Into<String>,
        options: PurgeOptions,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            options,
            staging_dir: staging_dir.into(),
        }
    }

    /// Run the purge to completion (or to the first fatal error).
    ///
    /// On failure the first fatal error is returned once both stages have
    /// unwound; ledgers of incomplete partitions are left on disk so the
    /// next run makes forward progress without re-deriving them.
    pub async fn purge(&self, cancel: CancellationToken) -> PurgeResult<PurgeSummary> {
        self.validate()?;
        let counters = Arc::new(PurgeCounters::default());

        let result = async {
            self.recover(&cancel, &counters).await?;
            self.run_pipeline(&cancel, &counters).await
        }
        .await;

        let summary = counters.snapshot();
        match result {
            Ok(()) => {
                info!(
                    table = %self.table,
                    pages_read = summary.pages_read,
                    partitions_completed = summary.partitions_completed,
                    rows_deleted = summary.rows_deleted,
                    "purge run complete"
                );
                Ok(summary)
            }
            Err(err) => {
                warn!(
                    table = %self.table,
                    error = %err,
                    pages_read = summary.pages_read,
                    partitions_completed = summary.partitions_completed,
                    rows_deleted = summary.rows_deleted,
                    "purge run aborted; staged ledgers retained for retry"
                );
                Err(err)
            }
        }
    }

    /// Phase 1: drain ledgers left behind by an earlier run, as units.
    async fn recover(
        &self,
        cancel: &CancellationToken,
        counters: &Arc<PurgeCounters>,
    ) -> PurgeResult<()> {
        let leftover = ledger::pending(&self.staging_dir).await?;
        if leftover.is_empty() {
            return Ok(());
        }
        info!(
            partitions = leftover.len(),
            "retrying staging ledgers from an earlier run"
        );

        let (tx, rx) = queue::bounded(self.options.workers * 2);
        let workers = self.spawn_workers(rx, cancel, counters);

        for partition_key in leftover {
            if cancel.is_cancelled() || !tx.push(partition_key).await {
                break;
            }
            counters.partitions_queued.fetch_add(1, Ordering::Relaxed);
        }
        drop(tx);

        match self.drain(workers, cancel, None).await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Phase 2: the fresh reader/stager pipeline plus the worker pool.
    async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        counters: &Arc<PurgeCounters>,
    ) -> PurgeResult<()> {
        let cutoff = keys::cutoff(Utc::now(), self.options.older_than_days);
        let upper = keys::encode_ticks(keys::ticks_from_datetime(cutoff));
        let query = RangeQuery::build(None, &upper, &self.options.partition_key_prefix);
        info!(
            table = %self.table,
            upper_bound = %query.upper,
            workers = self.options.workers,
            "starting purge pipeline"
        );

        let (tx, rx) = queue::bounded(self.options.workers * 2);
        let workers = self.spawn_workers(rx, cancel, counters);

        let producer: JoinHandle<PurgeResult<()>> = {
            let mut pages = PageStream::new(self.client.clone(), &self.table, query);
            let mut stager = PartitionStager::new(
                &self.staging_dir,
                &self.options.partition_key_prefix,
                tx,
                counters.clone(),
            );
            let counters = counters.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    // Cancellation is checked at each page boundary; an
                    // in-flight request is allowed to complete.
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(page) = pages.next_page().await? else {
                        break;
                    };
                    counters.pages_read.fetch_add(1, Ordering::Relaxed);
                    if !stager.stage_page(&page).await? {
                        break;
                    }
                }
                stager.finish().await
            })
        };

        let mut first_error = None;
        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                cancel.cancel();
                first_error = Some(err);
            }
            Err(join_err) => {
                cancel.cancel();
                first_error = Some(PurgeError::Query(format!(
                    "producer task failed: {join_err}"
                )));
            }
        }

        match self.drain(workers, cancel, first_error).await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_workers(
        &self,
        rx: WorkReceiver,
        cancel: &CancellationToken,
        counters: &Arc<PurgeCounters>,
    ) -> Vec<JoinHandle<PurgeResult<()>>> {
        (0..self.options.workers)
            .map(|_| {
                let deleter = BatchDeleter::new(
                    self.client.clone(),
                    &self.table,
                    &self.staging_dir,
                    counters.clone(),
                    cancel.clone(),
                );
                tokio::spawn(deleter.run(rx.clone()))
            })
            .collect()
    }

    /// Wait for every worker; the first fatal error wins and later ones,
    /// being shutdown noise, are suppressed.
    async fn drain(
        &self,
        workers: Vec<JoinHandle<PurgeResult<()>>>,
        cancel: &CancellationToken,
        mut first_error: Option<PurgeError>,
    ) -> Option<PurgeError> {
        for handle in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    cancel.cancel();
                    if first_error.is_none() {
                        first_error =
                            Some(PurgeError::Delete(format!("worker task failed: {join_err}")));
                    }
                }
            }
        }
        first_error
    }

    fn validate(&self) -> PurgeResult<()> {
        if self.table.is_empty() {
            return Err(PurgeError::Configuration(
                "table name cannot be empty".to_string(),
            ));
        }
        if self.options.older_than_days == 0 {
            return Err(PurgeError::Configuration(
                "purge age must be at least one day".to_string(),
            ));
        }
        if self.options.workers == 0 {
            return Err(PurgeError::Configuration(
                "worker pool width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
