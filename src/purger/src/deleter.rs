//! Batched deletion workers.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::error::PurgeResult;
use common::store::{BatchOutcome, TableStore, MAX_BATCH_SIZE};

use crate::ledger::StagingLedger;
use crate::orchestrator::PurgeCounters;
use crate::queue::WorkReceiver;

/// One deletion worker.
///
/// A worker owns each partition it dequeues outright: the partition's chunks
/// are issued sequentially by that worker alone, so no two workers ever
/// touch the same ledger. A fatal store error trips the shared cancellation
/// token and leaves the ledger on disk for the next run.
pub struct BatchDeleter {
    client: Arc<dyn TableStore>,
    table: String,
    staging_dir: PathBuf,
    counters: Arc<PurgeCounters>,
    cancel: CancellationToken,
}

impl BatchDeleter {
    pub fn new(
        client: Arc<dyn TableStore>,
        table: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        counters: Arc<PurgeCounters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            staging_dir: staging_dir.into(),
            counters,
            cancel,
        }
    }

    /// Drain the queue until it is empty and closed, or until cancellation.
    pub async fn run(self, queue: WorkReceiver) -> PurgeResult<()> {
        loop {
            // Check cancellation before dequeueing the next partition.
            let partition_key = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                item = queue.recv() => match item {
                    Some(partition_key) => partition_key,
                    None => return Ok(()),
                },
            };

            if let Err(err) = self.purge_partition(&partition_key).await {
                self.cancel.cancel();
                return Err(err);
            }
        }
    }

    async fn purge_partition(&self, partition_key: &str) -> PurgeResult<()> {
        let ledger = StagingLedger::new(&self.staging_dir, partition_key);
        let rows = ledger.read_all().await?;
        debug!(
            partition_key = %partition_key,
            rows = rows.len(),
            "deleting staged partition"
        );

        // Chunk boundaries are deterministic (ledger order, ceiling
        // division), so a retried run re-issues identical batches.
        for chunk in rows.chunks(MAX_BATCH_SIZE) {
            if self.cancel.is_cancelled() {
                // Ledger stays on disk; the next run retries this
                // partition from the top.
                return Ok(());
            }

            match self
                .client
                .execute_batch(&self.table, partition_key, chunk)
                .await?
            {
                BatchOutcome::Deleted(n) => {
                    self.counters.rows_deleted.fetch_add(n as u64, Ordering::Relaxed);
                }
                BatchOutcome::NotFound => {
                    warn!(
                        partition_key = %partition_key,
                        rows = chunk.len(),
                        "batch already deleted by an earlier run"
                    );
                }
            }
        }

        ledger.remove().await?;
        self.counters
            .partitions_completed
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use common::error::PurgeError;
    use common::store::{InMemoryTableStore, RowKeys};
    use tempfile::tempdir;

    fn partition_rows(pk: &str, n: usize) -> Vec<RowKeys> {
        (0..n).map(|i| RowKeys::new(pk, format!("r{i:04}"))).collect()
    }

    async fn staged(dir: &std::path::Path, pk: &str, rows: &[RowKeys]) {
        StagingLedger::new(dir, pk).append(rows).await.unwrap();
    }

    fn deleter(
        store: &Arc<InMemoryTableStore>,
        dir: &std::path::Path,
        counters: &Arc<PurgeCounters>,
        cancel: &CancellationToken,
    ) -> BatchDeleter {
        BatchDeleter::new(
            store.clone() as Arc<dyn TableStore>,
            "t",
            dir,
            counters.clone(),
            cancel.clone(),
        )
    }

    #[tokio::test]
    async fn test_chunks_follow_ceiling_division() {
        let store = Arc::new(InMemoryTableStore::new());
        let dir = tempdir().unwrap();
        let counters = Arc::new(PurgeCounters::default());
        let cancel = CancellationToken::new();

        let rows = partition_rows("p1", 250);
        store.insert_many(rows.clone()).await;
        staged(dir.path(), "p1", &rows).await;

        let (tx, rx) = queue::bounded(2);
        assert!(tx.push("p1".to_string()).await);
        drop(tx);

        deleter(&store, dir.path(), &counters, &cancel)
            .run(rx)
            .await
            .unwrap();

        // 250 rows -> batches of 100, 100, 50.
        assert_eq!(store.batches_executed().await, 3);
        assert_eq!(counters.rows_deleted.load(Ordering::Relaxed), 250);
        assert_eq!(counters.partitions_completed.load(Ordering::Relaxed), 1);
        assert!(store.is_empty().await);
        assert!(!dir.path().join("p1.ledger").exists());
    }

    #[tokio::test]
    async fn test_not_found_batch_is_recoverable() {
        let store = Arc::new(InMemoryTableStore::new());
        let dir = tempdir().unwrap();
        let counters = Arc::new(PurgeCounters::default());
        let cancel = CancellationToken::new();

        let rows = partition_rows("p1", 50);
        store.insert_many(rows.clone()).await;
        // One row vanished between staging and deletion.
        store.remove("p1", "r0007").await;
        staged(dir.path(), "p1", &rows).await;

        let (tx, rx) = queue::bounded(2);
        assert!(tx.push("p1".to_string()).await);
        drop(tx);

        deleter(&store, dir.path(), &counters, &cancel)
            .run(rx)
            .await
            .unwrap();

        // The whole batch reported not-found: zero deletions, no error,
        // and the partition still completes.
        assert_eq!(counters.rows_deleted.load(Ordering::Relaxed), 0);
        assert_eq!(counters.partitions_completed.load(Ordering::Relaxed), 1);
        assert!(!cancel.is_cancelled());
        assert!(!dir.path().join("p1.ledger").exists());
    }

    #[tokio::test]
    async fn test_fatal_delete_error_preserves_ledger_and_cancels() {
        let store = Arc::new(InMemoryTableStore::new());
        let dir = tempdir().unwrap();
        let counters = Arc::new(PurgeCounters::default());
        let cancel = CancellationToken::new();

        let rows = partition_rows("p1", 10);
        store.insert_many(rows.clone()).await;
        staged(dir.path(), "p1", &rows).await;
        store.fail_deletes_for("p1").await;

        let (tx, rx) = queue::bounded(2);
        assert!(tx.push("p1".to_string()).await);
        drop(tx);

        let err = deleter(&store, dir.path(), &counters, &cancel)
            .run(rx)
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::Delete(_)));
        assert!(cancel.is_cancelled());
        assert!(dir.path().join("p1.ledger").exists());
        assert_eq!(counters.partitions_completed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancellation() {
        let store = Arc::new(InMemoryTableStore::new());
        let dir = tempdir().unwrap();
        let counters = Arc::new(PurgeCounters::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, rx) = queue::bounded(2);
        assert!(tx.push("p1".to_string()).await);

        deleter(&store, dir.path(), &counters, &cancel)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(counters.partitions_completed.load(Ordering::Relaxed), 0);
    }
}
