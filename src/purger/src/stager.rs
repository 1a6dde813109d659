//! Partition staging and boundary detection.
//!
//! The stager tracks only the most recently seen partition key. Because the
//! store delivers rows ordered by partition key, all rows of one partition
//! arrive as a single contiguous run of pages; the first row with a
//! different key proves the previous partition is complete. That closes the
//! partition and queues it for deletion exactly once, with no already-seen
//! bookkeeping that could leak or go stale across crashes.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;

use common::error::PurgeResult;
use common::keys;
use common::store::{Page, RowKeys};

use crate::ledger::StagingLedger;
use crate::orchestrator::PurgeCounters;
use crate::queue::WorkSender;

pub struct PartitionStager {
    staging_dir: PathBuf,
    partition_key_prefix: String,
    queue: WorkSender,
    counters: Arc<PurgeCounters>,
    open_partition: Option<String>,
}

impl PartitionStager {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        partition_key_prefix: impl Into<String>,
        queue: WorkSender,
        counters: Arc<PurgeCounters>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            partition_key_prefix: partition_key_prefix.into(),
            queue,
            counters,
            open_partition: None,
        }
    }

    /// Stage one page worth of rows, closing every partition the page
    /// proves complete. Returns false when the deletion stage has gone away
    /// (shutdown) and no more pages should be produced.
    pub async fn stage_page(&mut self, page: &Page) -> PurgeResult<bool> {
        for group in group_by_partition(&page.rows) {
            let partition_key = group[0].partition_key.as_str();

            // Abort before any further staging if the table does not use
            // the expected key scheme.
            keys::decode(partition_key, &self.partition_key_prefix)?;

            if let Some(open) = self.open_partition.as_deref() {
                if open != partition_key && !self.close_open().await {
                    return Ok(false);
                }
            }

            StagingLedger::new(&self.staging_dir, partition_key)
                .append(group)
                .await?;
            self.open_partition = Some(partition_key.to_string());
        }
        Ok(true)
    }

    /// After the final page: close whatever partition remains open, then
    /// shut the queue so draining workers can terminate.
    pub async fn finish(mut self) -> PurgeResult<()> {
        self.close_open().await;
        // Dropping the sender closes the queue.
        Ok(())
    }

    async fn close_open(&mut self) -> bool {
        let Some(partition_key) = self.open_partition.take() else {
            return true;
        };
        debug!(partition_key = %partition_key, "partition closed, queueing for deletion");
        if !self.queue.push(partition_key).await {
            return false;
        }
        self.counters.partitions_queued.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Split rows into runs sharing one partition key, preserving arrival order.
fn group_by_partition(rows: &[RowKeys]) -> impl Iterator<Item = &[RowKeys]> {
    rows.chunk_by(|a, b| a.partition_key == b.partition_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use crate::queue;
    use chrono::{Duration, Utc};
    use common::error::PurgeError;
    use common::store::Continuation;
    use tempfile::tempdir;

    fn tick_key(days_ago: i64) -> String {
        keys::encode(Utc::now() - Duration::days(days_ago), "")
    }

    fn page(rows: Vec<RowKeys>, more: bool) -> Page {
        Page {
            rows,
            continuation: more.then(|| Continuation("next".to_string())),
        }
    }

    #[tokio::test]
    async fn test_closes_partition_on_key_change_within_a_page() {
        let dir = tempdir().unwrap();
        let (tx, rx) = queue::bounded(8);
        let counters = Arc::new(PurgeCounters::default());
        let mut stager = PartitionStager::new(dir.path(), "", tx, counters.clone());

        let (p1, p2) = (tick_key(400), tick_key(399));
        let rows = vec![
            RowKeys::new(&p1, "r1"),
            RowKeys::new(&p1, "r2"),
            RowKeys::new(&p2, "r1"),
        ];
        assert!(stager.stage_page(&page(rows, false)).await.unwrap());

        // p1 closed the moment p2 appeared; p2 still open.
        assert_eq!(rx.recv().await.as_deref(), Some(p1.as_str()));
        stager.finish().await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some(p2.as_str()));
        assert_eq!(rx.recv().await, None);
        assert_eq!(
            counters.partitions_queued.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn test_partition_spanning_pages_is_queued_once_with_full_ledger() {
        let dir = tempdir().unwrap();
        let (tx, rx) = queue::bounded(8);
        let counters = Arc::new(PurgeCounters::default());
        let mut stager = PartitionStager::new(dir.path(), "", tx, counters.clone());

        let p1 = tick_key(400);
        let first: Vec<_> = (0..3).map(|i| RowKeys::new(&p1, format!("r{i}"))).collect();
        let second: Vec<_> = (3..5).map(|i| RowKeys::new(&p1, format!("r{i}"))).collect();

        assert!(stager.stage_page(&page(first, true)).await.unwrap());
        // Still open: nothing queued yet.
        assert_eq!(counters.partitions_queued.load(Ordering::Relaxed), 0);

        assert!(stager.stage_page(&page(second, false)).await.unwrap());
        stager.finish().await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some(p1.as_str()));
        assert_eq!(rx.recv().await, None);

        let staged = StagingLedger::new(dir.path(), &p1).read_all().await.unwrap();
        assert_eq!(staged.len(), 5);
        assert_eq!(counters.partitions_queued.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_malformed_partition_key_aborts_staging() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = queue::bounded(8);
        let counters = Arc::new(PurgeCounters::default());
        let mut stager = PartitionStager::new(dir.path(), "", tx, counters);

        let rows = vec![RowKeys::new("not-a-tick-key", "r1")];
        let err = stager.stage_page(&page(rows, false)).await.unwrap_err();
        assert!(matches!(err, PurgeError::MalformedKey { .. }));

        // Nothing was staged.
        assert!(ledger::pending(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_page_stages_nothing() {
        let dir = tempdir().unwrap();
        let (tx, rx) = queue::bounded(8);
        let counters = Arc::new(PurgeCounters::default());
        let mut stager = PartitionStager::new(dir.path(), "", tx, counters);

        assert!(stager.stage_page(&page(vec![], false)).await.unwrap());
        stager.finish().await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
