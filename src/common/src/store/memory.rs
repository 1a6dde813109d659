//! In-memory table store backend.
//!
//! Serves `memory://` connection dsns. Rows live in an ordered set so pages
//! come back in partition-key-then-row-key order with key-based continuation
//! cursors, and batch deletes follow the real store's contract: atomic, one
//! partition per batch, whole-batch not-found when any row is already gone.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{PurgeError, PurgeResult};
use crate::store::{
    BatchOutcome, Continuation, Page, RangeQuery, RowKeys, TableStore, MAX_BATCH_SIZE,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Default)]
struct StoreState {
    rows: BTreeSet<(String, String)>,
    failing_partitions: HashSet<String>,
    fail_queries: bool,
    queries_served: usize,
    batches_executed: usize,
}

#[derive(Debug)]
pub struct InMemoryTableStore {
    state: Mutex<StoreState>,
    page_size: usize,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            page_size: page_size.max(1),
        }
    }

    pub async fn insert(&self, partition_key: impl Into<String>, row_key: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.rows.insert((partition_key.into(), row_key.into()));
    }

    pub async fn insert_many(&self, rows: impl IntoIterator<Item = RowKeys>) {
        let mut state = self.state.lock().await;
        for row in rows {
            state.rows.insert((row.partition_key, row.row_key));
        }
    }

    /// Remove a row out-of-band, simulating a delete by an earlier run.
    pub async fn remove(&self, partition_key: &str, row_key: &str) -> bool {
        let mut state = self.state.lock().await;
        state
            .rows
            .remove(&(partition_key.to_string(), row_key.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.rows.is_empty()
    }

    pub async fn contains(&self, partition_key: &str, row_key: &str) -> bool {
        self.state
            .lock()
            .await
            .rows
            .contains(&(partition_key.to_string(), row_key.to_string()))
    }
}

impl InMemoryTableStore {
    /// Make every batch delete against this partition fail.
    pub async fn fail_deletes_for(&self, partition_key: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.failing_partitions.insert(partition_key.into());
    }

    /// Make every paginated read fail.
    pub async fn fail_queries(&self) {
        self.state.lock().await.fail_queries = true;
    }

    pub async fn queries_served(&self) -> usize {
        self.state.lock().await.queries_served
    }

    pub async fn batches_executed(&self) -> usize {
        self.state.lock().await.batches_executed
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn query_segment(
        &self,
        _table: &str,
        query: &RangeQuery,
        cursor: Option<&Continuation>,
    ) -> PurgeResult<Page> {
        let mut state = self.state.lock().await;

        if state.fail_queries {
            return Err(PurgeError::Query("injected query failure".to_string()));
        }
        state.queries_served += 1;

        // Key-based resumption: a cursor names the last row of the previous
        // page, so concurrent deletion of earlier rows cannot skew paging.
        let after = match cursor {
            Some(Continuation(token)) => Some(token.split_once(',').map_or_else(
                || {
                    Err(PurgeError::Query(format!(
                        "unintelligible continuation cursor {token:?}"
                    )))
                },
                |(pk, rk)| Ok((pk.to_string(), rk.to_string())),
            )?),
            None => None,
        };

        let mut rows: Vec<RowKeys> = Vec::with_capacity(self.page_size.min(64));
        let mut continuation = None;
        for (pk, rk) in state.rows.iter() {
            if !query.contains(pk) {
                continue;
            }
            if let Some(after) = &after {
                if (pk.as_str(), rk.as_str()) <= (after.0.as_str(), after.1.as_str()) {
                    continue;
                }
            }
            if rows.len() == self.page_size {
                continuation = Some(Continuation(format!(
                    "{},{}",
                    rows[self.page_size - 1].partition_key,
                    rows[self.page_size - 1].row_key
                )));
                break;
            }
            rows.push(RowKeys::new(pk.clone(), rk.clone()));
        }

        Ok(Page { rows, continuation })
    }

    async fn execute_batch(
        &self,
        _table: &str,
        partition_key: &str,
        rows: &[RowKeys],
    ) -> PurgeResult<BatchOutcome> {
        let mut state = self.state.lock().await;

        state.batches_executed += 1;
        if state.failing_partitions.contains(partition_key) {
            return Err(PurgeError::Delete(format!(
                "injected delete failure for partition {partition_key}"
            )));
        }

        if rows.is_empty() || rows.len() > MAX_BATCH_SIZE {
            return Err(PurgeError::Delete(format!(
                "batch of {} rows outside the 1..={MAX_BATCH_SIZE} limit",
                rows.len()
            )));
        }
        if rows.iter().any(|r| r.partition_key != partition_key) {
            return Err(PurgeError::Delete(format!(
                "batch addresses more than one partition (expected {partition_key})"
            )));
        }

        // Atomic: any absent row fails the whole batch as not-found and
        // nothing is deleted.
        let all_present = rows.iter().all(|r| {
            state
                .rows
                .contains(&(r.partition_key.clone(), r.row_key.clone()))
        });
        if !all_present {
            return Ok(BatchOutcome::NotFound);
        }

        for row in rows {
            state
                .rows
                .remove(&(row.partition_key.clone(), row.row_key.clone()));
        }
        Ok(BatchOutcome::Deleted(rows.len()))
    }
}
