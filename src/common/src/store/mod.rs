//! Table store wire model and client trait.
//!
//! The purge pipeline talks to the store exclusively through [`TableStore`]:
//! a range-filtered, column-projected, paginated read and an atomic batched
//! delete. Real transports plug in behind the trait; the built-in
//! [`memory::InMemoryTableStore`] backend exists for local runs and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PurgeResult;

pub mod memory;

pub use memory::InMemoryTableStore;

/// Store-imposed ceiling on rows per batched delete.
pub const MAX_BATCH_SIZE: usize = 100;

pub const PARTITION_KEY_COLUMN: &str = "PartitionKey";
pub const ROW_KEY_COLUMN: &str = "RowKey";

/// The key pair that fully identifies a row for deletion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKeys {
    pub partition_key: String,
    pub row_key: String,
}

impl RowKeys {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

/// Opaque cursor marking where the next page should resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation(pub String);

/// One segment of a paginated result stream. Rows arrive ordered by
/// partition key then row key; the cursor is absent on the final page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<RowKeys>,
    pub continuation: Option<Continuation>,
}

impl Page {
    pub fn is_final(&self) -> bool {
        self.continuation.is_none()
    }
}

/// Half-open range predicate `[lower, upper)` over the partition key,
/// projecting only the two key columns the deletion stage needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub lower: String,
    pub upper: String,
    pub columns: &'static [&'static str],
}

impl RangeQuery {
    pub const COLUMNS: &'static [&'static str] = &[PARTITION_KEY_COLUMN, ROW_KEY_COLUMN];

    /// Build the predicate `partitionKey >= prefix+lower AND
    /// partitionKey < prefix+upper`, defaulting the lower bound to the
    /// lexical minimum.
    pub fn build(lower: Option<&str>, upper: &str, prefix: &str) -> Self {
        Self {
            lower: format!("{prefix}{}", lower.unwrap_or("0")),
            upper: format!("{prefix}{upper}"),
            columns: Self::COLUMNS,
        }
    }

    pub fn contains(&self, partition_key: &str) -> bool {
        self.lower.as_str() <= partition_key && partition_key < self.upper.as_str()
    }
}

/// Outcome of one atomic batched delete. Only a transport-level `Err`
/// carries a fatal failure; a batch whose rows were already removed by an
/// earlier run reports [`BatchOutcome::NotFound`] and deletes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Deleted(usize),
    NotFound,
}

/// Client for the backing table store.
///
/// Instances are expensive to construct and are shared for the whole run;
/// see [`crate::client::ClientPool`].
#[async_trait]
pub trait TableStore: Send + Sync + std::fmt::Debug {
    /// Issue one bounded, range-filtered read. The caller must not assume a
    /// fixed page size and never re-requests a consumed page.
    async fn query_segment(
        &self,
        table: &str,
        query: &RangeQuery,
        cursor: Option<&Continuation>,
    ) -> PurgeResult<Page>;

    /// Atomically delete up to [`MAX_BATCH_SIZE`] rows, all of which must
    /// share `partition_key`.
    async fn execute_batch(
        &self,
        table: &str,
        partition_key: &str,
        rows: &[RowKeys],
    ) -> PurgeResult<BatchOutcome>;
}
