use thiserror::Error;

/// Error taxonomy for a purge run.
///
/// Every variant is fatal for the run in which it occurs. A batch delete
/// hitting rows that no longer exist is not an error at all; that outcome is
/// reported as [`crate::store::BatchOutcome::NotFound`] and processing
/// continues.
#[derive(Debug, Error)]
pub enum PurgeError {
    /// A partition key does not parse as the expected tick encoding. The
    /// target table does not use the expected key scheme, so the run must
    /// abort before deleting anything.
    #[error("partition key {key:?} does not match the expected tick format")]
    MalformedKey { key: String },

    /// The store's paginated read failed.
    #[error("paginated query failed: {0}")]
    Query(String),

    /// A batch delete failed for a reason other than the rows being absent.
    #[error("batch delete failed: {0}")]
    Delete(String),

    /// Reading or writing a staging ledger failed. Integrity of in-flight
    /// partitions can no longer be guaranteed.
    #[error("staging ledger I/O failed: {0}")]
    StagingIo(#[from] std::io::Error),

    /// Invalid inputs, rejected before the pipeline starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type PurgeResult<T> = Result<T, PurgeError>;
