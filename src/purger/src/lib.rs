//! Concurrent purge pipeline.
//!
//! One producer task pages through the store in order and stages candidate
//! rows into on-disk ledgers, closing each partition the moment no further
//! page can contribute rows to it. A fixed pool of workers drains the closed
//! partitions from a bounded queue and deletes their staged rows in atomic
//! batches. Ledgers outlive failed runs, so a re-run resumes where the last
//! one stopped.

pub mod deleter;
pub mod ledger;
pub mod orchestrator;
pub mod pager;
pub mod queue;
pub mod stager;

pub use orchestrator::{PurgeOptions, PurgeSummary, Purger, DEFAULT_WORKERS};
