//! On-disk staging ledgers.
//!
//! One append-only text file per partition, `<partitionKey>,<rowKey>` per
//! line (keys are comma-free by contract). A ledger is created lazily on the
//! partition's first staged row, appended to by every contributing page, and
//! removed only once every row in it has been deleted from the store or
//! confirmed already absent. A ledger still present at run start therefore
//! marks an unfinished partition from a crashed run.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{create_dir_all, read_dir, read_to_string, remove_file, OpenOptions};
use tokio::io::AsyncWriteExt;

use common::error::{PurgeError, PurgeResult};
use common::store::RowKeys;

pub const LEDGER_EXTENSION: &str = "ledger";

#[derive(Debug, Clone)]
pub struct StagingLedger {
    partition_key: String,
    path: PathBuf,
}

impl StagingLedger {
    pub fn new(staging_dir: &Path, partition_key: &str) -> Self {
        Self {
            partition_key: partition_key.to_string(),
            path: staging_dir.join(format!("{partition_key}.{LEDGER_EXTENSION}")),
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows under a scoped write: the file handle is flushed and
    /// released before this returns, error or not.
    pub async fn append(&self, rows: &[RowKeys]) -> PurgeResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut buffer = String::new();
        for row in rows {
            buffer.push_str(&row.partition_key);
            buffer.push(',');
            buffer.push_str(&row.row_key);
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Read the full ledger in append order.
    pub async fn read_all(&self) -> PurgeResult<Vec<RowKeys>> {
        let contents = read_to_string(&self.path).await?;
        contents
            .lines()
            .map(|line| {
                line.split_once(',')
                    .map(|(pk, rk)| RowKeys::new(pk, rk))
                    .ok_or_else(|| {
                        PurgeError::StagingIo(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("malformed ledger line {line:?} in {:?}", self.path),
                        ))
                    })
            })
            .collect()
    }

    /// Retire the ledger after its partition has fully completed.
    pub async fn remove(&self) -> PurgeResult<()> {
        remove_file(&self.path).await?;
        Ok(())
    }
}

/// Partition keys whose ledgers were left behind by an earlier run. These
/// are retried as units; their rows are never re-derived from the store.
pub async fn pending(staging_dir: &Path) -> PurgeResult<Vec<String>> {
    let mut dir = match read_dir(staging_dir).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut keys = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LEDGER_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            keys.push(stem.to_string());
        }
    }
    keys.sort();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rows(pk: &str, rks: &[&str]) -> Vec<RowKeys> {
        rks.iter().map(|rk| RowKeys::new(pk, *rk)).collect()
    }

    #[tokio::test]
    async fn test_append_and_read_preserve_order() {
        let dir = tempdir().unwrap();
        let ledger = StagingLedger::new(dir.path(), "p1");

        ledger.append(&rows("p1", &["r2", "r1"])).await.unwrap();
        ledger.append(&rows("p1", &["r3"])).await.unwrap();

        let staged = ledger.read_all().await.unwrap();
        assert_eq!(staged, rows("p1", &["r2", "r1", "r3"]));
    }

    #[tokio::test]
    async fn test_remove_retires_the_file() {
        let dir = tempdir().unwrap();
        let ledger = StagingLedger::new(dir.path(), "p1");

        ledger.append(&rows("p1", &["r1"])).await.unwrap();
        assert!(ledger.path().exists());

        ledger.remove().await.unwrap();
        assert!(!ledger.path().exists());
    }

    #[tokio::test]
    async fn test_pending_lists_leftover_ledgers() {
        let dir = tempdir().unwrap();
        StagingLedger::new(dir.path(), "p2")
            .append(&rows("p2", &["r1"]))
            .await
            .unwrap();
        StagingLedger::new(dir.path(), "p1")
            .append(&rows("p1", &["r1"]))
            .await
            .unwrap();
        // Unrelated files are ignored.
        tokio::fs::write(dir.path().join("notes.txt"), b"x")
            .await
            .unwrap();

        assert_eq!(pending(dir.path()).await.unwrap(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_pending_on_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("never-created");
        assert!(pending(&missing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_all_rejects_malformed_lines() {
        let dir = tempdir().unwrap();
        let ledger = StagingLedger::new(dir.path(), "p1");
        tokio::fs::write(ledger.path(), b"p1,r1\nno-comma-here\n")
            .await
            .unwrap();

        let err = ledger.read_all().await.unwrap_err();
        assert!(matches!(err, PurgeError::StagingIo(_)));
    }
}
