//! Bounded hand-off of closed partitions from the stager to the deleters.
//!
//! Thin wrapper over a bounded `tokio::sync::mpsc` channel. A full queue
//! makes `push` wait, which is what bounds staging memory when deletion lags
//! production. The queue closes when the sender is dropped (the stager has
//! exhausted all pages); consumers drain what remains and then see `None`.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

pub fn bounded(capacity: usize) -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        WorkSender { tx },
        WorkReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Debug, Clone)]
pub struct WorkSender {
    tx: mpsc::Sender<String>,
}

impl WorkSender {
    /// Hand a closed partition to the deletion stage, waiting if the queue
    /// is full. Returns false once every consumer is gone, which only
    /// happens when the pipeline is shutting down.
    pub async fn push(&self, partition_key: String) -> bool {
        self.tx.send(partition_key).await.is_ok()
    }
}

/// Cloneable consumer handle. Clones share one receiver, so each queued
/// partition is delivered to exactly one worker.
#[derive(Debug, Clone)]
pub struct WorkReceiver {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl WorkReceiver {
    /// Next partition, or `None` once the queue is empty and closed.
    pub async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}
