//! Store client pooling.
//!
//! Client instances are expensive to construct and must be reused for the
//! whole run, so the pool caches one instance per distinct connection dsn.
//! The pool is an owned object passed to whoever needs clients; there is no
//! process-wide static cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{PurgeError, PurgeResult};
use crate::store::{InMemoryTableStore, TableStore};

#[derive(Default)]
pub struct ClientPool {
    clients: Mutex<HashMap<String, Arc<dyn TableStore>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached client for this dsn, constructing it on first use.
    pub async fn get(&self, dsn: &str) -> PurgeResult<Arc<dyn TableStore>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(dsn) {
            return Ok(client.clone());
        }

        let client = Self::connect(dsn)?;
        log::info!("constructed store client for {dsn}");
        clients.insert(dsn.to_string(), client.clone());
        Ok(client)
    }

    fn connect(dsn: &str) -> PurgeResult<Arc<dyn TableStore>> {
        match dsn.split_once("://") {
            Some(("memory", _)) => Ok(Arc::new(InMemoryTableStore::new())),
            _ => Err(PurgeError::Configuration(format!(
                "unsupported connection dsn {dsn:?} (expected memory://...)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_client_per_connection_identity() {
        let pool = ClientPool::new();

        let first = pool.get("memory://a").await.unwrap();
        let again = pool.get("memory://a").await.unwrap();
        let other = pool.get("memory://b").await.unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_a_configuration_error() {
        let pool = ClientPool::new();
        let err = pool.get("https://example.invalid").await.unwrap_err();
        assert!(matches!(err, PurgeError::Configuration(_)));
    }
}
