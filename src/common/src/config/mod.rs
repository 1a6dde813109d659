use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::error::{PurgeError, PurgeResult};

/// Connection identity of the backing table store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub dsn: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://local"),
        }
    }
}

/// Tunables of the purge pipeline itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Rows older than this many days are purged.
    pub older_than_days: u32,
    /// Constant prefix in front of the tick-encoded partition keys.
    pub partition_key_prefix: String,
    /// Width of the delete worker pool. 1 means sequential deletion.
    pub workers: usize,
    /// Directory holding the on-disk staging ledgers.
    pub staging_dir: String,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            older_than_days: 365,
            partition_key_prefix: String::new(),
            workers: 32,
            staging_dir: String::from(".data/staging"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub connection: ConnectionConfig,
    /// Table to purge.
    pub table: String,
    pub purge: PurgeConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("tablepurge.toml"))
            .merge(Env::prefixed("TABLEPURGE__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TABLEPURGE__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Reject invalid inputs before the pipeline starts.
    pub fn validate(&self) -> PurgeResult<()> {
        if self.connection.dsn.is_empty() {
            return Err(PurgeError::Configuration(
                "connection dsn cannot be empty".to_string(),
            ));
        }
        if self.table.is_empty() {
            return Err(PurgeError::Configuration(
                "table name cannot be empty".to_string(),
            ));
        }
        if self.purge.older_than_days == 0 {
            return Err(PurgeError::Configuration(
                "purge age must be at least one day".to_string(),
            ));
        }
        if self.purge.workers == 0 {
            return Err(PurgeError::Configuration(
                "worker pool width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
