//! Configuration for the session store.
//!
//! ```toml
//! table_name = "sessions"
//! hash_key = "sessionId"
//! key_prefix = "sess:"
//! read_capacity = 5
//! write_capacity = 5
//! provision_timeout_ms = 6000
//! poll_interval_ms = 1000
//! reap_interval_secs = 600
//! reap_batch_size = 25
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_table::MAX_BATCH_DELETE;

use crate::error::ConfigError;

/// Default backing table name.
pub const DEFAULT_TABLE_NAME: &str = "sessions";

/// Default hash key attribute.
pub const DEFAULT_HASH_KEY: &str = "sessionId";

/// Default prefix prepended to session ids in storage.
pub const DEFAULT_KEY_PREFIX: &str = "sess:";

/// Default time to wait for a new table to become active.
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(6);

/// Default interval between table status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`SessionStore`](crate::SessionStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backing table name.
    pub table_name: String,

    /// Name of the string hash key attribute.
    pub hash_key: String,

    /// Prefix prepended to every session id. Bulk operations only see keys
    /// carrying it.
    pub key_prefix: String,

    /// Read throughput requested when creating the table.
    pub read_capacity: u64,

    /// Write throughput requested when creating the table.
    pub write_capacity: u64,

    /// How long to wait for a newly created table to become active.
    pub provision_timeout_ms: u64,

    /// Interval between table status polls while waiting.
    pub poll_interval_ms: u64,

    /// Interval for the reaper spawned by
    /// [`SessionStore::spawn_reaper`](crate::SessionStore::spawn_reaper).
    pub reap_interval_secs: Option<u64>,

    /// Keys per batch delete request. Clamped to the service maximum.
    pub reap_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            hash_key: DEFAULT_HASH_KEY.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            read_capacity: 5,
            write_capacity: 5,
            provision_timeout_ms: DEFAULT_PROVISION_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            reap_interval_secs: None,
            reap_batch_size: MAX_BATCH_DELETE,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing fields take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the backing table name.
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Set the hash key attribute name.
    pub fn with_hash_key(mut self, hash_key: impl Into<String>) -> Self {
        self.hash_key = hash_key.into();
        self
    }

    /// Set the key prefix. An empty prefix stores ids verbatim.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the throughput requested at table creation.
    pub fn with_capacity(mut self, read: u64, write: u64) -> Self {
        self.read_capacity = read;
        self.write_capacity = write;
        self
    }

    /// Set the table activation timeout.
    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the table status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the reaper interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    /// Set the number of keys per batch delete.
    pub fn with_reap_batch_size(mut self, size: usize) -> Self {
        self.reap_batch_size = size;
        self
    }

    /// Table activation timeout.
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }

    /// Table status poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reaper interval, if configured.
    pub fn reap_interval(&self) -> Option<Duration> {
        self.reap_interval_secs.map(Duration::from_secs)
    }

    /// Batch size actually used for deletes.
    pub fn effective_batch_size(&self) -> usize {
        self.reap_batch_size.clamp(1, MAX_BATCH_DELETE)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_name.trim().is_empty() {
            return Err(ConfigError::Invalid("table_name must not be empty".into()));
        }
        if self.hash_key.trim().is_empty() {
            return Err(ConfigError::Invalid("hash_key must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.reap_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "reap_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.table_name, "sessions");
        assert_eq!(config.provision_timeout(), Duration::from_secs(6));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.reap_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = StoreConfig::from_toml_str(
            r#"
            table_name = "web-sessions"
            reap_interval_secs = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.table_name, "web-sessions");
        assert_eq!(config.hash_key, DEFAULT_HASH_KEY);
        assert_eq!(config.reap_interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let err = StoreConfig::from_toml_str(r#"table_name = """#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = StoreConfig::from_toml_str("poll_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_batch_size_clamped() {
        assert_eq!(
            StoreConfig::new()
                .with_reap_batch_size(100)
                .effective_batch_size(),
            MAX_BATCH_DELETE
        );
        assert_eq!(
            StoreConfig::new().with_reap_batch_size(0).effective_batch_size(),
            1
        );
    }
}
