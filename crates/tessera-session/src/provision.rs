//! Table provisioning.
//!
//! Makes sure the backing table exists with a single string hash key, waits
//! for it to become active, and turns on native TTL for the expiry-seconds
//! attribute.

use std::sync::Arc;
use std::time::Duration;

use tessera_table::{TableClient, TableSchema, TableStatus, TtlStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::ProvisionError;
use crate::record::ATTR_EXPIRE_AT_SECONDS;

type Result<T> = std::result::Result<T, ProvisionError>;

/// Brings a table into a usable state. Runs once per store.
#[derive(Debug)]
pub struct Provisioner {
    client: Arc<dyn TableClient>,
    schema: TableSchema,
    ttl_attribute: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl Provisioner {
    /// Create a provisioner for the table described by `config`.
    pub fn new(client: Arc<dyn TableClient>, config: &StoreConfig) -> Self {
        Self {
            client,
            schema: TableSchema {
                table_name: config.table_name.clone(),
                hash_key: config.hash_key.clone(),
                read_capacity: config.read_capacity,
                write_capacity: config.write_capacity,
            },
            ttl_attribute: ATTR_EXPIRE_AT_SECONDS.to_string(),
            timeout: config.provision_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    fn table(&self) -> &str {
        &self.schema.table_name
    }

    /// Ensure the table exists, is active, and has native TTL enabled.
    ///
    /// An existing table must be keyed on the configured hash key and only
    /// gets its TTL checked; failing to enable TTL
    /// there is logged and tolerated. A table created here must also get
    /// TTL enabled, or provisioning fails.
    pub async fn ensure_ready(&self) -> Result<()> {
        match self.client.describe_table(self.table()).await {
            Ok(description) => {
                debug!(
                    table = %self.table(),
                    status = %description.status,
                    "Table exists"
                );
                if description.hash_key != self.schema.hash_key {
                    return Err(ProvisionError::SchemaMismatch {
                        table: self.table().to_string(),
                        expected: self.schema.hash_key.clone(),
                        found: description.hash_key,
                    });
                }
                if description.status != TableStatus::Active {
                    self.check_status(description.status)?;
                    self.wait_until_active().await?;
                }
                if let Err(source) = self.ensure_ttl().await {
                    warn!(
                        table = %self.table(),
                        error = %source,
                        "Could not enable native TTL, relying on the reaper"
                    );
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(table = %self.table(), "Table not found, creating");
                let created = self
                    .client
                    .create_table(&self.schema)
                    .await
                    .map_err(|source| ProvisionError::Create {
                        table: self.table().to_string(),
                        source,
                    })?;
                if created.status != TableStatus::Active {
                    self.check_status(created.status)?;
                    self.wait_until_active().await?;
                }
                self.ensure_ttl()
                    .await
                    .map_err(|source| ProvisionError::EnableTtl {
                        table: self.table().to_string(),
                        source,
                    })?;
                info!(table = %self.table(), "Table created and active");
                Ok(())
            }
            Err(source) => Err(ProvisionError::Describe {
                table: self.table().to_string(),
                source,
            }),
        }
    }

    fn check_status(&self, status: TableStatus) -> Result<()> {
        if status.is_terminal_failure() {
            return Err(ProvisionError::BadStatus {
                table: self.table().to_string(),
                status,
            });
        }
        Ok(())
    }

    /// Poll until the table is active, hits a terminal status, or the
    /// timeout elapses.
    async fn wait_until_active(&self) -> Result<()> {
        let started = Instant::now();
        let poll = async {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                match self.client.describe_table(self.table()).await {
                    Ok(description) if description.status == TableStatus::Active => {
                        return Ok(());
                    }
                    Ok(description) => {
                        debug!(
                            table = %self.table(),
                            status = %description.status,
                            "Waiting for table to become active"
                        );
                        self.check_status(description.status)?;
                    }
                    // A just-created table may not be visible yet.
                    Err(e) if e.is_not_found() => {
                        debug!(table = %self.table(), "Table not visible yet");
                    }
                    Err(source) => {
                        return Err(ProvisionError::Describe {
                            table: self.table().to_string(),
                            source,
                        });
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProvisionError::Timeout {
                table: self.table().to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Enable native TTL unless it is already enabled or enabling on the
    /// expiry attribute.
    async fn ensure_ttl(&self) -> std::result::Result<(), tessera_table::StorageError> {
        let ttl = self.client.describe_ttl(self.table()).await?;
        let on_our_attribute = ttl.attribute.as_deref() == Some(self.ttl_attribute.as_str());
        if ttl.status.is_active() && on_our_attribute {
            debug!(table = %self.table(), status = ?ttl.status, "Native TTL already on");
            return Ok(());
        }
        if matches!(ttl.status, TtlStatus::Disabling) {
            debug!(table = %self.table(), "Native TTL is being disabled, re-enabling");
        }

        self.client
            .enable_ttl(self.table(), &self.ttl_attribute)
            .await?;
        info!(
            table = %self.table(),
            attribute = %self.ttl_attribute,
            "Native TTL enabled"
        );
        Ok(())
    }
}
