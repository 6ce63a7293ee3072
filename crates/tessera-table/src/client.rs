//! The table storage client interface.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AttributeUpdate, BatchDeleteOutcome, Item, Key, ScanPage, ScanRequest, TableDescription,
    TableSchema, TtlDescription,
};

/// Client for a key-value table storage service.
///
/// Each method is a single request against the service. Implementations
/// must not retry internally; retry policy belongs to the caller.
#[async_trait]
pub trait TableClient: Send + Sync + std::fmt::Debug {
    /// Fetch table metadata. Fails with
    /// [`StorageError::ResourceNotFound`](crate::StorageError::ResourceNotFound)
    /// when the table does not exist.
    async fn describe_table(&self, table: &str) -> Result<TableDescription>;

    /// Create a table. Returns the description as of creation (usually `Creating`).
    async fn create_table(&self, schema: &TableSchema) -> Result<TableDescription>;

    /// Fetch the native TTL configuration.
    async fn describe_ttl(&self, table: &str) -> Result<TtlDescription>;

    /// Enable the native TTL sweep on `attribute`.
    async fn enable_ttl(&self, table: &str, attribute: &str) -> Result<TtlDescription>;

    /// Point lookup.
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>>;

    /// Replace the whole item (insert if absent).
    async fn put_item(&self, table: &str, item: Item) -> Result<()>;

    /// Apply attribute changes to one item atomically, creating it if absent.
    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: HashMap<String, AttributeUpdate>,
    ) -> Result<()>;

    /// Delete one item. Deleting an absent item is not an error.
    async fn delete_item(&self, table: &str, key: &Key) -> Result<()>;

    /// Read one page of items.
    async fn scan(&self, table: &str, request: &ScanRequest) -> Result<ScanPage>;

    /// Delete up to [`MAX_BATCH_DELETE`](crate::MAX_BATCH_DELETE) items.
    async fn batch_delete(&self, table: &str, keys: &[Key]) -> Result<BatchDeleteOutcome>;

    /// Scan every page, following `last_evaluated_key` until exhausted.
    async fn scan_all(&self, table: &str, mut request: ScanRequest) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        loop {
            let page = self.scan(table, &request).await?;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => return Ok(items),
            }
        }
    }
}
