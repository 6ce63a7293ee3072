//! In-process table storage engine.
//!
//! [`MemoryTable`] behaves like a remote table service: tables pass through
//! `Creating` before they become usable, scans are paged, batch deletes are
//! capped, and the native TTL sweep only runs when someone calls
//! [`MemoryTable::sweep_expired`]. Call counters and one-shot failure
//! injection make it suitable as a test double.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::client::TableClient;
use crate::error::{Result, StorageError};
use crate::types::{
    AttributeUpdate, AttributeValue, BatchDeleteOutcome, Item, Key, MAX_BATCH_DELETE, ScanPage,
    ScanRequest, TableDescription, TableSchema, TableStatus, TtlDescription, TtlStatus,
};

/// Default number of items evaluated per scan page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Requests understood by [`MemoryTable`], used for counters and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DescribeTable,
    CreateTable,
    DescribeTtl,
    EnableTtl,
    GetItem,
    PutItem,
    UpdateItem,
    DeleteItem,
    Scan,
    BatchDelete,
}

#[derive(Debug)]
struct TableState {
    hash_key: String,
    status: TableStatus,
    /// Describes remaining before a transitional table settles.
    pending_describes: usize,
    settle_status: TableStatus,
    ttl: TtlDescription,
    items: BTreeMap<String, Item>,
}

impl TableState {
    fn describe(&self, name: &str) -> TableDescription {
        TableDescription {
            table_name: name.to_string(),
            status: self.status,
            hash_key: self.hash_key.clone(),
            item_count: self.items.len(),
        }
    }

    fn key_value<'a>(&self, key: &'a Key) -> Result<&'a str> {
        if key.attribute != self.hash_key {
            return Err(StorageError::Validation(format!(
                "key attribute {} does not match hash key {}",
                key.attribute, self.hash_key
            )));
        }
        Ok(&key.value)
    }
}

#[derive(Debug)]
struct Inner {
    tables: HashMap<String, TableState>,
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, VecDeque<StorageError>>,
    unprocessed: VecDeque<Vec<Key>>,
    activation_describes: usize,
    creation_outcome: TableStatus,
    page_size: usize,
}

impl Inner {
    fn table(&self, name: &str) -> Result<&TableState> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::ResourceNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableState> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::ResourceNotFound(name.to_string()))
    }

    /// Item operations are only accepted by active tables.
    fn active_table_mut(&mut self, name: &str) -> Result<&mut TableState> {
        let table = self.table_mut(name)?;
        if table.status != TableStatus::Active {
            return Err(StorageError::ResourceNotFound(format!(
                "{} (status {})",
                name, table.status
            )));
        }
        Ok(table)
    }
}

/// In-memory [`TableClient`].
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTable {
    /// Create an engine with no tables.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tables: HashMap::new(),
                calls: HashMap::new(),
                failures: HashMap::new(),
                unprocessed: VecDeque::new(),
                activation_describes: 1,
                creation_outcome: TableStatus::Active,
                page_size: DEFAULT_PAGE_SIZE,
            })),
        }
    }

    /// Number of `describe_table` calls a new table stays `Creating` for.
    /// Zero makes creation settle immediately.
    pub fn with_activation_delay(self, describes: usize) -> Self {
        self.inner.lock().activation_describes = describes;
        self
    }

    /// Status new tables settle into once creation completes.
    pub fn with_creation_outcome(self, status: TableStatus) -> Self {
        self.inner.lock().creation_outcome = status;
        self
    }

    /// Number of items evaluated per scan page.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.inner.lock().page_size = page_size.max(1);
        self
    }

    /// Create an active table directly, bypassing the creation lifecycle.
    pub fn seed_table(&self, name: &str, hash_key: &str) {
        self.seed_table_in(name, hash_key, TableStatus::Active, 0);
    }

    /// Create a table in `status` that turns `Active` after `describes`
    /// calls to `describe_table`, as one created by another process would.
    pub fn seed_table_in(
        &self,
        name: &str,
        hash_key: &str,
        status: TableStatus,
        describes: usize,
    ) {
        let status = if describes == 0 {
            TableStatus::Active
        } else {
            status
        };
        self.inner.lock().tables.insert(
            name.to_string(),
            TableState {
                hash_key: hash_key.to_string(),
                status,
                pending_describes: describes,
                settle_status: TableStatus::Active,
                ttl: TtlDescription {
                    status: TtlStatus::Disabled,
                    attribute: None,
                },
                items: BTreeMap::new(),
            },
        );
    }

    /// Overwrite the TTL configuration of an existing table.
    pub fn set_ttl(&self, table: &str, ttl: TtlDescription) -> Result<()> {
        self.inner.lock().table_mut(table)?.ttl = ttl;
        Ok(())
    }

    /// Make the next call of `op` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: Operation, error: StorageError) {
        self.inner
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Make the next `batch_delete` report `keys` as unprocessed. Keys in
    /// that list are left in place; the rest of the batch is deleted.
    pub fn leave_unprocessed(&self, keys: Vec<Key>) {
        self.inner.lock().unprocessed.push_back(keys);
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: Operation) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of items in a table (zero if it does not exist).
    pub fn item_count(&self, table: &str) -> usize {
        self.inner
            .lock()
            .tables
            .get(table)
            .map(|t| t.items.len())
            .unwrap_or(0)
    }

    /// Raw stored item by key value, regardless of table status.
    pub fn raw_item(&self, table: &str, key_value: &str) -> Option<Item> {
        self.inner
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.items.get(key_value).cloned())
    }

    /// Emulate one pass of the native TTL sweep.
    ///
    /// Only runs when TTL is enabled on `attribute`; removes items whose
    /// numeric value of that attribute is below `now_secs`. Returns the
    /// number of items removed.
    pub fn sweep_expired(&self, table: &str, now_secs: i64) -> usize {
        let mut inner = self.inner.lock();
        let Some(state) = inner.tables.get_mut(table) else {
            return 0;
        };
        if state.ttl.status != TtlStatus::Enabled {
            return 0;
        }
        let Some(attribute) = state.ttl.attribute.clone() else {
            return 0;
        };

        let before = state.items.len();
        state.items.retain(|_, item| {
            !item
                .get(&attribute)
                .and_then(AttributeValue::as_n)
                .is_some_and(|secs| secs < now_secs)
        });
        let removed = before - state.items.len();
        debug!(table = %table, removed, "Native TTL sweep");
        removed
    }

    /// Count the call, then surface any injected failure.
    fn enter(&self, op: Operation) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock();
        *inner.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            trace!(?op, error = %err, "Injected failure");
            return Err(err);
        }
        Ok(inner)
    }
}

#[async_trait]
impl TableClient for MemoryTable {
    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        let mut inner = self.enter(Operation::DescribeTable)?;
        let state = inner.table_mut(table)?;
        if state.pending_describes > 0 {
            state.pending_describes -= 1;
            if state.pending_describes == 0 {
                state.status = state.settle_status;
            }
        }
        Ok(state.describe(table))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<TableDescription> {
        let mut inner = self.enter(Operation::CreateTable)?;
        if inner.tables.contains_key(&schema.table_name) {
            return Err(StorageError::ResourceInUse(schema.table_name.clone()));
        }
        if schema.hash_key.is_empty() {
            return Err(StorageError::Validation("empty hash key".to_string()));
        }

        let pending = inner.activation_describes;
        let settle = inner.creation_outcome;
        let state = TableState {
            hash_key: schema.hash_key.clone(),
            status: if pending == 0 {
                settle
            } else {
                TableStatus::Creating
            },
            pending_describes: pending,
            settle_status: settle,
            ttl: TtlDescription {
                status: TtlStatus::Disabled,
                attribute: None,
            },
            items: BTreeMap::new(),
        };
        let description = state.describe(&schema.table_name);
        inner.tables.insert(schema.table_name.clone(), state);

        debug!(table = %schema.table_name, hash_key = %schema.hash_key, "Table created");
        Ok(description)
    }

    async fn describe_ttl(&self, table: &str) -> Result<TtlDescription> {
        let inner = self.enter(Operation::DescribeTtl)?;
        Ok(inner.table(table)?.ttl.clone())
    }

    async fn enable_ttl(&self, table: &str, attribute: &str) -> Result<TtlDescription> {
        let mut inner = self.enter(Operation::EnableTtl)?;
        let state = inner.table_mut(table)?;
        if state.ttl.status == TtlStatus::Enabled
            && state.ttl.attribute.as_deref() != Some(attribute)
        {
            return Err(StorageError::Validation(format!(
                "TTL already enabled on a different attribute for {}",
                table
            )));
        }
        state.ttl = TtlDescription {
            status: TtlStatus::Enabled,
            attribute: Some(attribute.to_string()),
        };
        Ok(state.ttl.clone())
    }

    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>> {
        let mut inner = self.enter(Operation::GetItem)?;
        let state = inner.active_table_mut(table)?;
        let value = state.key_value(key)?;
        Ok(state.items.get(value).cloned())
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<()> {
        let mut inner = self.enter(Operation::PutItem)?;
        let state = inner.active_table_mut(table)?;
        let Some(key) = Key::from_item(&state.hash_key, &item) else {
            return Err(StorageError::Validation(format!(
                "item is missing string hash key {}",
                state.hash_key
            )));
        };
        state.items.insert(key.value, item);
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: HashMap<String, AttributeUpdate>,
    ) -> Result<()> {
        let mut inner = self.enter(Operation::UpdateItem)?;
        let state = inner.active_table_mut(table)?;
        let value = state.key_value(key)?.to_string();
        if updates.contains_key(&state.hash_key) {
            return Err(StorageError::Validation(
                "cannot update the hash key attribute".to_string(),
            ));
        }

        let item = state.items.entry(value.clone()).or_insert_with(|| {
            let mut item = Item::new();
            item.insert(key.attribute.clone(), AttributeValue::S(value));
            item
        });
        for (attribute, update) in updates {
            match update {
                AttributeUpdate::Put(v) => {
                    item.insert(attribute, v);
                }
                AttributeUpdate::Remove => {
                    item.remove(&attribute);
                }
            }
        }
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<()> {
        let mut inner = self.enter(Operation::DeleteItem)?;
        let state = inner.active_table_mut(table)?;
        let value = state.key_value(key)?.to_string();
        state.items.remove(&value);
        Ok(())
    }

    async fn scan(&self, table: &str, request: &ScanRequest) -> Result<ScanPage> {
        let mut inner = self.enter(Operation::Scan)?;
        let page_size = inner.page_size;
        let state = inner.active_table_mut(table)?;

        let lower = match &request.exclusive_start_key {
            Some(key) => Bound::Excluded(state.key_value(key)?.to_string()),
            None => Bound::Unbounded,
        };

        let mut evaluated = state
            .items
            .range::<String, _>((lower, Bound::Unbounded))
            .take(page_size + 1)
            .collect::<Vec<_>>();

        let last_evaluated_key = if evaluated.len() > page_size {
            evaluated.truncate(page_size);
            evaluated
                .last()
                .map(|(k, _)| Key::new(state.hash_key.clone(), k.as_str()))
        } else {
            None
        };

        let items = evaluated
            .into_iter()
            .map(|(_, item)| item)
            .filter(|item| request.filter.as_ref().is_none_or(|f| f.matches(item)))
            .cloned()
            .collect();

        Ok(ScanPage {
            items,
            last_evaluated_key,
        })
    }

    async fn batch_delete(&self, table: &str, keys: &[Key]) -> Result<BatchDeleteOutcome> {
        let mut inner = self.enter(Operation::BatchDelete)?;
        if keys.is_empty() || keys.len() > MAX_BATCH_DELETE {
            return Err(StorageError::Validation(format!(
                "batch delete requires 1 to {} keys, got {}",
                MAX_BATCH_DELETE,
                keys.len()
            )));
        }
        let unprocessed = inner.unprocessed.pop_front().unwrap_or_default();
        let state = inner.active_table_mut(table)?;
        for key in keys {
            state.key_value(key)?;
        }
        for key in keys.iter().filter(|k| !unprocessed.contains(k)) {
            state.items.remove(&key.value);
        }
        Ok(BatchDeleteOutcome { unprocessed })
    }
}
