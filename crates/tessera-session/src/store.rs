//! Session store backed by a table storage service.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tessera_table::{Key, MemoryTable, ScanFilter, ScanRequest, TableClient};
use tracing::{debug, error, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::gate::{Lifecycle, ReadinessGate, SettleOnDrop};
use crate::provision::Provisioner;
use crate::record::{Session, SessionPayload, SessionRecord};

/// State shared by all clones of a store.
#[derive(Debug)]
pub(crate) struct StoreInner {
    pub(crate) client: Arc<dyn TableClient>,
    pub(crate) config: StoreConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) gate: ReadinessGate,
}

/// Keyed store of session payloads with expiry.
///
/// Construction starts provisioning of the backing table in the background.
/// Every operation waits for provisioning to finish; if it failed, every
/// operation fails with the same [`Error::Fatal`] without touching storage.
///
/// Clones share the same table binding and readiness gate.
pub struct SessionStore<S: SessionPayload = Session> {
    pub(crate) inner: Arc<StoreInner>,
    _payload: PhantomData<fn() -> S>,
}

impl<S: SessionPayload> Clone for SessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _payload: PhantomData,
        }
    }
}

impl<S: SessionPayload> std::fmt::Debug for SessionStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("table", &self.inner.config.table_name)
            .field("lifecycle", &self.inner.gate.state())
            .finish_non_exhaustive()
    }
}

impl<S: SessionPayload> SessionStore<S> {
    /// Create a store over `client` and start provisioning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(client: Arc<dyn TableClient>, config: StoreConfig) -> Result<Self> {
        Self::with_clock(client, config, Arc::new(SystemClock))
    }

    /// Create a store backed by a fresh [`MemoryTable`].
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryTable::new()), config)
    }

    /// Create a store with a custom time source.
    pub fn with_clock(
        client: Arc<dyn TableClient>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let gate = ReadinessGate::new();
        let provisioner = Provisioner::new(Arc::clone(&client), &config);
        let guard = SettleOnDrop::new(gate.clone());
        let task_gate = gate.clone();
        let table = config.table_name.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = provisioner.ensure_ready().await;
            if let Err(e) = &outcome {
                error!(table = %table, error = %e, "Session table provisioning failed");
            }
            task_gate.settle(outcome);
        });

        Ok(Self {
            inner: Arc::new(StoreInner {
                client,
                config,
                clock,
                gate,
            }),
            _payload: PhantomData,
        })
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.gate.state()
    }

    /// Wait until provisioning has finished.
    pub async fn ready(&self) -> Result<()> {
        self.inner.gate.wait().await
    }

    pub(crate) fn storage_key(&self, id: &str) -> String {
        format!("{}{}", self.inner.config.key_prefix, id)
    }

    pub(crate) fn table_key(&self, id: &str) -> Key {
        Key::new(self.inner.config.hash_key.as_str(), self.storage_key(id))
    }

    /// Session id for a storage key, if the key carries our prefix.
    pub(crate) fn session_id<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(self.inner.config.key_prefix.as_str())
    }

    /// Scan request limited to keys carrying our prefix, plus `extra`.
    pub(crate) fn prefixed_scan(&self, extra: Option<ScanFilter>) -> ScanRequest {
        let prefix = ScanFilter::BeginsWith {
            attribute: self.inner.config.hash_key.clone(),
            prefix: self.inner.config.key_prefix.clone(),
        };
        let filter = match extra {
            Some(extra) => ScanFilter::And(vec![prefix, extra]),
            None => prefix,
        };
        ScanRequest::filtered(filter)
    }

    /// Look up a session.
    ///
    /// Returns `Ok(None)` when the session does not exist or its expiry has
    /// passed but it has not been reaped yet.
    pub async fn get(&self, id: &str) -> Result<Option<S>> {
        self.ready().await?;
        let inner = &self.inner;

        let Some(item) = inner
            .client
            .get_item(&inner.config.table_name, &self.table_key(id))
            .await?
        else {
            trace!(session_id = %id, "Session not found");
            return Ok(None);
        };

        let record = SessionRecord::from_item(&inner.config.hash_key, &item)?;
        if record.is_expired(inner.clock.now()) {
            debug!(session_id = %id, "Session expired, awaiting reap");
            return Ok(None);
        }
        record.decode().map(Some)
    }

    /// Create or fully replace a session.
    pub async fn set(&self, id: &str, session: &S) -> Result<()> {
        self.ready().await?;
        let inner = &self.inner;

        let record = SessionRecord::encode(self.storage_key(id), session)?;
        trace!(session_id = %id, expiry = ?record.expiry, "Storing session");
        inner
            .client
            .put_item(&inner.config.table_name, record.into_item(&inner.config.hash_key))
            .await?;
        Ok(())
    }

    /// Refresh a session's payload and expiry.
    ///
    /// The storage effect is the same as [`set`](Self::set), written as one
    /// atomic field update on the existing key.
    pub async fn touch(&self, id: &str, session: &S) -> Result<()> {
        self.ready().await?;
        let inner = &self.inner;

        let record = SessionRecord::encode(self.storage_key(id), session)?;
        trace!(session_id = %id, expiry = ?record.expiry, "Touching session");
        inner
            .client
            .update_item(
                &inner.config.table_name,
                &self.table_key(id),
                record.field_updates(),
            )
            .await?;
        Ok(())
    }

    /// Delete a session. Fails with [`Error::NotFound`] if it does not exist.
    pub async fn destroy(&self, id: &str) -> Result<()> {
        self.ready().await?;
        let inner = &self.inner;
        let key = self.table_key(id);

        if inner
            .client
            .get_item(&inner.config.table_name, &key)
            .await?
            .is_none()
        {
            return Err(Error::NotFound(id.to_string()));
        }

        inner
            .client
            .delete_item(&inner.config.table_name, &key)
            .await?;
        debug!(session_id = %id, "Session destroyed");
        Ok(())
    }

    /// Number of stored sessions, including expired ones not yet reaped.
    pub async fn length(&self) -> Result<usize> {
        self.ready().await?;
        let inner = &self.inner;

        let items = inner
            .client
            .scan_all(&inner.config.table_name, self.prefixed_scan(None))
            .await?;
        Ok(items.len())
    }

    /// Every stored session keyed by session id.
    ///
    /// Reports what is stored, like [`length`](Self::length): a session whose
    /// expiry has passed is included until it is reaped, even though
    /// [`get`](Self::get) already treats it as absent. Fails if any record
    /// cannot be decoded.
    pub async fn all(&self) -> Result<HashMap<String, S>> {
        self.ready().await?;
        let inner = &self.inner;

        let items = inner
            .client
            .scan_all(&inner.config.table_name, self.prefixed_scan(None))
            .await?;

        let mut sessions = HashMap::with_capacity(items.len());
        for item in &items {
            let record = SessionRecord::from_item(&inner.config.hash_key, item)?;
            let Some(id) = self.session_id(&record.key) else {
                continue;
            };
            sessions.insert(id.to_string(), record.decode()?);
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::record::{ATTR_EXPIRE_AT_MILLIS, ATTR_EXPIRE_AT_SECONDS};
    use tessera_table::{AttributeValue, Item, Operation, StorageError};

    fn store(table: &MemoryTable) -> SessionStore {
        SessionStore::new(Arc::new(table.clone()), StoreConfig::default()).unwrap()
    }

    fn seeded() -> MemoryTable {
        let table = MemoryTable::new();
        table.seed_table("sessions", "sessionId");
        table
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = SessionStore::<Session>::in_memory(StoreConfig::new().with_table_name(""));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let table = seeded();
        let store = store(&table);

        let mut session = Session::new();
        session.insert("user", "alice").insert("cookie", "chocolate");
        store.set("abc", &session).await.unwrap();

        assert_eq!(store.get("abc").await.unwrap(), Some(session));
        assert!(table.raw_item("sessions", "sess:abc").is_some());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = store(&seeded());
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_corrupt_payload_errors() {
        let table = seeded();
        let store = store(&table);
        store.ready().await.unwrap();

        let mut item = Item::new();
        item.insert("sessionId".into(), AttributeValue::S("sess:bad".into()));
        item.insert("payload".into(), AttributeValue::S("[1,2".into()));
        table.put_item("sessions", item).await.unwrap();

        assert!(matches!(
            store.get("bad").await,
            Err(Error::CorruptRecord { .. })
        ));
        assert!(matches!(store.all().await, Err(Error::CorruptRecord { .. })));
    }

    #[tokio::test]
    async fn test_destroy() {
        let store = store(&seeded());

        assert!(matches!(
            store.destroy("abc").await,
            Err(Error::NotFound(id)) if id == "abc"
        ));

        store.set("abc", &Session::new()).await.unwrap();
        store.destroy("abc").await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_touch_switches_expiry_both_ways() {
        let table = seeded();
        let store = store(&table);
        let now = chrono::Utc::now();

        store.set("abc", &Session::new()).await.unwrap();
        let mut session = Session::with_max_age(now, chrono::TimeDelta::minutes(30));
        store.touch("abc", &session).await.unwrap();

        let item = table.raw_item("sessions", "sess:abc").unwrap();
        let millis = item.get(ATTR_EXPIRE_AT_MILLIS).and_then(AttributeValue::as_n);
        let seconds = item.get(ATTR_EXPIRE_AT_SECONDS).and_then(AttributeValue::as_n);
        let expected = session.cookie.expires.unwrap().timestamp_millis();
        assert_eq!(millis, Some(expected));
        assert_eq!(seconds, Some(expected.div_euclid(1000)));
        assert_eq!(
            item.get("sessionId"),
            Some(&AttributeValue::S("sess:abc".into()))
        );

        session.clear_expiry();
        store.touch("abc", &session).await.unwrap();
        let item = table.raw_item("sessions", "sess:abc").unwrap();
        assert_eq!(item.get(ATTR_EXPIRE_AT_MILLIS), Some(&AttributeValue::Null));
        assert_eq!(item.get(ATTR_EXPIRE_AT_SECONDS), Some(&AttributeValue::Null));
        assert_eq!(store.get("abc").await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_length_and_all() {
        let table = seeded();
        let store = store(&table);
        assert_eq!(store.length().await.unwrap(), 0);

        for id in ["a", "b", "c"] {
            let mut session = Session::new();
            session.insert("id", id);
            store.set(id, &session).await.unwrap();
        }

        // Foreign keys sharing the table are ignored.
        let mut foreign = Item::new();
        foreign.insert("sessionId".into(), AttributeValue::S("other:x".into()));
        table.put_item("sessions", foreign).await.unwrap();

        assert_eq!(store.length().await.unwrap(), 3);
        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["b"].get("id"), Some(&serde_json::json!("b")));
    }

    #[tokio::test]
    async fn test_expired_unreaped_session_listed_but_not_returned() {
        let store = store(&seeded());
        let long_ago = chrono::Utc::now() - chrono::TimeDelta::hours(1);

        let stale = Session::with_max_age(long_ago, chrono::TimeDelta::minutes(1));
        store.set("stale", &stale).await.unwrap();
        store.set("fresh", &Session::new()).await.unwrap();

        assert_eq!(store.get("stale").await.unwrap(), None);
        assert_eq!(store.length().await.unwrap(), 2);
        let all = store.all().await.unwrap();
        assert_eq!(all.get("stale"), Some(&stale));
        assert!(all.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let table = seeded();
        let store = store(&table);
        table.fail_next(
            Operation::PutItem,
            StorageError::Throttled("busy".into()),
        );

        assert!(matches!(
            store.set("abc", &Session::new()).await,
            Err(Error::Storage(StorageError::Throttled(_)))
        ));
        // Not retried.
        assert_eq!(table.calls(Operation::PutItem), 1);
    }

    #[tokio::test]
    async fn test_failed_provisioning_blocks_storage() {
        let table = MemoryTable::new();
        table.fail_next(
            Operation::DescribeTable,
            StorageError::AccessDenied("denied".into()),
        );
        let store = store(&table);

        for _ in 0..2 {
            match store.get("abc").await {
                Err(Error::Fatal(e)) => {
                    assert!(matches!(*e, ProvisionError::Describe { .. }))
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert!(store.set("abc", &Session::new()).await.unwrap_err().is_fatal());
        assert!(matches!(store.lifecycle(), Lifecycle::Failed(_)));
        assert_eq!(table.calls(Operation::GetItem), 0);
        assert_eq!(table.calls(Operation::PutItem), 0);
    }
}
