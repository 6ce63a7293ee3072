//! Active deletion of expired sessions.
//!
//! The storage engine's native TTL sweep is best-effort and can lag by a
//! long time. The reaper scans for records whose `expireAtMillis` is in the
//! past and deletes them in capped batches.

use std::time::Duration;

use tessera_table::{Key, ScanFilter};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{ATTR_EXPIRE_AT_MILLIS, SessionPayload};
use crate::store::SessionStore;

/// Result of a reap or clear pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Records that matched.
    pub matched: usize,
    /// Records deleted.
    pub deleted: usize,
}

impl<S: SessionPayload> SessionStore<S> {
    /// Delete every session whose expiry is strictly before now.
    ///
    /// Sessions without an expiry are never touched. Deletes are issued in
    /// batches; a failed batch does not stop the others, and any failure is
    /// reported as [`Error::PartialReap`] once every batch has been tried.
    pub async fn reap(&self) -> Result<ReapReport> {
        self.ready().await?;
        let now_ms = self.inner.clock.now().timestamp_millis();

        let expired = ScanFilter::LessThan {
            attribute: ATTR_EXPIRE_AT_MILLIS.to_string(),
            value: now_ms,
        };
        let report = self.delete_matching(Some(expired)).await?;
        if report.matched > 0 {
            info!(
                table = %self.inner.config.table_name,
                deleted = report.deleted,
                "Reaped expired sessions"
            );
        }
        Ok(report)
    }

    /// Delete every session, expired or not.
    pub async fn clear(&self) -> Result<ReapReport> {
        self.ready().await?;
        let report = self.delete_matching(None).await?;
        info!(
            table = %self.inner.config.table_name,
            deleted = report.deleted,
            "Cleared sessions"
        );
        Ok(report)
    }

    async fn delete_matching(&self, filter: Option<ScanFilter>) -> Result<ReapReport> {
        let inner = &self.inner;
        let table = inner.config.table_name.as_str();
        let hash_key = inner.config.hash_key.as_str();

        let keys: Vec<Key> = inner
            .client
            .scan_all(table, self.prefixed_scan(filter))
            .await?
            .iter()
            .filter_map(|item| Key::from_item(hash_key, item))
            .collect();

        let mut report = ReapReport {
            matched: keys.len(),
            deleted: 0,
        };
        if keys.is_empty() {
            debug!(table = %table, "Nothing to delete");
            return Ok(report);
        }

        let mut failed_keys = Vec::new();
        for batch in keys.chunks(inner.config.effective_batch_size()) {
            match inner.client.batch_delete(table, batch).await {
                Ok(outcome) => {
                    report.deleted += batch.len().saturating_sub(outcome.unprocessed.len());
                    failed_keys.extend(outcome.unprocessed.into_iter().map(|k| k.value));
                }
                Err(e) => {
                    warn!(
                        table = %table,
                        batch_size = batch.len(),
                        error = %e,
                        "Batch delete failed"
                    );
                    failed_keys.extend(batch.iter().map(|k| k.value.clone()));
                }
            }
        }

        if failed_keys.is_empty() {
            return Ok(report);
        }
        let failed_keys = failed_keys
            .into_iter()
            .map(|k| self.session_id(&k).map(str::to_string).unwrap_or(k))
            .collect();
        Err(Error::PartialReap {
            deleted: report.deleted,
            failed_keys,
        })
    }

    /// Run [`reap`](Self::reap) on the configured interval.
    ///
    /// Returns `None` when no reap interval is configured. The task stops
    /// when the returned handle is dropped or shut down.
    pub fn spawn_reaper(&self) -> Option<ReaperHandle> {
        let period = self.inner.config.reap_interval()?;
        Some(self.spawn_reaper_every(period))
    }

    /// Run [`reap`](Self::reap) every `period`, first tick one period from now.
    pub fn spawn_reaper_every(&self, period: Duration) -> ReaperHandle {
        let period = period.max(Duration::from_millis(1));
        let store = self.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.reap().await {
                    Ok(report) => debug!(?report, "Reaper tick"),
                    Err(e) if e.is_fatal() => {
                        warn!(error = %e, "Session store unusable, stopping reaper");
                        return;
                    }
                    Err(e) => warn!(error = %e, "Reaper tick failed"),
                }
            }
        });
        ReaperHandle {
            handle: Some(handle),
        }
    }
}

/// Handle to a background reaper. Aborts the task on drop.
#[derive(Debug)]
pub struct ReaperHandle {
    handle: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, TimeDelta, Utc};
    use tessera_table::{Key, MemoryTable, Operation, StorageError};

    use crate::clock::{Clock, ManualClock};
    use crate::config::StoreConfig;
    use crate::record::Session;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn store_with(table: &MemoryTable, config: StoreConfig) -> (SessionStore, ManualClock) {
        table.seed_table("sessions", "sessionId");
        let clock = ManualClock::new(start());
        let store =
            SessionStore::with_clock(Arc::new(table.clone()), config, Arc::new(clock.clone()))
                .unwrap();
        (store, clock)
    }

    #[tokio::test]
    async fn test_reap_only_past_expiries() {
        let table = MemoryTable::new();
        let (store, clock) = store_with(&table, StoreConfig::default());

        let now = clock.now();
        store
            .set("past", &Session::with_max_age(now, TimeDelta::seconds(1)))
            .await
            .unwrap();
        store
            .set("future", &Session::with_max_age(now, TimeDelta::hours(1)))
            .await
            .unwrap();
        store.set("forever", &Session::new()).await.unwrap();

        clock.advance(TimeDelta::seconds(2));
        let report = store.reap().await.unwrap();
        assert_eq!(
            report,
            ReapReport {
                matched: 1,
                deleted: 1
            }
        );
        assert!(table.raw_item("sessions", "sess:past").is_none());
        assert!(table.raw_item("sessions", "sess:future").is_some());
        assert!(table.raw_item("sessions", "sess:forever").is_some());

        // Idempotent with no new expirations.
        assert_eq!(store.reap().await.unwrap(), ReapReport::default());
        assert_eq!(table.calls(Operation::BatchDelete), 1);
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_strict() {
        let table = MemoryTable::new();
        let (store, clock) = store_with(&table, StoreConfig::default());

        store
            .set("edge", &Session::with_max_age(clock.now(), TimeDelta::zero()))
            .await
            .unwrap();
        assert_eq!(store.reap().await.unwrap().deleted, 0);

        clock.advance(TimeDelta::milliseconds(1));
        assert_eq!(store.reap().await.unwrap().deleted, 1);
    }

    #[tokio::test]
    async fn test_reap_chunks_batches() {
        let table = MemoryTable::new().with_page_size(7);
        let (store, clock) = store_with(&table, StoreConfig::default());

        for i in 0..60 {
            store
                .set(
                    &format!("s{}", i),
                    &Session::with_max_age(clock.now(), TimeDelta::seconds(1)),
                )
                .await
                .unwrap();
        }
        clock.advance(TimeDelta::minutes(1));

        let report = store.reap().await.unwrap();
        assert_eq!(report.deleted, 60);
        assert_eq!(table.calls(Operation::BatchDelete), 3);
        assert_eq!(store.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_reported() {
        let table = MemoryTable::new();
        let (store, clock) =
            store_with(&table, StoreConfig::default().with_reap_batch_size(2));

        for id in ["a", "b", "c", "d", "e"] {
            store
                .set(id, &Session::with_max_age(clock.now(), TimeDelta::seconds(1)))
                .await
                .unwrap();
        }
        clock.advance(TimeDelta::seconds(5));
        table.fail_next(
            Operation::BatchDelete,
            StorageError::Throttled("busy".into()),
        );

        match store.reap().await {
            Err(Error::PartialReap {
                deleted,
                failed_keys,
            }) => {
                assert_eq!(deleted, 3);
                assert_eq!(failed_keys, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(table.calls(Operation::BatchDelete), 3);
        assert_eq!(store.length().await.unwrap(), 2);

        // The survivors go on the next pass.
        assert_eq!(store.reap().await.unwrap().deleted, 2);
    }

    #[tokio::test]
    async fn test_unprocessed_keys_reported() {
        let table = MemoryTable::new();
        let (store, clock) = store_with(&table, StoreConfig::default());

        for id in ["a", "b", "c"] {
            store
                .set(id, &Session::with_max_age(clock.now(), TimeDelta::seconds(1)))
                .await
                .unwrap();
        }
        clock.advance(TimeDelta::seconds(5));
        table.leave_unprocessed(vec![Key::new("sessionId", "sess:b")]);

        match store.reap().await {
            Err(Error::PartialReap {
                deleted,
                failed_keys,
            }) => {
                assert_eq!(deleted, 2);
                assert_eq!(failed_keys, vec!["b".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(table.raw_item("sessions", "sess:b").is_some());
    }

    #[tokio::test]
    async fn test_overreported_unprocessed_keys_do_not_underflow() {
        let table = MemoryTable::new();
        let (store, clock) = store_with(&table, StoreConfig::default());

        store
            .set("a", &Session::with_max_age(clock.now(), TimeDelta::seconds(1)))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(5));
        table.leave_unprocessed(vec![
            Key::new("sessionId", "sess:a"),
            Key::new("sessionId", "sess:ghost"),
        ]);

        match store.reap().await {
            Err(Error::PartialReap {
                deleted,
                failed_keys,
            }) => {
                assert_eq!(deleted, 0);
                assert_eq!(failed_keys, vec!["a".to_string(), "ghost".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let table = MemoryTable::new();
        let (store, clock) = store_with(&table, StoreConfig::default());

        store.set("a", &Session::new()).await.unwrap();
        store
            .set("b", &Session::with_max_age(clock.now(), TimeDelta::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.clear().await.unwrap().deleted, 2);
        assert_eq!(store.length().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_reaper_ticks() {
        let table = MemoryTable::new();
        let (store, clock) = store_with(
            &table,
            StoreConfig::default().with_reap_interval(Duration::from_secs(60)),
        );

        store
            .set("a", &Session::with_max_age(clock.now(), TimeDelta::seconds(1)))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(10));

        let reaper = store.spawn_reaper().expect("interval configured");
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(store.length().await.unwrap(), 0);
        assert!(!reaper.is_finished());
        reaper.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_reaper_without_interval() {
        let store = SessionStore::<Session>::in_memory(StoreConfig::default()).unwrap();
        assert!(store.spawn_reaper().is_none());
    }
}
