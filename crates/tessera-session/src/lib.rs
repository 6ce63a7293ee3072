//! Session store over a remote table with readiness gating and expiry reaping.
//!
//! This crate provides a keyed store of session payloads with:
//! - Background provisioning of the backing table (create, wait, enable TTL)
//! - A readiness gate every operation waits on before touching storage
//! - Expiry stored as both epoch millis and native-TTL epoch seconds
//! - An active reaper for expired sessions the native TTL has not removed yet
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tessera_session::{Session, SessionStore, StoreConfig};
//!
//! let config = StoreConfig::default()
//!     .with_table_name("web-sessions")
//!     .with_reap_interval(Duration::from_secs(600));
//!
//! let store: SessionStore = SessionStore::new(client, config)?;
//! store.set("abc", &Session::with_max_age(now, max_age)).await?;
//! let _reaper = store.spawn_reaper();
//! ```

mod clock;
mod config;
mod error;
mod gate;
mod provision;
mod reaper;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_HASH_KEY, DEFAULT_KEY_PREFIX, DEFAULT_POLL_INTERVAL, DEFAULT_PROVISION_TIMEOUT,
    DEFAULT_TABLE_NAME, StoreConfig,
};
pub use error::{ConfigError, Error, ProvisionError, Result};
pub use gate::{Lifecycle, ReadinessGate};
pub use provision::Provisioner;
pub use reaper::{ReapReport, ReaperHandle};
pub use record::{
    ATTR_EXPIRE_AT_MILLIS, ATTR_EXPIRE_AT_SECONDS, ATTR_PAYLOAD, Cookie, Expiry, Session,
    SessionPayload, SessionRecord,
};
pub use store::SessionStore;
