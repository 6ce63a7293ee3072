//! Session payloads and their stored record shape.
//!
//! A stored record carries the session key, the serialized payload, and the
//! expiry twice: `expireAtMillis` for the application and `expireAtSeconds`
//! for the storage engine's native TTL sweep. Both are present or both are
//! absent, and the seconds value is always the floor of millis / 1000.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_table::{AttributeUpdate, AttributeValue, Item};

use crate::error::{Error, Result};

/// Attribute holding the expiry in epoch milliseconds.
pub const ATTR_EXPIRE_AT_MILLIS: &str = "expireAtMillis";

/// Attribute holding the expiry in epoch seconds (native TTL).
pub const ATTR_EXPIRE_AT_SECONDS: &str = "expireAtSeconds";

/// Attribute holding the serialized session.
pub const ATTR_PAYLOAD: &str = "payload";

/// A value the store can persist.
///
/// The store never looks inside a payload except through [`expires_at`].
///
/// [`expires_at`]: SessionPayload::expires_at
pub trait SessionPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// When the session's cookie expires. `None` means never.
    fn expires_at(&self) -> Option<DateTime<Utc>>;
}

/// Cookie settings carried by a [`Session`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Absolute expiry. `None` for a browser-session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    /// Lifetime in milliseconds the expiry was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_max_age: Option<i64>,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default)]
    pub secure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// A web session: cookie metadata plus arbitrary JSON fields.
///
/// Application fields live under their own `data` object, so any key
/// (including `cookie`) is free for the application to use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub cookie: Cookie,

    /// Application data stored alongside the cookie.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Session {
    /// Create a session without an expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session whose cookie expires `max_age` after `now`.
    pub fn with_max_age(now: DateTime<Utc>, max_age: TimeDelta) -> Self {
        let mut session = Self::new();
        session.set_max_age(now, max_age);
        session
    }

    /// Reset the cookie expiry to `max_age` after `now`.
    pub fn set_max_age(&mut self, now: DateTime<Utc>, max_age: TimeDelta) {
        self.cookie.expires = Some(now + max_age);
        self.cookie.original_max_age = Some(max_age.num_milliseconds());
    }

    /// Drop the expiry, making this a session that never expires.
    pub fn clear_expiry(&mut self) {
        self.cookie.expires = None;
        self.cookie.original_max_age = None;
    }

    /// Set an application field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Read an application field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

impl SessionPayload for Session {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cookie.expires
    }
}

/// Expiry stored in both application and native TTL form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Epoch milliseconds.
    pub millis: i64,
    /// Epoch seconds, `floor(millis / 1000)`.
    pub seconds: i64,
}

impl Expiry {
    /// Derive both forms from epoch milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis,
            seconds: millis.div_euclid(1000),
        }
    }

    /// Derive both forms from an instant.
    pub fn from_instant(at: DateTime<Utc>) -> Self {
        Self::from_millis(at.timestamp_millis())
    }

    /// Whether this expiry is strictly before `now`.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.millis < now.timestamp_millis()
    }
}

/// The stored form of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Storage key (session id with the configured prefix).
    pub key: String,
    /// Expiry, if the session has one.
    pub expiry: Option<Expiry>,
    /// Serialized session.
    pub payload: String,
}

impl SessionRecord {
    /// Serialize a session and compute its expiry.
    pub fn encode<S: SessionPayload>(key: impl Into<String>, session: &S) -> Result<Self> {
        let key = key.into();
        let payload = serde_json::to_string(session).map_err(|e| Error::Encode {
            id: key.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expiry: session.expires_at().map(Expiry::from_instant),
            key,
            payload,
        })
    }

    /// Deserialize the stored payload.
    pub fn decode<S: SessionPayload>(&self) -> Result<S> {
        serde_json::from_str(&self.payload).map_err(|e| Error::CorruptRecord {
            id: self.key.clone(),
            reason: e.to_string(),
        })
    }

    /// Whether the record has an expiry strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|e| e.is_past(now))
    }

    /// Full item for a put request.
    pub fn into_item(self, hash_key: &str) -> Item {
        let mut item = Item::new();
        item.insert(hash_key.to_string(), AttributeValue::S(self.key));
        item.insert(ATTR_PAYLOAD.to_string(), AttributeValue::S(self.payload));
        let (millis, seconds) = match self.expiry {
            Some(e) => (AttributeValue::N(e.millis), AttributeValue::N(e.seconds)),
            None => (AttributeValue::Null, AttributeValue::Null),
        };
        item.insert(ATTR_EXPIRE_AT_MILLIS.to_string(), millis);
        item.insert(ATTR_EXPIRE_AT_SECONDS.to_string(), seconds);
        item
    }

    /// Attribute changes that make an existing item equal to this record.
    ///
    /// Every non-key field is written, so applying these is equivalent to a
    /// full put of the same record.
    pub fn field_updates(&self) -> HashMap<String, AttributeUpdate> {
        let mut updates = HashMap::new();
        updates.insert(
            ATTR_PAYLOAD.to_string(),
            AttributeUpdate::Put(AttributeValue::S(self.payload.clone())),
        );
        let (millis, seconds) = match self.expiry {
            Some(e) => (
                AttributeUpdate::Put(AttributeValue::N(e.millis)),
                AttributeUpdate::Put(AttributeValue::N(e.seconds)),
            ),
            None => (
                AttributeUpdate::Put(AttributeValue::Null),
                AttributeUpdate::Put(AttributeValue::Null),
            ),
        };
        updates.insert(ATTR_EXPIRE_AT_MILLIS.to_string(), millis);
        updates.insert(ATTR_EXPIRE_AT_SECONDS.to_string(), seconds);
        updates
    }

    /// Read a record back from a stored item.
    pub fn from_item(hash_key: &str, item: &Item) -> Result<Self> {
        let key = item
            .get(hash_key)
            .and_then(AttributeValue::as_s)
            .ok_or_else(|| Error::CorruptRecord {
                id: "<unknown>".to_string(),
                reason: format!("missing key attribute {}", hash_key),
            })?
            .to_string();

        let payload = item
            .get(ATTR_PAYLOAD)
            .and_then(AttributeValue::as_s)
            .ok_or_else(|| Error::CorruptRecord {
                id: key.clone(),
                reason: format!("missing {} attribute", ATTR_PAYLOAD),
            })?
            .to_string();

        let expiry = match item.get(ATTR_EXPIRE_AT_MILLIS) {
            None | Some(AttributeValue::Null) => None,
            Some(AttributeValue::N(millis)) => Some(Expiry::from_millis(*millis)),
            Some(AttributeValue::S(_)) => {
                return Err(Error::CorruptRecord {
                    id: key,
                    reason: format!("{} is not a number", ATTR_EXPIRE_AT_MILLIS),
                });
            }
        };

        Ok(Self {
            key,
            expiry,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_expiry_seconds_are_floored() {
        for millis in [0, 999, 1_000, 1_700_000_000_999, 1_700_000_001_000] {
            let expiry = Expiry::from_instant(at(millis));
            assert_eq!(expiry.millis, millis);
            assert_eq!(expiry.seconds, millis / 1000);
        }
        assert_eq!(Expiry::from_millis(-1).seconds, -1);
    }

    #[test]
    fn test_encode_without_expiry() {
        let record = SessionRecord::encode("sess:a", &Session::new()).unwrap();
        assert_eq!(record.expiry, None);

        let item = record.into_item("sessionId");
        assert_eq!(item.get(ATTR_EXPIRE_AT_MILLIS), Some(&AttributeValue::Null));
        assert_eq!(item.get(ATTR_EXPIRE_AT_SECONDS), Some(&AttributeValue::Null));
    }

    #[test]
    fn test_encode_with_expiry() {
        let session = Session::with_max_age(at(1_700_000_000_000), TimeDelta::milliseconds(1_500));
        let record = SessionRecord::encode("sess:a", &session).unwrap();

        assert_eq!(record.expiry, Some(Expiry::from_millis(1_700_000_001_500)));
        let item = record.into_item("sessionId");
        assert_eq!(
            item.get(ATTR_EXPIRE_AT_SECONDS),
            Some(&AttributeValue::N(1_700_000_001))
        );
        assert_eq!(
            item.get("sessionId"),
            Some(&AttributeValue::S("sess:a".into()))
        );
    }

    #[test]
    fn test_item_round_trip_preserves_session() {
        let mut session = Session::with_max_age(at(1_000), TimeDelta::hours(1));
        session.insert("user", "alice").insert("visits", 3);
        session.cookie.http_only = true;

        let item = SessionRecord::encode("sess:a", &session)
            .unwrap()
            .into_item("sessionId");
        let record = SessionRecord::from_item("sessionId", &item).unwrap();
        let decoded: Session = record.decode().unwrap();

        assert_eq!(decoded, session);
    }

    #[test]
    fn test_field_updates_clear_expiry() {
        let record = SessionRecord::encode("sess:a", &Session::new()).unwrap();
        let updates = record.field_updates();

        assert_eq!(
            updates.get(ATTR_EXPIRE_AT_MILLIS),
            Some(&AttributeUpdate::Put(AttributeValue::Null))
        );
        assert!(updates.contains_key(ATTR_PAYLOAD));
        assert!(!updates.contains_key("sessionId"));
    }

    #[test]
    fn test_application_fields_do_not_collide_with_cookie() {
        let mut session = Session::with_max_age(at(1_000), TimeDelta::hours(1));
        session.insert("cookie", "chocolate").insert("data", 7);

        let record = SessionRecord::encode("sess:a", &session).unwrap();
        let decoded: Session = record.decode().unwrap();

        assert_eq!(decoded, session);
        assert_eq!(decoded.get("cookie"), Some(&Value::from("chocolate")));
        assert_eq!(decoded.cookie.expires, session.cookie.expires);
    }

    #[test]
    fn test_decode_garbage_is_corrupt() {
        let record = SessionRecord {
            key: "sess:bad".into(),
            expiry: None,
            payload: "{not json".into(),
        };
        let err = record.decode::<Session>().unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { ref id, .. } if id == "sess:bad"));
    }

    #[test]
    fn test_from_item_missing_payload() {
        let mut item = Item::new();
        item.insert("sessionId".into(), AttributeValue::S("sess:a".into()));
        let err = SessionRecord::from_item("sessionId", &item).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { .. }));
    }
}
