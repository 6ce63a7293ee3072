//! Value types exchanged with a table storage service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maximum number of keys accepted by a single batch delete request.
pub const MAX_BATCH_DELETE: usize = 25;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String value.
    S(String),
    /// Integer value.
    N(i64),
    /// Explicit null.
    Null,
}

impl AttributeValue {
    /// Borrow the string value, if this is a string.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer value, if this is a number.
    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttributeValue::N(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::S(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::N(n)
    }
}

/// A stored row: attribute name to value.
pub type Item = HashMap<String, AttributeValue>;

/// The hash key identifying one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Key attribute name.
    pub attribute: String,
    /// Key value (always a string).
    pub value: String,
}

impl Key {
    /// Create a new key.
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Extract the key from an item, if the item carries a string value for `attribute`.
    pub fn from_item(attribute: &str, item: &Item) -> Option<Self> {
        item.get(attribute)
            .and_then(AttributeValue::as_s)
            .map(|v| Self::new(attribute, v))
    }
}

/// Lifecycle status of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Creating,
    Updating,
    Active,
    Deleting,
    Inaccessible,
    Archiving,
    Archived,
}

impl TableStatus {
    /// Whether the table can never become active from this status.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            TableStatus::Deleting
                | TableStatus::Inaccessible
                | TableStatus::Archiving
                | TableStatus::Archived
        )
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TableStatus::Creating => "CREATING",
            TableStatus::Updating => "UPDATING",
            TableStatus::Active => "ACTIVE",
            TableStatus::Deleting => "DELETING",
            TableStatus::Inaccessible => "INACCESSIBLE",
            TableStatus::Archiving => "ARCHIVING",
            TableStatus::Archived => "ARCHIVED",
        };
        write!(f, "{}", s)
    }
}

/// Metadata returned by `describe_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub status: TableStatus,
    pub hash_key: String,
    pub item_count: usize,
}

/// Schema used to create a table with a single string hash key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub table_name: String,
    /// Name of the string hash key attribute.
    pub hash_key: String,
    /// Provisioned read throughput.
    pub read_capacity: u64,
    /// Provisioned write throughput.
    pub write_capacity: u64,
}

/// Status of the native time-to-live sweep for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TtlStatus {
    Enabling,
    Enabled,
    Disabling,
    Disabled,
}

impl TtlStatus {
    /// Whether the sweep is on or on its way.
    pub fn is_active(&self) -> bool {
        matches!(self, TtlStatus::Enabled | TtlStatus::Enabling)
    }
}

/// Native TTL configuration of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlDescription {
    pub status: TtlStatus,
    /// Attribute holding epoch seconds, when configured.
    pub attribute: Option<String>,
}

/// Server-side filter applied to scanned items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanFilter {
    /// Numeric attribute strictly less than `value`. Items without the
    /// attribute, or with a non-numeric value, never match.
    LessThan { attribute: String, value: i64 },
    /// String attribute starting with `prefix`.
    BeginsWith { attribute: String, prefix: String },
    /// Every filter must match.
    And(Vec<ScanFilter>),
}

impl ScanFilter {
    /// Evaluate the filter against an item.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            ScanFilter::LessThan { attribute, value } => item
                .get(attribute)
                .and_then(AttributeValue::as_n)
                .is_some_and(|n| n < *value),
            ScanFilter::BeginsWith { attribute, prefix } => item
                .get(attribute)
                .and_then(AttributeValue::as_s)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            ScanFilter::And(filters) => filters.iter().all(|f| f.matches(item)),
        }
    }
}

/// One scan request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    /// Optional filter; `None` returns every item.
    pub filter: Option<ScanFilter>,
    /// Continue after this key (from a previous page).
    pub exclusive_start_key: Option<Key>,
}

impl ScanRequest {
    /// Scan with a filter.
    pub fn filtered(filter: ScanFilter) -> Self {
        Self {
            filter: Some(filter),
            exclusive_start_key: None,
        }
    }
}

/// One page of scan results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Present when more pages remain.
    pub last_evaluated_key: Option<Key>,
}

/// Result of a batch delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteOutcome {
    /// Keys the service did not process and that still exist.
    pub unprocessed: Vec<Key>,
}

/// Attribute changes applied by `update_item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeUpdate {
    /// Set the attribute to a value.
    Put(AttributeValue),
    /// Remove the attribute.
    Remove,
}
