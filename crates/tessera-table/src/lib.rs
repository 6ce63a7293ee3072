//! Table storage interface for tessera.
//!
//! This crate describes the key-value table service that backs the session
//! store:
//! - [`TableClient`], the request-level interface a backend implements
//! - value types for items, keys, table and TTL metadata, and scans
//! - [`MemoryTable`], an in-process engine with a realistic table lifecycle
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_table::{MemoryTable, TableClient, TableSchema};
//!
//! let table = MemoryTable::new();
//! table.create_table(&schema).await?;
//! ```

mod client;
mod error;
mod memory;
mod types;

pub use client::TableClient;
pub use error::{Result, StorageError};
pub use memory::{DEFAULT_PAGE_SIZE, MemoryTable, Operation};
pub use types::{
    AttributeUpdate, AttributeValue, BatchDeleteOutcome, Item, Key, MAX_BATCH_DELETE, ScanFilter,
    ScanPage, ScanRequest, TableDescription, TableSchema, TableStatus, TtlDescription, TtlStatus,
};
