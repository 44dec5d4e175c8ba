//! # ChainPulse Storage
//!
//! The shared cache every overview component reads and writes through.
//! [`KvStore`] is the seam: plain byte values with optional TTL for
//! snapshots, plus ordered byte lists for the persisted rate bucket
//! windows. The in-process [`MemoryKv`] backend keeps everything in a
//! concurrent map and can mirror its state to a JSON file so bucket
//! windows survive a restart.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryKv;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("value at {0:?} has the wrong kind for this operation")]
    WrongKind(String),
    #[error("persistence io: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Key-value cache with byte values and ordered byte lists.
///
/// List entries are kept oldest first: `push_back` appends at the newest
/// end and `trim_to_tail` evicts from the oldest end. Operations on a
/// missing key behave as if the key held an empty value of the right
/// kind; operations on a key holding the other kind fail with
/// [`StorageError::WrongKind`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a byte value. Expired and missing keys both read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a byte value, unconditionally replacing whatever was there.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Append entries at the newest end, preserving their order.
    async fn list_push_back(&self, key: &str, entries: Vec<Vec<u8>>) -> Result<()>;

    /// Remove and return the newest entry.
    async fn list_pop_back(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove and return the oldest entry.
    async fn list_pop_front(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Last `n` entries, oldest first.
    async fn list_tail(&self, key: &str, n: usize) -> Result<Vec<Vec<u8>>>;

    /// Evict oldest entries until at most `max_len` remain.
    async fn list_trim_to_tail(&self, key: &str, max_len: usize) -> Result<()>;
}
