//! In-process `KvStore` backend with optional disk persistence.
//!
//! State lives in a `DashMap` for concurrent access. When constructed
//! with a persistence path, every mutation rewrites the JSON state file.
//! Entries carrying a TTL are transient and never persisted.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{KvStore, Result, StorageError};

enum Slot {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn bytes(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Entry {
            slot: Slot::Bytes(value),
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn empty_list() -> Self {
        Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        }
    }

    fn expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize)]
enum PersistedSlot {
    Bytes(Vec<u8>),
    List(Vec<Vec<u8>>),
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    slot: PersistedSlot,
}

/// Thread-safe in-memory cache with optional JSON file persistence.
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
    state_file: Option<PathBuf>,
}

impl MemoryKv {
    pub fn new() -> Self {
        MemoryKv {
            entries: DashMap::new(),
            state_file: None,
        }
    }

    /// Create a store mirrored to `state_file`, loading any state a
    /// previous run left behind.
    pub fn with_persistence(state_file: PathBuf) -> Result<Self> {
        if let Some(dir) = state_file.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let store = MemoryKv {
            entries: DashMap::new(),
            state_file: Some(state_file),
        };
        store.load_from_disk()?;
        Ok(store)
    }

    fn load_from_disk(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        if !path.exists() {
            info!("No existing state file found at {:?}", path);
            return Ok(());
        }

        let data = fs::read_to_string(path)?;
        let persisted: Vec<PersistedEntry> = serde_json::from_str(&data)?;
        for entry in persisted {
            let slot = match entry.slot {
                PersistedSlot::Bytes(value) => Slot::Bytes(value),
                PersistedSlot::List(values) => Slot::List(values.into()),
            };
            self.entries.insert(
                entry.key,
                Entry {
                    slot,
                    expires_at: None,
                },
            );
        }

        info!("Loaded {} entries from state file", self.entries.len());
        Ok(())
    }

    fn save_to_disk(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let persisted: Vec<PersistedEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at.is_none())
            .map(|entry| PersistedEntry {
                key: entry.key().clone(),
                slot: match &entry.slot {
                    Slot::Bytes(value) => PersistedSlot::Bytes(value.clone()),
                    Slot::List(values) => PersistedSlot::List(values.iter().cloned().collect()),
                },
            })
            .collect();

        let data = serde_json::to_string_pretty(&persisted)?;
        fs::write(path, data)?;

        debug!("Saved {} entries to state file", persisted.len());
        Ok(())
    }

    /// Force a snapshot to disk (for graceful shutdown).
    pub fn force_snapshot(&self) -> Result<()> {
        self.save_to_disk()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let Some(entry) = self.entries.get(key) else {
                return Ok(None);
            };
            if !entry.expired() {
                return match &entry.slot {
                    Slot::Bytes(value) => Ok(Some(value.clone())),
                    Slot::List(_) => Err(StorageError::WrongKind(key.to_string())),
                };
            }
        }
        // Lazy expiry: only reached when the entry's TTL has passed.
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), Entry::bytes(value, ttl));
        self.save_to_disk()
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.slot {
                Slot::List(values) => Ok(values.len()),
                Slot::Bytes(_) => Err(StorageError::WrongKind(key.to_string())),
            },
        }
    }

    async fn list_push_back(&self, key: &str, entries: Vec<Vec<u8>>) -> Result<()> {
        {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(Entry::empty_list);
            let Slot::List(values) = &mut entry.slot else {
                return Err(StorageError::WrongKind(key.to_string()));
            };
            values.extend(entries);
        }
        self.save_to_disk()
    }

    async fn list_pop_back(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let popped = {
            match self.entries.get_mut(key) {
                None => None,
                Some(mut entry) => match &mut entry.slot {
                    Slot::List(values) => values.pop_back(),
                    Slot::Bytes(_) => return Err(StorageError::WrongKind(key.to_string())),
                },
            }
        };
        if popped.is_some() {
            self.save_to_disk()?;
        }
        Ok(popped)
    }

    async fn list_pop_front(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let popped = {
            match self.entries.get_mut(key) {
                None => None,
                Some(mut entry) => match &mut entry.slot {
                    Slot::List(values) => values.pop_front(),
                    Slot::Bytes(_) => return Err(StorageError::WrongKind(key.to_string())),
                },
            }
        };
        if popped.is_some() {
            self.save_to_disk()?;
        }
        Ok(popped)
    }

    async fn list_tail(&self, key: &str, n: usize) -> Result<Vec<Vec<u8>>> {
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.slot {
                Slot::List(values) => {
                    let skip = values.len().saturating_sub(n);
                    Ok(values.iter().skip(skip).cloned().collect())
                }
                Slot::Bytes(_) => Err(StorageError::WrongKind(key.to_string())),
            },
        }
    }

    async fn list_trim_to_tail(&self, key: &str, max_len: usize) -> Result<()> {
        let trimmed = {
            match self.entries.get_mut(key) {
                None => 0,
                Some(mut entry) => match &mut entry.slot {
                    Slot::List(values) => {
                        let mut trimmed = 0;
                        while values.len() > max_len {
                            values.pop_front();
                            trimmed += 1;
                        }
                        trimmed
                    }
                    Slot::Bytes(_) => return Err(StorageError::WrongKind(key.to_string())),
                },
            }
        };
        if trimmed > 0 {
            self.save_to_disk()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryKv::new();
        store.set("a", b"one".to_vec(), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        store.set("a", b"two".to_vec(), None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn missing_keys_read_as_empty() {
        let store = MemoryKv::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
        assert_eq!(store.list_len("nope").await.unwrap(), 0);
        assert!(store.list_tail("nope", 5).await.unwrap().is_empty());
        assert_eq!(store.list_pop_back("nope").await.unwrap(), None);
        assert_eq!(store.list_pop_front("nope").await.unwrap(), None);
        store.list_trim_to_tail("nope", 3).await.unwrap();
    }

    #[tokio::test]
    async fn values_with_ttl_expire() {
        let store = MemoryKv::new();
        store
            .set("a", b"fleeting".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn values_without_ttl_do_not_expire() {
        let store = MemoryKv::new();
        store.set("a", b"durable".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lists_keep_oldest_first_order() {
        let store = MemoryKv::new();
        store
            .list_push_back("l", vec![b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();
        store.list_push_back("l", vec![b"c".to_vec()]).await.unwrap();

        assert_eq!(store.list_len("l").await.unwrap(), 3);
        assert_eq!(
            store.list_tail("l", 10).await.unwrap(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            store.list_tail("l", 2).await.unwrap(),
            vec![b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[tokio::test]
    async fn pops_take_from_the_right_ends() {
        let store = MemoryKv::new();
        store
            .list_push_back("l", vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();

        assert_eq!(store.list_pop_back("l").await.unwrap(), Some(b"c".to_vec()));
        assert_eq!(store.list_pop_front("l").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.list_len("l").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trim_evicts_oldest_entries() {
        let store = MemoryKv::new();
        let entries: Vec<Vec<u8>> = (0..5).map(|i| vec![i]).collect();
        store.list_push_back("l", entries).await.unwrap();

        store.list_trim_to_tail("l", 2).await.unwrap();
        assert_eq!(
            store.list_tail("l", 10).await.unwrap(),
            vec![vec![3], vec![4]]
        );
    }

    #[tokio::test]
    async fn kind_mismatch_is_an_error() {
        let store = MemoryKv::new();
        store.set("b", b"bytes".to_vec(), None).await.unwrap();
        store.list_push_back("l", vec![b"x".to_vec()]).await.unwrap();

        assert!(matches!(
            store.list_push_back("b", vec![b"x".to_vec()]).await,
            Err(StorageError::WrongKind(_))
        ));
        assert!(matches!(
            store.get("l").await,
            Err(StorageError::WrongKind(_))
        ));
        assert!(matches!(
            store.list_tail("b", 1).await,
            Err(StorageError::WrongKind(_))
        ));
    }

    #[tokio::test]
    async fn state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = MemoryKv::with_persistence(path.clone()).unwrap();
            store
                .list_push_back("buckets", vec![b"600_5".to_vec(), b"660_8".to_vec()])
                .await
                .unwrap();
            store.set("durable", b"v".to_vec(), None).await.unwrap();
            store
                .set("transient", b"t".to_vec(), Some(Duration::from_secs(60)))
                .await
                .unwrap();
        }

        let reborn = MemoryKv::with_persistence(path).unwrap();
        assert_eq!(
            reborn.list_tail("buckets", 10).await.unwrap(),
            vec![b"600_5".to_vec(), b"660_8".to_vec()]
        );
        assert_eq!(reborn.get("durable").await.unwrap(), Some(b"v".to_vec()));
        // TTL-carrying entries are transient and do not survive.
        assert_eq!(reborn.get("transient").await.unwrap(), None);
    }
}
