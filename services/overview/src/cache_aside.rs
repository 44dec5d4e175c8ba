//! Compute-once, serve-many snapshot caching.
//!
//! A [`SnapshotView`] pairs the query that builds one response payload
//! with the cache key it lives under. [`CacheAside`] runs the pair: the
//! refresh path queries upstream and overwrites the cache, the display
//! path only reads and serves the payload's default when nothing is
//! cached yet. Read traffic never triggers upstream queries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use storage::KvStore;

use crate::error::Result;

/// One cacheable view: what to compute and where it lives.
#[async_trait]
pub trait SnapshotView: Send + Sync + 'static {
    type Output: Serialize + DeserializeOwned + Default + Send + Sync + 'static;

    /// Stable cache key, derived from the view's identity only, never
    /// from request context.
    fn cache_key(&self) -> String;

    /// Build a fresh payload from upstream data.
    async fn query(&self) -> Result<Self::Output>;

    /// TTL for the cached payload. `None` keeps it until overwritten.
    fn ttl(&self) -> Option<Duration> {
        None
    }
}

/// Runs a [`SnapshotView`] against the shared store.
pub struct CacheAside<V: SnapshotView> {
    view: V,
    store: Arc<dyn KvStore>,
}

impl<V: SnapshotView> CacheAside<V> {
    pub fn new(view: V, store: Arc<dyn KvStore>) -> Self {
        Self { view, store }
    }

    /// Compute and overwrite the cached payload. Failures are logged and
    /// leave the previous payload in place.
    pub async fn load(&self) {
        let key = self.view.cache_key();
        let payload = match self.view.query().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Snapshot query failed; keeping previous payload");
                return;
            }
        };
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Snapshot payload failed to serialize");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, bytes, self.view.ttl()).await {
            warn!(key = %key, error = %e, "Snapshot write failed; keeping previous payload");
        }
    }

    /// Read the cached payload. Never computes; a missing, expired, or
    /// unreadable payload serves the default.
    pub async fn display(&self) -> V::Output {
        let key = self.view.cache_key();
        match self.store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached payload failed to parse; serving default");
                    V::Output::default()
                }
            },
            Ok(None) => V::Output::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed; serving default");
                V::Output::default()
            }
        }
    }
}

/// Object-safe face of [`CacheAside`] for the dispatcher, which handles
/// a different payload type per topic.
#[async_trait]
pub trait TopicSource: Send + Sync {
    /// Refresh the cached payload (the topic loop's write path).
    async fn refresh(&self);

    /// Current cached payload as JSON (the read path).
    async fn snapshot(&self) -> Value;
}

#[async_trait]
impl<V: SnapshotView> TopicSource for CacheAside<V> {
    async fn refresh(&self) {
        self.load().await;
    }

    async fn snapshot(&self) -> Value {
        let payload = self.display().await;
        match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Snapshot failed to convert to JSON");
                Value::Null
            }
        }
    }
}
