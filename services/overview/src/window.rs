//! Sliding transaction-rate window.
//!
//! Each chain keeps a list of per-minute rate buckets in the shared
//! store, ordered oldest first and capped at the configured retention.
//! The advance job re-derives the freshest bucket (its minute was still
//! in progress when written) plus any minutes completed since, appends
//! the result, and trims the oldest entries. Re-derivation always spans
//! from the surviving tail's minute, so a crash between writes heals on
//! the next advance.
//!
//! Reads never fail: storage trouble is logged and the best-effort
//! result returned, and a cold window triggers exactly one guarded
//! initialize instead of a retry loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use codec::{decode_bucket, encode_bucket, keys};
use storage::KvStore;
use types::{ChainId, RateBucket};

use crate::error::Result;
use crate::providers::{IndexerClient, SearchStore};

pub struct SlidingWindowCounter {
    store: Arc<dyn KvStore>,
    search: Arc<dyn SearchStore>,
    indexer: Arc<dyn IndexerClient>,
    retention: usize,
    /// Chains with an initialize in flight, so concurrent cold reads
    /// trigger one backfill instead of one each.
    initializing: Mutex<HashSet<ChainId>>,
}

impl SlidingWindowCounter {
    pub fn new(
        store: Arc<dyn KvStore>,
        search: Arc<dyn SearchStore>,
        indexer: Arc<dyn IndexerClient>,
        retention_minutes: usize,
    ) -> Self {
        Self {
            store,
            search,
            indexer,
            retention: retention_minutes,
            initializing: Mutex::new(HashSet::new()),
        }
    }

    /// How many buckets each chain retains.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Backfill the trailing window from the authoritative store. Does
    /// nothing when the chain already has persisted buckets.
    pub async fn initialize(&self, chain: &ChainId) -> Result<()> {
        let key = keys::rate_buckets(chain);
        if self.store.list_len(&key).await? > 0 {
            return Ok(());
        }

        let anchor = self.indexer.latest_block_time(chain).await?;
        if anchor == 0 {
            debug!(chain = %chain, "Chain has no blocks yet; nothing to backfill");
            return Ok(());
        }

        let newest_end = RateBucket::window_floor(anchor) + RateBucket::WIDTH_SECS;
        let span = RateBucket::WIDTH_SECS * self.retention as u64;
        let from = newest_end.saturating_sub(span);
        let buckets = self.search.tx_histogram(chain, from, newest_end).await?;

        let encoded: Vec<Vec<u8>> = buckets.iter().map(encode_bucket).collect();
        self.store.list_push_back(&key, encoded).await?;
        self.store.list_trim_to_tail(&key, self.retention).await?;
        info!(chain = %chain, buckets = buckets.len(), "Initialized transaction rate window");
        Ok(())
    }

    /// Refresh the newest bucket and ingest minutes completed since,
    /// including the minute `now` falls in.
    pub async fn advance(&self, chain: &ChainId, now: u64) -> Result<()> {
        let key = keys::rate_buckets(chain);

        // Find a decodable tail to anchor the refresh range, discarding
        // malformed entries on the way.
        let tail = loop {
            let mut newest = self.store.list_tail(&key, 1).await?;
            match newest.pop() {
                None => return self.initialize(chain).await,
                Some(raw) => match decode_bucket(&raw) {
                    Ok(bucket) => break bucket,
                    Err(e) => {
                        warn!(chain = %chain, error = %e, "Discarding malformed tail bucket");
                        self.store.list_pop_back(&key).await?;
                    }
                },
            }
        };

        let to = RateBucket::window_floor(now) + RateBucket::WIDTH_SECS;
        if tail.start >= to {
            debug!(chain = %chain, tail = tail.start, "Tail is ahead of the clock; skipping advance");
            return Ok(());
        }

        let refreshed = self.search.tx_histogram(chain, tail.start, to).await?;
        if refreshed.is_empty() {
            return Ok(());
        }

        // Replace the stale tail, then append the re-derived range.
        self.store.list_pop_back(&key).await?;
        let encoded: Vec<Vec<u8>> = refreshed.iter().map(encode_bucket).collect();
        self.store.list_push_back(&key, encoded).await?;
        self.store.list_trim_to_tail(&key, self.retention).await?;
        debug!(chain = %chain, refreshed = refreshed.len(), "Advanced rate window");
        Ok(())
    }

    /// Last `n` buckets, oldest first.
    pub async fn read(&self, chain: &ChainId, n: usize) -> Vec<RateBucket> {
        match self.try_read(chain, n).await {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!(chain = %chain, error = %e, "Rate window read failed; serving empty");
                Vec::new()
            }
        }
    }

    async fn try_read(&self, chain: &ChainId, n: usize) -> Result<Vec<RateBucket>> {
        let key = keys::rate_buckets(chain);
        let mut raw = self.store.list_tail(&key, n).await?;

        if raw.is_empty() {
            let claimed = self.initializing.lock().insert(chain.clone());
            if !claimed {
                return Ok(Vec::new());
            }
            let outcome = self.initialize(chain).await;
            self.initializing.lock().remove(chain);
            if let Err(e) = outcome {
                warn!(chain = %chain, error = %e, "Window initialize failed; serving empty");
                return Ok(Vec::new());
            }
            raw = self.store.list_tail(&key, n).await?;
        }

        let mut buckets = Vec::with_capacity(raw.len());
        for entry in raw {
            match decode_bucket(&entry) {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => warn!(chain = %chain, error = %e, "Skipping malformed bucket entry"),
            }
        }
        Ok(buckets)
    }

    /// Displayed TPS derived from the newest bucket.
    pub async fn tps(&self, chain: &ChainId) -> String {
        self.read(chain, 1)
            .await
            .last()
            .map(RateBucket::tps_string)
            .unwrap_or_else(|| types::tps_string(0))
    }

    /// Run the periodic advance loop for one chain until shutdown.
    pub fn spawn_advance_job(
        self: &Arc<Self>,
        chain: ChainId,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let window = Arc::clone(self);
        tokio::spawn(async move {
            info!(chain = %chain, interval_secs = every.as_secs(), "Starting rate window advance job");
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = chrono::Utc::now().timestamp().max(0) as u64;
                        if let Err(e) = window.advance(&chain, now).await {
                            warn!(chain = %chain, error = %e, "Rate window advance failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!(chain = %chain, "Rate window advance job shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockUpstream;
    use storage::MemoryKv;

    fn window_with(
        mock: &Arc<MockUpstream>,
        store: Arc<dyn KvStore>,
        retention: usize,
    ) -> Arc<SlidingWindowCounter> {
        let providers = mock.providers();
        Arc::new(SlidingWindowCounter::new(
            store,
            providers.search,
            providers.indexer,
            retention,
        ))
    }

    fn seed_three_minutes(mock: &Arc<MockUpstream>, chain: &ChainId) {
        // 5 events in [600, 660), 8 in [660, 720), 3 in [720, 780).
        let mut times = vec![];
        times.extend((0..5).map(|i| 600 + i));
        times.extend((0..8).map(|i| 660 + i));
        times.extend((0..3).map(|i| 720 + i));
        mock.set_tx_times(chain, times);
        mock.set_latest_block_time(chain, 750);
    }

    #[tokio::test]
    async fn initialize_backfills_trailing_window() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);

        window.initialize(&chain).await.unwrap();

        let buckets = window.read(&chain, 10).await;
        assert_eq!(
            buckets,
            vec![
                RateBucket::new(600, 5),
                RateBucket::new(660, 8),
                RateBucket::new(720, 3),
            ]
        );
        assert_eq!(window.tps(&chain).await, "0.05");
    }

    #[tokio::test]
    async fn initialize_is_a_no_op_when_data_exists() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);

        window.initialize(&chain).await.unwrap();
        window.initialize(&chain).await.unwrap();

        assert_eq!(mock.calls("tx_histogram"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cold_read_triggers_exactly_one_backfill() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);

        let reads = (0..16).map(|_| window.read(&chain, 10));
        futures::future::join_all(reads).await;

        assert_eq!(mock.calls("latest_block_time"), 1);
        assert_eq!(mock.calls("tx_histogram"), 1);
        assert_eq!(window.read(&chain, 10).await.len(), 3);
    }

    #[tokio::test]
    async fn advance_refreshes_tail_and_evicts_oldest() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);
        window.initialize(&chain).await.unwrap();

        // Minute 720 fills up to 7 events and minute 780 starts.
        for i in 0..4 {
            mock.add_tx_at(&chain, 730 + i);
        }
        mock.add_tx_at(&chain, 780);
        mock.add_tx_at(&chain, 790);

        window.advance(&chain, 800).await.unwrap();

        let buckets = window.read(&chain, 10).await;
        assert_eq!(
            buckets,
            vec![
                RateBucket::new(660, 8),
                RateBucket::new(720, 7),
                RateBucket::new(780, 2),
            ]
        );
        assert!(buckets.len() <= 3);
    }

    #[tokio::test]
    async fn long_runs_never_exceed_retention() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);
        window.initialize(&chain).await.unwrap();

        // One event per new minute, advancing well past the retention.
        for i in 0..8 {
            let minute = 780 + i * 60;
            mock.add_tx_at(&chain, minute + 5);
            window.advance(&chain, minute + 30).await.unwrap();
            assert!(window.read(&chain, 10).await.len() <= 3);
        }

        let buckets = window.read(&chain, 10).await;
        assert_eq!(
            buckets,
            vec![
                RateBucket::new(1080, 1),
                RateBucket::new(1140, 1),
                RateBucket::new(1200, 1),
            ]
        );
    }

    #[tokio::test]
    async fn advance_on_cold_window_initializes() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);

        window.advance(&chain, 800).await.unwrap();

        assert_eq!(window.read(&chain, 10).await.len(), 3);
    }

    #[tokio::test]
    async fn advance_discards_malformed_tail() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        seed_three_minutes(&mock, &chain);
        let store = Arc::new(MemoryKv::new());
        let window = window_with(&mock, store.clone(), 3);
        window.initialize(&chain).await.unwrap();

        let key = keys::rate_buckets(&chain);
        store
            .list_push_back(&key, vec![b"garbage".to_vec()])
            .await
            .unwrap();

        window.advance(&chain, 750).await.unwrap();

        let buckets = window.read(&chain, 10).await;
        assert_eq!(
            buckets,
            vec![
                RateBucket::new(600, 5),
                RateBucket::new(660, 8),
                RateBucket::new(720, 3),
            ]
        );
    }

    #[tokio::test]
    async fn read_skips_malformed_middle_entries() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("AELF");
        let store = Arc::new(MemoryKv::new());
        let window = window_with(&mock, store.clone(), 5);

        let key = keys::rate_buckets(&chain);
        store
            .list_push_back(
                &key,
                vec![b"600_5".to_vec(), b"junk".to_vec(), b"720_3".to_vec()],
            )
            .await
            .unwrap();

        let buckets = window.read(&chain, 10).await;
        assert_eq!(
            buckets,
            vec![RateBucket::new(600, 5), RateBucket::new(720, 3)]
        );
    }

    #[tokio::test]
    async fn chain_without_blocks_reads_empty_and_zero_tps() {
        let mock = MockUpstream::new();
        let chain = ChainId::new("EMPTY");
        let window = window_with(&mock, Arc::new(MemoryKv::new()), 3);

        assert!(window.read(&chain, 10).await.is_empty());
        assert_eq!(window.tps(&chain).await, "0.00");
    }
}
