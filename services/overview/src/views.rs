//! Concrete snapshot views behind each topic.
//!
//! Each view pairs a cache key with the query that rebuilds its payload.
//! The overview views tolerate individual metric failures by filling the
//! affected cell with its zero value, matching the merged aggregation.
//! The feed views instead propagate upstream failure so the cache-aside
//! runner keeps the previous feed rather than overwriting it with an
//! empty list that would look valid.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use codec::keys;
use config::OverviewConfig;
use storage::KvStore;
use types::{
    tps_string, BlockFeedSnapshot, ChainId, ChainMetricSet, ChainOverviewSnapshot, FieldClass,
    MergedOverviewSnapshot, Precision, RateBucket, TopicKey, TxFeedSnapshot, ViewKind,
};

use crate::cache_aside::{CacheAside, SnapshotView, TopicSource};
use crate::error::Result;
use crate::merge::MergeAggregator;
use crate::providers::{Providers, SymbolKind};
use crate::window::SlidingWindowCounter;

fn or_default<T: Default>(chain: &ChainId, metric: &'static str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(chain = %chain, metric, error = %e, "Overview sub-query failed; using default");
            T::default()
        }
    }
}

/// Headline metrics and trailing rate buckets for one chain.
pub struct ChainOverviewView {
    chain: ChainId,
    native_symbol: String,
    providers: Providers,
    window: Arc<SlidingWindowCounter>,
    precision: Precision,
    ttl: Option<Duration>,
}

impl ChainOverviewView {
    pub fn new(
        chain: ChainId,
        native_symbol: String,
        providers: Providers,
        window: Arc<SlidingWindowCounter>,
        precision: Precision,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            chain,
            native_symbol,
            providers,
            window,
            precision,
            ttl,
        }
    }
}

#[async_trait]
impl SnapshotView for ChainOverviewView {
    type Output = ChainOverviewSnapshot;

    fn cache_key(&self) -> String {
        keys::chain_overview(&self.chain)
    }

    async fn query(&self) -> Result<ChainOverviewSnapshot> {
        let chain = &self.chain;
        let indexer = &self.providers.indexer;
        let search = &self.providers.search;
        let retention = self.window.retention();

        let (tx_count, address_count, block_height, reward, token_count, nft_count, quote, buckets) =
            tokio::join!(
                indexer.tx_count(chain),
                indexer.address_count(chain),
                indexer.block_height(chain),
                indexer.block_reward(chain),
                search.symbol_count(chain, SymbolKind::Token),
                search.symbol_count(chain, SymbolKind::Nft),
                self.providers.price.quote(&self.native_symbol),
                self.window.read(chain, retention),
            );

        let quote = or_default(chain, "quote", quote);
        let metrics = ChainMetricSet {
            tx_count: or_default(chain, "tx_count", tx_count),
            address_count: or_default(chain, "address_count", address_count),
            tps: buckets
                .last()
                .map(RateBucket::tps_string)
                .unwrap_or_else(|| tps_string(0)),
            block_height: or_default(chain, "block_height", block_height),
            reward: self
                .precision
                .round(FieldClass::Token, or_default(chain, "block_reward", reward)),
            token_count: or_default(chain, "token_count", token_count),
            nft_count: or_default(chain, "nft_count", nft_count),
            price: self.precision.round(FieldClass::Usd, quote.price),
            price_change_percent: self
                .precision
                .round(FieldClass::Percent, quote.change_percent_24h),
            market_cap: self.precision.round(FieldClass::Usd, quote.market_cap),
        };

        Ok(ChainOverviewSnapshot {
            chain: self.chain.clone(),
            metrics,
            buckets,
        })
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// Overview merged across all configured chains.
pub struct MergedOverviewView {
    aggregator: Arc<MergeAggregator>,
    ttl: Option<Duration>,
}

impl MergedOverviewView {
    pub fn new(aggregator: Arc<MergeAggregator>, ttl: Option<Duration>) -> Self {
        Self { aggregator, ttl }
    }
}

#[async_trait]
impl SnapshotView for MergedOverviewView {
    type Output = MergedOverviewSnapshot;

    fn cache_key(&self) -> String {
        keys::merged_overview()
    }

    async fn query(&self) -> Result<MergedOverviewSnapshot> {
        Ok(self.aggregator.merge().await)
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// Latest blocks for one chain, newest first.
pub struct BlockFeedView {
    chain: ChainId,
    providers: Providers,
    limit: usize,
    ttl: Option<Duration>,
}

impl BlockFeedView {
    pub fn new(chain: ChainId, providers: Providers, limit: usize, ttl: Option<Duration>) -> Self {
        Self {
            chain,
            providers,
            limit,
            ttl,
        }
    }
}

#[async_trait]
impl SnapshotView for BlockFeedView {
    type Output = BlockFeedSnapshot;

    fn cache_key(&self) -> String {
        keys::block_feed(&self.chain)
    }

    async fn query(&self) -> Result<BlockFeedSnapshot> {
        let blocks = self
            .providers
            .indexer
            .latest_blocks(&self.chain, self.limit)
            .await?;
        Ok(BlockFeedSnapshot {
            chain: self.chain.clone(),
            blocks,
        })
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// Latest transactions for one chain, newest first.
pub struct TxFeedView {
    chain: ChainId,
    providers: Providers,
    limit: usize,
    ttl: Option<Duration>,
}

impl TxFeedView {
    pub fn new(chain: ChainId, providers: Providers, limit: usize, ttl: Option<Duration>) -> Self {
        Self {
            chain,
            providers,
            limit,
            ttl,
        }
    }
}

#[async_trait]
impl SnapshotView for TxFeedView {
    type Output = TxFeedSnapshot;

    fn cache_key(&self) -> String {
        keys::tx_feed(&self.chain)
    }

    async fn query(&self) -> Result<TxFeedSnapshot> {
        let txs = self
            .providers
            .indexer
            .latest_transactions(&self.chain, self.limit)
            .await?;
        Ok(TxFeedSnapshot {
            chain: self.chain.clone(),
            txs,
        })
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// Wire every configured topic to its view over the shared store.
pub fn build_sources(
    config: &OverviewConfig,
    providers: &Providers,
    window: &Arc<SlidingWindowCounter>,
    aggregator: Arc<MergeAggregator>,
    store: &Arc<dyn KvStore>,
) -> HashMap<TopicKey, Arc<dyn TopicSource>> {
    let ttl = config.cache.snapshot_ttl();
    let feed_len = config.dispatch.feed_len;
    let mut sources: HashMap<TopicKey, Arc<dyn TopicSource>> = HashMap::new();

    for entry in config.chains.all() {
        let chain = entry.id.clone();
        sources.insert(
            TopicKey::chain(chain.clone(), ViewKind::Overview),
            Arc::new(CacheAside::new(
                ChainOverviewView::new(
                    chain.clone(),
                    entry.native_symbol.clone(),
                    providers.clone(),
                    window.clone(),
                    config.precision,
                    ttl,
                ),
                store.clone(),
            )),
        );
        sources.insert(
            TopicKey::chain(chain.clone(), ViewKind::Blocks),
            Arc::new(CacheAside::new(
                BlockFeedView::new(chain.clone(), providers.clone(), feed_len, ttl),
                store.clone(),
            )),
        );
        sources.insert(
            TopicKey::chain(chain.clone(), ViewKind::Transactions),
            Arc::new(CacheAside::new(
                TxFeedView::new(chain, providers.clone(), feed_len, ttl),
                store.clone(),
            )),
        );
    }

    sources.insert(
        TopicKey::merged(),
        Arc::new(CacheAside::new(
            MergedOverviewView::new(aggregator, ttl),
            store.clone(),
        )),
    );

    sources
}
