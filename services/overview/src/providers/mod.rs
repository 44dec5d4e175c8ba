//! Upstream data providers.
//!
//! The overview service reads from three upstreams: the block indexer,
//! the search/aggregation store, and the token price feed. Each is a
//! narrow trait so refresh logic can run against the HTTP clients in
//! production and scriptable in-memory fakes in tests.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::{BlockSummary, ChainId, RateBucket, TxSummary};

use crate::error::Result;

pub mod http;
pub mod mock;

pub use http::{HttpIndexerClient, HttpPriceFeed, HttpSearchStore};
pub use mock::MockUpstream;

/// Kinds of symbols tracked by the search store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Token,
    Nft,
}

/// One price feed quote for a token symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenQuote {
    pub price: Decimal,
    pub change_percent_24h: Decimal,
    pub market_cap: Decimal,
}

/// Client for the authoritative block indexer.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Time of the newest indexed block, unix seconds.
    async fn latest_block_time(&self, chain: &ChainId) -> Result<u64>;

    async fn block_height(&self, chain: &ChainId) -> Result<u64>;

    async fn tx_count(&self, chain: &ChainId) -> Result<u64>;

    async fn address_count(&self, chain: &ChainId) -> Result<u64>;

    async fn block_reward(&self, chain: &ChainId) -> Result<Decimal>;

    /// Newest blocks first.
    async fn latest_blocks(&self, chain: &ChainId, limit: usize) -> Result<Vec<BlockSummary>>;

    /// Newest transactions first.
    async fn latest_transactions(&self, chain: &ChainId, limit: usize) -> Result<Vec<TxSummary>>;
}

/// Client for the search/aggregation store.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Per-minute transaction counts covering `[from, to)`.
    ///
    /// Returns one bucket per minute boundary in the range, zero counts
    /// included, oldest first. `from` and `to` must be minute aligned.
    async fn tx_histogram(&self, chain: &ChainId, from: u64, to: u64) -> Result<Vec<RateBucket>>;

    async fn symbol_count(&self, chain: &ChainId, kind: SymbolKind) -> Result<u64>;
}

/// Client for the token price feed.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<TokenQuote>;
}

/// The provider bundle handed to every refresh component.
#[derive(Clone)]
pub struct Providers {
    pub indexer: Arc<dyn IndexerClient>,
    pub search: Arc<dyn SearchStore>,
    pub price: Arc<dyn PriceFeed>,
}
