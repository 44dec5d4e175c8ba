//! Scriptable in-memory upstreams for tests.
//!
//! One shared state object backs all three provider traits so a test can
//! arrange per-chain metrics, inject persistent failures per scope and
//! operation, and assert how often each operation was called. Histograms
//! are derived from arranged transaction timestamps, one bucket per
//! minute in the requested range with zero counts included.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use types::{BlockSummary, ChainId, RateBucket, TxSummary};

use crate::error::{OverviewError, Result};
use crate::providers::{IndexerClient, PriceFeed, Providers, SearchStore, SymbolKind, TokenQuote};

#[derive(Default)]
struct ChainState {
    tx_times: Vec<u64>,
    tx_count: u64,
    address_count: u64,
    block_height: u64,
    reward: Decimal,
    token_count: u64,
    nft_count: u64,
    latest_block_time: u64,
    blocks: Vec<BlockSummary>,
    txs: Vec<TxSummary>,
}

#[derive(Default)]
struct MockState {
    chains: HashMap<ChainId, ChainState>,
    quotes: HashMap<String, TokenQuote>,
    /// (scope, operation) pairs that fail until healed. The scope is a
    /// chain id for indexer/search operations and a symbol for quotes.
    failing: HashSet<(String, &'static str)>,
    calls: HashMap<&'static str, u64>,
}

/// In-memory stand-in for all three upstream providers.
pub struct MockUpstream {
    state: Mutex<MockState>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
        })
    }

    /// Provider bundle backed by this mock.
    pub fn providers(self: &Arc<Self>) -> Providers {
        Providers {
            indexer: self.clone(),
            search: self.clone(),
            price: self.clone(),
        }
    }

    pub fn set_tx_count(&self, chain: &ChainId, value: u64) {
        self.chain_mut(chain, |state| state.tx_count = value);
    }

    pub fn set_address_count(&self, chain: &ChainId, value: u64) {
        self.chain_mut(chain, |state| state.address_count = value);
    }

    pub fn set_block_height(&self, chain: &ChainId, value: u64) {
        self.chain_mut(chain, |state| state.block_height = value);
    }

    pub fn set_reward(&self, chain: &ChainId, value: Decimal) {
        self.chain_mut(chain, |state| state.reward = value);
    }

    pub fn set_token_count(&self, chain: &ChainId, value: u64) {
        self.chain_mut(chain, |state| state.token_count = value);
    }

    pub fn set_nft_count(&self, chain: &ChainId, value: u64) {
        self.chain_mut(chain, |state| state.nft_count = value);
    }

    pub fn set_latest_block_time(&self, chain: &ChainId, unix_secs: u64) {
        self.chain_mut(chain, |state| state.latest_block_time = unix_secs);
    }

    /// Replace the transaction timestamps the histogram derives from.
    pub fn set_tx_times(&self, chain: &ChainId, times: Vec<u64>) {
        self.chain_mut(chain, |state| state.tx_times = times);
    }

    pub fn add_tx_at(&self, chain: &ChainId, unix_secs: u64) {
        self.chain_mut(chain, |state| state.tx_times.push(unix_secs));
    }

    pub fn set_blocks(&self, chain: &ChainId, blocks: Vec<BlockSummary>) {
        self.chain_mut(chain, |state| state.blocks = blocks);
    }

    pub fn set_transactions(&self, chain: &ChainId, txs: Vec<TxSummary>) {
        self.chain_mut(chain, |state| state.txs = txs);
    }

    pub fn set_quote(&self, symbol: &str, quote: TokenQuote) {
        self.state.lock().quotes.insert(symbol.to_string(), quote);
    }

    /// Make `op` fail for `scope` until healed.
    pub fn fail(&self, scope: &str, op: &'static str) {
        self.state.lock().failing.insert((scope.to_string(), op));
    }

    pub fn heal(&self, scope: &str, op: &'static str) {
        self.state.lock().failing.remove(&(scope.to_string(), op));
    }

    /// How many times `op` has been called across all scopes.
    pub fn calls(&self, op: &'static str) -> u64 {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    fn chain_mut(&self, chain: &ChainId, update: impl FnOnce(&mut ChainState)) {
        let mut state = self.state.lock();
        update(state.chains.entry(chain.clone()).or_default());
    }

    fn check(&self, scope: &str, op: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if state.failing.contains(&(scope.to_string(), op)) {
            return Err(OverviewError::upstream(
                "mock",
                format!("scripted {op} failure for {scope}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexerClient for MockUpstream {
    async fn latest_block_time(&self, chain: &ChainId) -> Result<u64> {
        self.check(chain.as_str(), "latest_block_time")?;
        let state = self.state.lock();
        Ok(state
            .chains
            .get(chain)
            .map(|c| c.latest_block_time)
            .unwrap_or(0))
    }

    async fn block_height(&self, chain: &ChainId) -> Result<u64> {
        self.check(chain.as_str(), "block_height")?;
        let state = self.state.lock();
        Ok(state.chains.get(chain).map(|c| c.block_height).unwrap_or(0))
    }

    async fn tx_count(&self, chain: &ChainId) -> Result<u64> {
        self.check(chain.as_str(), "tx_count")?;
        let state = self.state.lock();
        Ok(state.chains.get(chain).map(|c| c.tx_count).unwrap_or(0))
    }

    async fn address_count(&self, chain: &ChainId) -> Result<u64> {
        self.check(chain.as_str(), "address_count")?;
        let state = self.state.lock();
        Ok(state
            .chains
            .get(chain)
            .map(|c| c.address_count)
            .unwrap_or(0))
    }

    async fn block_reward(&self, chain: &ChainId) -> Result<Decimal> {
        self.check(chain.as_str(), "block_reward")?;
        let state = self.state.lock();
        Ok(state
            .chains
            .get(chain)
            .map(|c| c.reward)
            .unwrap_or(Decimal::ZERO))
    }

    async fn latest_blocks(&self, chain: &ChainId, limit: usize) -> Result<Vec<BlockSummary>> {
        self.check(chain.as_str(), "latest_blocks")?;
        let state = self.state.lock();
        let mut blocks = state
            .chains
            .get(chain)
            .map(|c| c.blocks.clone())
            .unwrap_or_default();
        blocks.truncate(limit);
        Ok(blocks)
    }

    async fn latest_transactions(&self, chain: &ChainId, limit: usize) -> Result<Vec<TxSummary>> {
        self.check(chain.as_str(), "latest_transactions")?;
        let state = self.state.lock();
        let mut txs = state
            .chains
            .get(chain)
            .map(|c| c.txs.clone())
            .unwrap_or_default();
        txs.truncate(limit);
        Ok(txs)
    }
}

#[async_trait]
impl SearchStore for MockUpstream {
    async fn tx_histogram(&self, chain: &ChainId, from: u64, to: u64) -> Result<Vec<RateBucket>> {
        self.check(chain.as_str(), "tx_histogram")?;
        let state = self.state.lock();
        let times = state
            .chains
            .get(chain)
            .map(|c| c.tx_times.as_slice())
            .unwrap_or(&[]);

        let mut buckets = Vec::new();
        let mut start = RateBucket::window_floor(from);
        while start < to {
            let end = start + RateBucket::WIDTH_SECS;
            let count = times.iter().filter(|t| **t >= start && **t < end).count() as u64;
            buckets.push(RateBucket::new(start, count));
            start = end;
        }
        Ok(buckets)
    }

    async fn symbol_count(&self, chain: &ChainId, kind: SymbolKind) -> Result<u64> {
        self.check(chain.as_str(), "symbol_count")?;
        let state = self.state.lock();
        let chain_state = state.chains.get(chain);
        Ok(match kind {
            SymbolKind::Token => chain_state.map(|c| c.token_count).unwrap_or(0),
            SymbolKind::Nft => chain_state.map(|c| c.nft_count).unwrap_or(0),
        })
    }
}

#[async_trait]
impl PriceFeed for MockUpstream {
    async fn quote(&self, symbol: &str) -> Result<TokenQuote> {
        self.check(symbol, "quote")?;
        let state = self.state.lock();
        Ok(state.quotes.get(symbol).cloned().unwrap_or_default())
    }
}
