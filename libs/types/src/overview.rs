//! Overview metric sets and cached snapshot payloads.
//!
//! These are the exact shapes written to the shared cache and pushed to
//! subscribers, so changes here are wire format changes. Every type has a
//! structurally valid `Default`: a reader that hits a cold cache serves
//! zeros, never an error.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bucket::{tps_string, RateBucket};
use crate::chain::ChainId;

/// Headline metrics for a single chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainMetricSet {
    /// Total confirmed transactions.
    pub tx_count: u64,
    /// Total distinct addresses seen.
    pub address_count: u64,
    /// Displayed transactions per second, two decimal places.
    pub tps: String,
    /// Best block height.
    pub block_height: u64,
    /// Current block reward in native tokens.
    pub reward: Decimal,
    /// Fungible token symbols issued on the chain.
    pub token_count: u64,
    /// NFT symbols issued on the chain.
    pub nft_count: u64,
    /// Native token price in USD.
    pub price: Decimal,
    /// 24h native token price change in percent.
    pub price_change_percent: Decimal,
    /// Native token market cap in USD.
    pub market_cap: Decimal,
}

impl Default for ChainMetricSet {
    fn default() -> Self {
        ChainMetricSet {
            tx_count: 0,
            address_count: 0,
            tps: tps_string(0),
            block_height: 0,
            reward: Decimal::ZERO,
            token_count: 0,
            nft_count: 0,
            price: Decimal::ZERO,
            price_change_percent: Decimal::ZERO,
            market_cap: Decimal::ZERO,
        }
    }
}

/// Metrics for every configured chain plus the derived total row.
///
/// `total` is always derived from the parts at merge time and never stored
/// independently. `tx_share_percent` carries each chain's share of the
/// summed transaction count, main chain included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergedMetricSet {
    pub main_chain: ChainMetricSet,
    pub side_chains: BTreeMap<ChainId, ChainMetricSet>,
    pub total: ChainMetricSet,
    pub tx_share_percent: BTreeMap<ChainId, Decimal>,
}

/// Cached overview for a single chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainOverviewSnapshot {
    pub chain: ChainId,
    pub metrics: ChainMetricSet,
    /// Trailing per-minute rate buckets, oldest first.
    pub buckets: Vec<RateBucket>,
}

/// Cached overview merged across all configured chains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergedOverviewSnapshot {
    pub merged: MergedMetricSet,
    /// Per-chain trailing buckets, oldest first within each chain.
    pub buckets_per_chain: BTreeMap<ChainId, Vec<RateBucket>>,
    /// Buckets summed across chains by window start, oldest first.
    pub buckets_total: Vec<RateBucket>,
}

/// One block in the latest-blocks feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    /// Block time, unix seconds.
    pub time: u64,
    pub tx_count: u64,
    pub producer: String,
    pub reward: Decimal,
}

/// One transaction in the latest-transactions feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxSummary {
    pub tx_id: String,
    pub block_height: u64,
    /// Confirmation time, unix seconds.
    pub time: u64,
    pub method: String,
    pub from: String,
    pub to: String,
    pub status: String,
}

/// Cached latest-blocks feed for one chain, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockFeedSnapshot {
    pub chain: ChainId,
    pub blocks: Vec<BlockSummary>,
}

/// Cached latest-transactions feed for one chain, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxFeedSnapshot {
    pub chain: ChainId,
    pub txs: Vec<TxSummary>,
}
