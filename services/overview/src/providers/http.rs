//! HTTP implementations of the upstream provider traits.
//!
//! Thin JSON-over-HTTP clients. Every method is a single GET; retries and
//! failover belong to the caller, which already treats any upstream error
//! as "serve the previous snapshot".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use types::{BlockSummary, ChainId, RateBucket, TxSummary};

use crate::error::{OverviewError, Result};
use crate::providers::{IndexerClient, PriceFeed, SearchStore, SymbolKind, TokenQuote};

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    provider: &'static str,
    url: &str,
) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| OverviewError::upstream(provider, e))?
        .error_for_status()
        .map_err(|e| OverviewError::upstream(provider, e))?;
    response
        .json::<T>()
        .await
        .map_err(|e| OverviewError::upstream(provider, e))
}

fn unix_secs(time: DateTime<Utc>) -> u64 {
    time.timestamp().max(0) as u64
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct RewardResponse {
    reward: Decimal,
}

#[derive(Debug, Deserialize)]
struct LatestBlockResponse {
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BlockDto {
    height: u64,
    hash: String,
    time: DateTime<Utc>,
    tx_count: u64,
    producer: String,
    reward: Decimal,
}

#[derive(Debug, Deserialize)]
struct BlocksResponse {
    blocks: Vec<BlockDto>,
}

#[derive(Debug, Deserialize)]
struct TxDto {
    tx_id: String,
    block_height: u64,
    time: DateTime<Utc>,
    method: String,
    from: String,
    to: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    transactions: Vec<TxDto>,
}

/// Client for the block indexer HTTP API.
pub struct HttpIndexerClient {
    base: String,
    client: reqwest::Client,
}

impl HttpIndexerClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl IndexerClient for HttpIndexerClient {
    async fn latest_block_time(&self, chain: &ChainId) -> Result<u64> {
        let url = format!("{}/api/chains/{}/blocks/latest", self.base, chain);
        let latest: LatestBlockResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(unix_secs(latest.time))
    }

    async fn block_height(&self, chain: &ChainId) -> Result<u64> {
        let url = format!("{}/api/chains/{}/height", self.base, chain);
        let height: HeightResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(height.height)
    }

    async fn tx_count(&self, chain: &ChainId) -> Result<u64> {
        let url = format!("{}/api/chains/{}/transactions/count", self.base, chain);
        let count: CountResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(count.count)
    }

    async fn address_count(&self, chain: &ChainId) -> Result<u64> {
        let url = format!("{}/api/chains/{}/addresses/count", self.base, chain);
        let count: CountResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(count.count)
    }

    async fn block_reward(&self, chain: &ChainId) -> Result<Decimal> {
        let url = format!("{}/api/chains/{}/reward", self.base, chain);
        let reward: RewardResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(reward.reward)
    }

    async fn latest_blocks(&self, chain: &ChainId, limit: usize) -> Result<Vec<BlockSummary>> {
        let url = format!("{}/api/chains/{}/blocks?limit={}", self.base, chain, limit);
        let response: BlocksResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(response
            .blocks
            .into_iter()
            .map(|block| BlockSummary {
                height: block.height,
                hash: block.hash,
                time: unix_secs(block.time),
                tx_count: block.tx_count,
                producer: block.producer,
                reward: block.reward,
            })
            .collect())
    }

    async fn latest_transactions(&self, chain: &ChainId, limit: usize) -> Result<Vec<TxSummary>> {
        let url = format!(
            "{}/api/chains/{}/transactions?limit={}",
            self.base, chain, limit
        );
        let response: TransactionsResponse = get_json(&self.client, "indexer", &url).await?;
        Ok(response
            .transactions
            .into_iter()
            .map(|tx| TxSummary {
                tx_id: tx.tx_id,
                block_height: tx.block_height,
                time: unix_secs(tx.time),
                method: tx.method,
                from: tx.from,
                to: tx.to,
                status: tx.status,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct HistogramBucketDto {
    start: u64,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct HistogramResponse {
    buckets: Vec<HistogramBucketDto>,
}

/// Client for the search/aggregation store HTTP API.
pub struct HttpSearchStore {
    base: String,
    client: reqwest::Client,
}

impl HttpSearchStore {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl SearchStore for HttpSearchStore {
    async fn tx_histogram(&self, chain: &ChainId, from: u64, to: u64) -> Result<Vec<RateBucket>> {
        let url = format!(
            "{}/api/chains/{}/tx-histogram?from={}&to={}",
            self.base, chain, from, to
        );
        let response: HistogramResponse = get_json(&self.client, "search", &url).await?;
        Ok(response
            .buckets
            .into_iter()
            .map(|bucket| RateBucket::new(bucket.start, bucket.count))
            .collect())
    }

    async fn symbol_count(&self, chain: &ChainId, kind: SymbolKind) -> Result<u64> {
        let kind = match kind {
            SymbolKind::Token => "token",
            SymbolKind::Nft => "nft",
        };
        let url = format!(
            "{}/api/chains/{}/symbols/count?kind={}",
            self.base, chain, kind
        );
        let count: CountResponse = get_json(&self.client, "search", &url).await?;
        Ok(count.count)
    }
}

/// Client for the token price feed HTTP API.
pub struct HttpPriceFeed {
    base: String,
    client: reqwest::Client,
}

impl HttpPriceFeed {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn quote(&self, symbol: &str) -> Result<TokenQuote> {
        let url = format!("{}/api/quotes/{}", self.base, symbol);
        get_json(&self.client, "price", &url).await
    }
}
