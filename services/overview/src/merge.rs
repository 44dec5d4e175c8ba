//! Cross-chain metric aggregation.
//!
//! The merged overview fans each metric family out across every
//! configured chain concurrently, joins results by chain id, and derives
//! the total row. A failed sub-query contributes the metric's zero value
//! and logs exactly one warning; the merged snapshot itself never fails,
//! so a fully dark upstream still yields a structurally valid all-zero
//! payload that readers treat as stale data.
//!
//! Count metrics sum into the total. Rate and percentage metrics are
//! recomputed instead: total TPS comes from the summed newest bucket
//! counts, and per-chain transaction shares are `part / whole * 100`
//! with a zero whole yielding zero. Token quote fields are not additive
//! and carry the main chain's values.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future;
use rust_decimal::Decimal;
use tracing::warn;

use config::ChainsConfig;
use types::{
    share_percent, tps_string, ChainId, ChainMetricSet, FieldClass, MergedMetricSet,
    MergedOverviewSnapshot, Precision, RateBucket,
};

use crate::error::Result;
use crate::providers::{Providers, SymbolKind};
use crate::window::SlidingWindowCounter;

/// Counters exposed for observability and assertions in tests.
#[derive(Debug, Default)]
pub struct MergeStats {
    pub merges: AtomicU64,
    pub sub_query_failures: AtomicU64,
}

pub struct MergeAggregator {
    chains: Vec<ChainId>,
    main: ChainId,
    symbols: HashMap<ChainId, String>,
    providers: Providers,
    window: Arc<SlidingWindowCounter>,
    precision: Precision,
    stats: Arc<MergeStats>,
}

impl MergeAggregator {
    pub fn new(
        chains: &ChainsConfig,
        providers: Providers,
        window: Arc<SlidingWindowCounter>,
        precision: Precision,
    ) -> Self {
        let symbols = chains
            .all()
            .into_iter()
            .map(|entry| (entry.id.clone(), entry.native_symbol.clone()))
            .collect();
        Self {
            chains: chains.ids(),
            main: chains.main.id.clone(),
            symbols,
            providers,
            window,
            precision,
            stats: Arc::new(MergeStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MergeStats> {
        self.stats.clone()
    }

    /// Build the merged snapshot across all configured chains.
    pub async fn merge(&self) -> MergedOverviewSnapshot {
        self.stats.merges.fetch_add(1, Ordering::Relaxed);

        let indexer = self.providers.indexer.clone();
        let search = self.providers.search.clone();
        let price = self.providers.price.clone();
        let symbols = self.symbols.clone();
        let window = self.window.clone();
        let bucket_len = self.window.retention();

        let (
            mut tx_counts,
            mut address_counts,
            mut heights,
            mut rewards,
            mut token_counts,
            mut nft_counts,
            mut quotes,
            mut buckets,
        ) = tokio::join!(
            self.fan_out("tx_count", |chain| {
                let indexer = indexer.clone();
                async move { indexer.tx_count(&chain).await }
            }),
            self.fan_out("address_count", |chain| {
                let indexer = indexer.clone();
                async move { indexer.address_count(&chain).await }
            }),
            self.fan_out("block_height", |chain| {
                let indexer = indexer.clone();
                async move { indexer.block_height(&chain).await }
            }),
            self.fan_out("block_reward", |chain| {
                let indexer = indexer.clone();
                async move { indexer.block_reward(&chain).await }
            }),
            self.fan_out("token_count", |chain| {
                let search = search.clone();
                async move { search.symbol_count(&chain, SymbolKind::Token).await }
            }),
            self.fan_out("nft_count", |chain| {
                let search = search.clone();
                async move { search.symbol_count(&chain, SymbolKind::Nft).await }
            }),
            self.fan_out("quote", |chain| {
                let price = price.clone();
                let symbol = symbols.get(&chain).cloned().unwrap_or_default();
                async move { price.quote(&symbol).await }
            }),
            self.fan_out("rate_window", |chain| {
                let window = window.clone();
                async move { Ok(window.read(&chain, bucket_len).await) }
            }),
        );

        let mut per_chain: BTreeMap<ChainId, ChainMetricSet> = BTreeMap::new();
        let mut buckets_per_chain: BTreeMap<ChainId, Vec<RateBucket>> = BTreeMap::new();
        for chain in &self.chains {
            let chain_buckets: Vec<RateBucket> = buckets.remove(chain).unwrap_or_default();
            let quote = quotes.remove(chain).unwrap_or_default();
            let metrics = ChainMetricSet {
                tx_count: tx_counts.remove(chain).unwrap_or_default(),
                address_count: address_counts.remove(chain).unwrap_or_default(),
                tps: chain_buckets
                    .last()
                    .map(RateBucket::tps_string)
                    .unwrap_or_else(|| tps_string(0)),
                block_height: heights.remove(chain).unwrap_or_default(),
                reward: self
                    .precision
                    .round(FieldClass::Token, rewards.remove(chain).unwrap_or_default()),
                token_count: token_counts.remove(chain).unwrap_or_default(),
                nft_count: nft_counts.remove(chain).unwrap_or_default(),
                price: self.precision.round(FieldClass::Usd, quote.price),
                price_change_percent: self
                    .precision
                    .round(FieldClass::Percent, quote.change_percent_24h),
                market_cap: self.precision.round(FieldClass::Usd, quote.market_cap),
            };
            per_chain.insert(chain.clone(), metrics);
            buckets_per_chain.insert(chain.clone(), chain_buckets);
        }

        let total = self.derive_total(&per_chain, &buckets_per_chain);

        let whole = Decimal::from(total.tx_count);
        let tx_share_percent: BTreeMap<ChainId, Decimal> = per_chain
            .iter()
            .map(|(chain, metrics)| {
                let share = share_percent(Decimal::from(metrics.tx_count), whole);
                (chain.clone(), self.precision.round(FieldClass::Percent, share))
            })
            .collect();

        let buckets_total = sum_buckets(buckets_per_chain.values());

        let main_chain = per_chain.remove(&self.main).unwrap_or_default();
        MergedOverviewSnapshot {
            merged: MergedMetricSet {
                main_chain,
                side_chains: per_chain,
                total,
                tx_share_percent,
            },
            buckets_per_chain,
            buckets_total,
        }
    }

    /// Sum the parts into the total row. Percentage fields are not
    /// additive: the 24h change carries the main chain's value.
    fn derive_total(
        &self,
        per_chain: &BTreeMap<ChainId, ChainMetricSet>,
        buckets_per_chain: &BTreeMap<ChainId, Vec<RateBucket>>,
    ) -> ChainMetricSet {
        let mut total = ChainMetricSet::default();
        for metrics in per_chain.values() {
            total.tx_count = total.tx_count.saturating_add(metrics.tx_count);
            total.address_count = total.address_count.saturating_add(metrics.address_count);
            total.block_height = total.block_height.saturating_add(metrics.block_height);
            total.reward += metrics.reward;
            total.token_count = total.token_count.saturating_add(metrics.token_count);
            total.nft_count = total.nft_count.saturating_add(metrics.nft_count);
        }

        let newest_sum: u64 = buckets_per_chain
            .values()
            .filter_map(|buckets| buckets.last())
            .map(|bucket| bucket.count)
            .sum();
        total.tps = tps_string(newest_sum);
        // Quote fields describe one native token and are not additive;
        // the total row carries the main chain's quote.
        if let Some(main) = per_chain.get(&self.main) {
            total.price = main.price;
            total.price_change_percent = main.price_change_percent;
            total.market_cap = main.market_cap;
        }
        total
    }

    async fn fan_out<T, F, Fut>(&self, metric: &'static str, query: F) -> HashMap<ChainId, T>
    where
        T: Default + Send,
        F: Fn(ChainId) -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let mut calls = Vec::with_capacity(self.chains.len());
        for chain in self.chains.iter().cloned() {
            let fut = query(chain.clone());
            calls.push(async move { (chain, fut.await) });
        }

        future::join_all(calls)
            .await
            .into_iter()
            .map(|(chain, result)| match result {
                Ok(value) => (chain, value),
                Err(e) => {
                    self.stats.sub_query_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(chain = %chain, metric, error = %e, "Merge sub-query failed; contributing default");
                    (chain, T::default())
                }
            })
            .collect()
    }
}

/// Sum bucket counts across chains by window start, oldest first.
fn sum_buckets<'a>(
    per_chain: impl Iterator<Item = &'a Vec<RateBucket>>,
) -> Vec<RateBucket> {
    let mut by_start: BTreeMap<u64, u64> = BTreeMap::new();
    for buckets in per_chain {
        for bucket in buckets {
            *by_start.entry(bucket.start).or_insert(0) += bucket.count;
        }
    }
    by_start
        .into_iter()
        .map(|(start, count)| RateBucket::new(start, count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use storage::MemoryKv;

    use crate::providers::{MockUpstream, TokenQuote};

    fn aggregator(mock: &Arc<MockUpstream>) -> MergeAggregator {
        let chains = ChainsConfig::default();
        let providers = mock.providers();
        let window = Arc::new(SlidingWindowCounter::new(
            Arc::new(MemoryKv::new()),
            providers.search.clone(),
            providers.indexer.clone(),
            3,
        ));
        MergeAggregator::new(&chains, providers, window, Precision::default())
    }

    fn main_chain() -> ChainId {
        ChainId::new("AELF")
    }

    fn side_chain() -> ChainId {
        ChainId::new("tDVW")
    }

    fn seed_counts(mock: &Arc<MockUpstream>) {
        mock.set_tx_count(&main_chain(), 1000);
        mock.set_tx_count(&side_chain(), 400);
        mock.set_address_count(&main_chain(), 90);
        mock.set_address_count(&side_chain(), 10);
        mock.set_block_height(&main_chain(), 5000);
        mock.set_block_height(&side_chain(), 4000);
    }

    #[tokio::test]
    async fn totals_sum_across_chains() {
        let mock = MockUpstream::new();
        seed_counts(&mock);
        let merged = aggregator(&mock).merge().await;

        assert_eq!(merged.merged.main_chain.tx_count, 1000);
        assert_eq!(
            merged.merged.side_chains.get(&side_chain()).unwrap().tx_count,
            400
        );
        assert_eq!(merged.merged.total.tx_count, 1400);
        assert_eq!(merged.merged.total.address_count, 100);
        assert_eq!(merged.merged.total.block_height, 9000);
    }

    #[tokio::test]
    async fn shares_are_rounded_percentages_of_the_total() {
        let mock = MockUpstream::new();
        seed_counts(&mock);
        let merged = aggregator(&mock).merge().await;

        let shares = &merged.merged.tx_share_percent;
        assert_eq!(shares.get(&main_chain()).copied().unwrap(), dec!(71.43));
        assert_eq!(shares.get(&side_chain()).copied().unwrap(), dec!(28.57));
    }

    #[tokio::test]
    async fn total_quote_follows_the_main_chain() {
        let mock = MockUpstream::new();
        seed_counts(&mock);
        mock.set_quote(
            "ELF",
            TokenQuote {
                price: dec!(0.43),
                change_percent_24h: dec!(-1.26),
                market_cap: dec!(312000000),
            },
        );

        let merged = aggregator(&mock).merge().await;

        // Both chains quote the same native token; the total row must
        // not double count it.
        assert_eq!(merged.merged.total.price, dec!(0.43));
        assert_eq!(merged.merged.total.price_change_percent, dec!(-1.26));
        assert_eq!(merged.merged.total.market_cap, dec!(312000000));
    }

    #[tokio::test]
    async fn one_failed_sub_query_zeroes_one_cell() {
        let mock = MockUpstream::new();
        seed_counts(&mock);
        mock.fail("tDVW", "tx_count");

        let aggregator = aggregator(&mock);
        let stats = aggregator.stats();
        let merged = aggregator.merge().await;

        assert_eq!(merged.merged.main_chain.tx_count, 1000);
        assert_eq!(
            merged.merged.side_chains.get(&side_chain()).unwrap().tx_count,
            0
        );
        assert_eq!(merged.merged.total.tx_count, 1000);
        assert_eq!(stats.sub_query_failures.load(Ordering::Relaxed), 1);

        let shares = &merged.merged.tx_share_percent;
        assert_eq!(shares.get(&main_chain()).copied().unwrap(), dec!(100));
        assert_eq!(shares.get(&side_chain()).copied().unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn every_sub_query_failing_yields_valid_zeros() {
        let mock = MockUpstream::new();
        for chain in ["AELF", "tDVW"] {
            for op in [
                "tx_count",
                "address_count",
                "block_height",
                "block_reward",
                "symbol_count",
                "latest_block_time",
                "tx_histogram",
            ] {
                mock.fail(chain, op);
            }
        }
        mock.fail("ELF", "quote");

        let aggregator = aggregator(&mock);
        let stats = aggregator.stats();
        let merged = aggregator.merge().await;

        assert_eq!(merged.merged.total.tx_count, 0);
        assert_eq!(merged.merged.total.tps, "0.00");
        assert_eq!(merged.merged.total.price, Decimal::ZERO);
        assert_eq!(
            merged.merged.tx_share_percent.get(&main_chain()).copied().unwrap(),
            Decimal::ZERO
        );
        assert!(merged.buckets_total.is_empty());
        assert!(stats.sub_query_failures.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn monetary_fields_are_rounded_per_class() {
        let mock = MockUpstream::new();
        mock.set_reward(&main_chain(), dec!(0.12505));
        mock.set_quote(
            "ELF",
            TokenQuote {
                price: dec!(0.4251),
                change_percent_24h: dec!(-1.255),
                market_cap: dec!(312000000.129),
            },
        );

        let merged = aggregator(&mock).merge().await;
        let main = &merged.merged.main_chain;
        assert_eq!(main.reward, dec!(0.1251));
        assert_eq!(main.price, dec!(0.43));
        assert_eq!(main.price_change_percent, dec!(-1.26));
        assert_eq!(main.market_cap, dec!(312000000.13));
    }

    #[tokio::test]
    async fn total_tps_is_recomputed_from_summed_buckets() {
        let mock = MockUpstream::new();
        // Both chains share the window [600, 780); newest buckets carry
        // 12 and 6 events.
        mock.set_latest_block_time(&main_chain(), 750);
        mock.set_latest_block_time(&side_chain(), 750);
        mock.set_tx_times(&main_chain(), (0..12).map(|i| 720 + i).collect());
        mock.set_tx_times(&side_chain(), (0..6).map(|i| 720 + i).collect());

        let merged = aggregator(&mock).merge().await;

        assert_eq!(merged.merged.main_chain.tps, "0.20");
        assert_eq!(
            merged.merged.side_chains.get(&side_chain()).unwrap().tps,
            "0.10"
        );
        assert_eq!(merged.merged.total.tps, "0.30");

        let newest = merged.buckets_total.last().unwrap();
        assert_eq!(newest.count, 18);
    }
}
