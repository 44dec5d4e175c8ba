//! Cache key scheme.
//!
//! One constructor per cached artifact. Keys are derived only from typed
//! identity, never from request context, so the same topic always maps to
//! the same cache entry no matter who asks.

use types::{ChainId, TopicKey, TopicScope, ViewKind};

/// Overview snapshot for one chain.
pub fn chain_overview(chain: &ChainId) -> String {
    format!("overview:chain:{chain}")
}

/// Overview snapshot merged across all configured chains.
pub fn merged_overview() -> String {
    "overview:merged".to_string()
}

/// Latest-blocks feed for one chain.
pub fn block_feed(chain: &ChainId) -> String {
    format!("feed:blocks:{chain}")
}

/// Latest-transactions feed for one chain.
pub fn tx_feed(chain: &ChainId) -> String {
    format!("feed:txs:{chain}")
}

/// Persisted rate bucket list for one chain.
pub fn rate_buckets(chain: &ChainId) -> String {
    format!("rate:buckets:{chain}")
}

/// Cache key backing a topic's snapshot.
pub fn for_topic(topic: &TopicKey) -> String {
    match (&topic.scope, topic.view) {
        (TopicScope::Merged, _) => merged_overview(),
        (TopicScope::Chain(chain), ViewKind::Blocks) => block_feed(chain),
        (TopicScope::Chain(chain), ViewKind::Transactions) => tx_feed(chain),
        (TopicScope::Chain(chain), _) => chain_overview(chain),
    }
}
