//! Subscription topics.
//!
//! A topic pairs a scope (one chain, or the merged multi-chain view) with a
//! view kind. The wire form is `<chain>:<view>` for chain topics and
//! `merged:overview` for the merged overview. Rendering and parsing are
//! inverse operations so that keys derived from a topic are deterministic.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::ChainId;

/// The kinds of live views the backend refreshes and pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewKind {
    /// Latest block feed for one chain.
    Blocks,
    /// Latest transaction feed for one chain.
    Transactions,
    /// Metric overview for one chain.
    Overview,
    /// Metric overview merged across all configured chains.
    MergedOverview,
}

impl ViewKind {
    /// Event name carried in push frames for this view.
    pub fn event_name(&self) -> &'static str {
        match self {
            ViewKind::Blocks => "blocks",
            ViewKind::Transactions => "transactions",
            ViewKind::Overview => "overview",
            ViewKind::MergedOverview => "mergedOverview",
        }
    }

    /// Default refresh cadence for the view's topic loop.
    pub fn default_tick(&self) -> Duration {
        match self {
            ViewKind::Blocks | ViewKind::Transactions => Duration::from_secs(4),
            ViewKind::Overview => Duration::from_secs(10),
            ViewKind::MergedOverview => Duration::from_secs(60),
        }
    }

    /// Segment used in topic strings. The merged overview renders as plain
    /// `overview` because its scope segment already says `merged`.
    fn topic_segment(&self) -> &'static str {
        match self {
            ViewKind::MergedOverview => "overview",
            other => other.event_name(),
        }
    }
}

/// What a topic ranges over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicScope {
    Chain(ChainId),
    Merged,
}

/// Identity of one subscription topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicKey {
    pub scope: TopicScope,
    pub view: ViewKind,
}

/// Scope segment reserved for the merged overview topic.
const MERGED_SEGMENT: &str = "merged";

impl TopicKey {
    pub fn chain(chain: ChainId, view: ViewKind) -> Self {
        TopicKey {
            scope: TopicScope::Chain(chain),
            view,
        }
    }

    /// The single merged overview topic.
    pub fn merged() -> Self {
        TopicKey {
            scope: TopicScope::Merged,
            view: ViewKind::MergedOverview,
        }
    }

    /// Chain this topic ranges over, if it is chain scoped.
    pub fn chain_id(&self) -> Option<&ChainId> {
        match &self.scope {
            TopicScope::Chain(id) => Some(id),
            TopicScope::Merged => None,
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            TopicScope::Chain(chain) => write!(f, "{}:{}", chain, self.view.topic_segment()),
            TopicScope::Merged => write!(f, "{}:{}", MERGED_SEGMENT, self.view.topic_segment()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTopicError {
    #[error("topic must be of the form <chain>:<view>, got {0:?}")]
    Format(String),
    #[error("unknown view {0:?}")]
    UnknownView(String),
}

impl FromStr for TopicKey {
    type Err = ParseTopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, view) = s
            .split_once(':')
            .ok_or_else(|| ParseTopicError::Format(s.to_string()))?;
        if scope.is_empty() || view.is_empty() {
            return Err(ParseTopicError::Format(s.to_string()));
        }

        if scope == MERGED_SEGMENT {
            return match view {
                "overview" => Ok(TopicKey::merged()),
                other => Err(ParseTopicError::UnknownView(other.to_string())),
            };
        }

        let view = match view {
            "blocks" => ViewKind::Blocks,
            "transactions" => ViewKind::Transactions,
            "overview" => ViewKind::Overview,
            other => return Err(ParseTopicError::UnknownView(other.to_string())),
        };
        Ok(TopicKey::chain(ChainId::new(scope), view))
    }
}
