//! # ChainPulse Domain Types
//!
//! Shared type definitions for the ChainPulse explorer backend.
//!
//! ## Design Philosophy
//!
//! - **Typed Identifiers**: Chain ids and topic keys are distinct types, never bare strings
//! - **No Precision Loss**: Monetary values are `rust_decimal::Decimal`, never binary floats
//! - **Wire Stability**: Every snapshot type has a structurally valid `Default` so a cold
//!   cache serves zeros instead of errors
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{ChainId, RateBucket, TopicKey, ViewKind};
//!
//! let chain = ChainId::new("AELF");
//! let topic = TopicKey::chain(chain, ViewKind::Overview);
//! assert_eq!(topic.to_string(), "AELF:overview");
//!
//! let bucket = RateBucket::new(600, 3);
//! assert_eq!(bucket.tps_string(), "0.05");
//! ```

pub mod bucket;
pub mod chain;
pub mod overview;
pub mod precision;
pub mod topic;

pub use bucket::{tps_string, RateBucket};
pub use chain::ChainId;
pub use overview::{
    BlockFeedSnapshot, BlockSummary, ChainMetricSet, ChainOverviewSnapshot, MergedMetricSet,
    MergedOverviewSnapshot, TxFeedSnapshot, TxSummary,
};
pub use precision::{share_percent, FieldClass, Precision};
pub use topic::{ParseTopicError, TopicKey, TopicScope, ViewKind};
