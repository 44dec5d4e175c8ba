//! ChainPulse Overview Service
//!
//! Aggregates per-chain and merged explorer metrics from upstream
//! providers, keeps crash-recoverable transaction-rate windows, and
//! streams cached snapshots to WebSocket subscribers with one refresh
//! loop per topic.

pub mod cache_aside;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod providers;
pub mod server;
pub mod views;
pub mod window;

pub use cache_aside::{CacheAside, SnapshotView, TopicSource};
pub use dispatch::{BroadcastDispatcher, DispatchStats, PushSender, SubscriberId};
pub use error::{OverviewError, Result};
pub use merge::{MergeAggregator, MergeStats};
pub use providers::{IndexerClient, PriceFeed, Providers, SearchStore};
pub use server::OverviewServer;
pub use views::build_sources;
pub use window::SlidingWindowCounter;
