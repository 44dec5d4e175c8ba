//! Configuration Module
//!
//! Provides configuration loading for the ChainPulse overview service.
//! Supports loading from TOML files with environment-specific overrides
//! and `CHAINPULSE__` environment variables.

pub mod overview_config;

pub use overview_config::{
    load_config, CacheConfig, ChainEntry, ChainsConfig, DispatchConfig, OverviewConfig,
    ProvidersConfig, ServerConfig, WindowConfig,
};
