//! Overview Service Configuration
//!
//! Loads configuration from a TOML file, optional environment-specific
//! override files, and `CHAINPULSE__` prefixed environment variables.
//! Every section has working defaults so the service boots with no file
//! at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use types::{ChainId, Precision, ViewKind};

const DEFAULT_CONFIG_PATH: &str = "config/overview.toml";

/// Main configuration structure for the overview service.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct OverviewConfig {
    /// Chains the explorer tracks.
    pub chains: ChainsConfig,

    /// Upstream data provider endpoints.
    pub providers: ProvidersConfig,

    /// Sliding rate window sizing.
    pub window: WindowConfig,

    /// Topic refresh loop cadences and delivery settings.
    pub dispatch: DispatchConfig,

    /// HTTP and websocket listener.
    pub server: ServerConfig,

    /// Snapshot cache behavior.
    pub cache: CacheConfig,

    /// Display rounding policy.
    pub precision: Precision,
}

/// One tracked chain.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainEntry {
    pub id: ChainId,
    pub name: String,
    pub native_symbol: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChainsConfig {
    pub main: ChainEntry,
    pub side: Vec<ChainEntry>,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            main: ChainEntry {
                id: ChainId::new("AELF"),
                name: "AELF MainChain".to_string(),
                native_symbol: "ELF".to_string(),
            },
            side: vec![ChainEntry {
                id: ChainId::new("tDVW"),
                name: "AELF SideChain".to_string(),
                native_symbol: "ELF".to_string(),
            }],
        }
    }
}

impl ChainsConfig {
    /// All tracked chains, main chain first.
    pub fn all(&self) -> Vec<&ChainEntry> {
        std::iter::once(&self.main).chain(self.side.iter()).collect()
    }

    /// All tracked chain ids, main chain first.
    pub fn ids(&self) -> Vec<ChainId> {
        self.all().into_iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn is_known(&self, chain: &ChainId) -> bool {
        self.all().iter().any(|entry| &entry.id == chain)
    }

    pub fn entry(&self, chain: &ChainId) -> Option<&ChainEntry> {
        self.all().into_iter().find(|entry| &entry.id == chain)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Block indexer base URL.
    pub indexer_url: String,
    /// Search/aggregation store base URL.
    pub search_url: String,
    /// Token price feed base URL.
    pub price_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            indexer_url: "http://127.0.0.1:8108".to_string(),
            search_url: "http://127.0.0.1:9200".to_string(),
            price_url: "http://127.0.0.1:8200".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    /// How many one-minute buckets each chain retains.
    pub retention_minutes: usize,
    /// How often the window advance job runs per chain.
    pub advance_interval_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            retention_minutes: 180,
            advance_interval_secs: 60,
        }
    }
}

impl WindowConfig {
    pub fn advance_interval(&self) -> Duration {
        Duration::from_secs(self.advance_interval_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub blocks_tick_secs: u64,
    pub transactions_tick_secs: u64,
    pub overview_tick_secs: u64,
    pub merged_tick_secs: u64,
    /// How many entries the latest-blocks and latest-transactions feeds carry.
    pub feed_len: usize,
    /// Stop a topic's refresh loop after this long with no subscribers.
    /// `None` keeps idle loops running forever.
    pub idle_shutdown_secs: Option<u64>,
    pub max_connections: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            blocks_tick_secs: 4,
            transactions_tick_secs: 4,
            overview_tick_secs: 10,
            merged_tick_secs: 60,
            feed_len: 25,
            idle_shutdown_secs: None,
            max_connections: 1000,
        }
    }
}

impl DispatchConfig {
    pub fn tick_for(&self, view: ViewKind) -> Duration {
        let secs = match view {
            ViewKind::Blocks => self.blocks_tick_secs,
            ViewKind::Transactions => self.transactions_tick_secs,
            ViewKind::Overview => self.overview_tick_secs,
            ViewKind::MergedOverview => self.merged_tick_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn idle_shutdown(&self) -> Option<Duration> {
        self.idle_shutdown_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8088,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to cached snapshots. `None` keeps them until overwritten.
    pub snapshot_ttl_secs: Option<u64>,
    /// Where the in-process store mirrors its state. `None` disables
    /// persistence, which also forgets rate windows across restarts.
    pub persist_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: None,
            persist_path: Some("./data/overview_state.json".to_string()),
        }
    }
}

impl CacheConfig {
    pub fn snapshot_ttl(&self) -> Option<Duration> {
        self.snapshot_ttl_secs.map(Duration::from_secs)
    }

    pub fn persist_path(&self) -> Option<PathBuf> {
        self.persist_path.as_ref().map(PathBuf::from)
    }
}

impl OverviewConfig {
    /// Load configuration from files with environment overrides.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        match base_path {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                builder =
                    builder.add_source(File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false));
            }
        }

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));
            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (CHAINPULSE__ prefix)
        builder = builder.add_source(
            Environment::with_prefix("CHAINPULSE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Expand environment variables in endpoint and path values.
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let expanded = shellexpand::env(&self.providers.indexer_url)
            .context("Failed to expand indexer URL")?;
        self.providers.indexer_url = expanded.to_string();

        let expanded =
            shellexpand::env(&self.providers.search_url).context("Failed to expand search URL")?;
        self.providers.search_url = expanded.to_string();

        let expanded =
            shellexpand::env(&self.providers.price_url).context("Failed to expand price URL")?;
        self.providers.price_url = expanded.to_string();

        if let Some(path) = &self.cache.persist_path {
            let expanded = shellexpand::env(path).context("Failed to expand persist path")?;
            self.cache.persist_path = Some(expanded.to_string());
        }

        Ok(())
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.chains.main.id.is_empty() {
            bail!("chains.main.id must not be empty");
        }
        let ids = self.chains.ids();
        for (i, id) in ids.iter().enumerate() {
            if ids.iter().skip(i + 1).any(|other| other == id) {
                bail!("duplicate chain id {:?}", id.as_str());
            }
        }
        if self.window.retention_minutes == 0 {
            bail!("window.retention_minutes must be at least 1");
        }
        if self.dispatch.feed_len == 0 {
            bail!("dispatch.feed_len must be at least 1");
        }
        Ok(())
    }
}

/// Convenience function to load, expand, and validate configuration.
pub fn load_config(base_path: Option<&Path>, environment: Option<&str>) -> Result<OverviewConfig> {
    let mut config = OverviewConfig::load(base_path, environment)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}
