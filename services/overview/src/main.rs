//! Overview service entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainpulse_overview::providers::{HttpIndexerClient, HttpPriceFeed, HttpSearchStore};
use chainpulse_overview::{
    build_sources, BroadcastDispatcher, MergeAggregator, OverviewServer, Providers,
    SlidingWindowCounter,
};
use config::OverviewConfig;
use storage::{KvStore, MemoryKv};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment override layered on top (config/environments/<env>.toml)
    #[arg(short, long)]
    environment: Option<String>,

    /// Bind address override
    #[arg(long)]
    bind_address: Option<String>,

    /// Port override
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainpulse_overview=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting ChainPulse overview service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(args.config.as_deref(), args.environment.as_deref())?;
    if let Some(bind_address) = args.bind_address {
        config.server.bind_address = bind_address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!(
        chains = config.chains.all().len(),
        bind = %config.server.bind_address,
        port = config.server.port,
        "Configuration loaded"
    );

    run(config).await
}

async fn run(config: OverviewConfig) -> anyhow::Result<()> {
    // Shared store, reloaded from the previous run when persistence is on.
    let memory = match config.cache.persist_path() {
        Some(path) => Arc::new(MemoryKv::with_persistence(path)?),
        None => Arc::new(MemoryKv::new()),
    };
    let store: Arc<dyn KvStore> = memory.clone();

    let http = reqwest::Client::builder()
        .timeout(config.providers.request_timeout())
        .build()?;
    let providers = Providers {
        indexer: Arc::new(HttpIndexerClient::new(
            config.providers.indexer_url.clone(),
            http.clone(),
        )),
        search: Arc::new(HttpSearchStore::new(
            config.providers.search_url.clone(),
            http.clone(),
        )),
        price: Arc::new(HttpPriceFeed::new(config.providers.price_url.clone(), http)),
    };

    let (shutdown, _) = broadcast::channel(1);

    // One advance job per chain keeps its rate window current.
    let window = Arc::new(SlidingWindowCounter::new(
        store.clone(),
        providers.search.clone(),
        providers.indexer.clone(),
        config.window.retention_minutes,
    ));
    let mut advance_jobs = Vec::new();
    for chain in config.chains.ids() {
        advance_jobs.push(window.spawn_advance_job(
            chain,
            config.window.advance_interval(),
            shutdown.subscribe(),
        ));
    }

    let aggregator = Arc::new(MergeAggregator::new(
        &config.chains,
        providers.clone(),
        window.clone(),
        config.precision,
    ));
    let sources = build_sources(&config, &providers, &window, aggregator, &store);
    let dispatcher = BroadcastDispatcher::new(sources, config.dispatch.clone(), shutdown.clone());

    let server = OverviewServer::new(
        config.server.clone(),
        &config.dispatch,
        dispatcher,
        shutdown.clone(),
    );

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Overview server error: {}", e);
                let _ = shutdown.send(());
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutting down overview service");
            let _ = shutdown.send(());
        }
    }

    for job in advance_jobs {
        let _ = job.await;
    }
    memory.force_snapshot()?;
    info!("Overview service stopped");
    Ok(())
}
