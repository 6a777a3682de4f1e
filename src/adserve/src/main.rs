//! adserve: ad serving and campaign budget/pacing engine.
//!
//! Loads configuration, wires write-behind persistence, rebuilds the ledger
//! from persisted spend and starts the HTTP and metrics servers.

use adserve_analytics::EventWriter;
use adserve_api::ApiServer;
use adserve_cache::{RedisSpendStore, SpendStore};
use adserve_core::config::AppConfig;
use adserve_core::event_bus::{FanoutSink, PersistenceHealth, RecordSink};
use adserve_core::types::Campaign;
use adserve_serving::AdEngine;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "adserve")]
#[command(about = "Ad serving and campaign budget/pacing engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "ADSERVE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "ADSERVE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "ADSERVE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// TOML config file, layered under ADSERVE__ environment variables
    #[arg(long)]
    config: Option<String>,

    /// JSON array of campaigns to register at startup
    #[arg(long)]
    campaigns: Option<String>,

    /// Keep spend totals in memory only (no Redis, no ClickHouse)
    #[arg(long, default_value_t = false)]
    no_persistence: bool,
}

/// Connect the persistence collaborators. Redis is required: without a
/// spend source the ledger cannot be rebuilt, so startup fails. ClickHouse
/// only stores event history and may be absent.
async fn persistence(
    config: &AppConfig,
    health: &Arc<PersistenceHealth>,
    no_persistence: bool,
) -> anyhow::Result<(SpendStore, Arc<dyn RecordSink>)> {
    if no_persistence {
        warn!("Running without persistence, spend totals will not survive a restart");
        let store = SpendStore::local();
        let sink = store.sink();
        return Ok((store, sink));
    }

    let redis = RedisSpendStore::connect(&config.redis, health.clone())
        .await
        .context("Redis connection required for spend persistence")?;
    let store = SpendStore::Redis(Arc::new(redis));

    let mut sinks = vec![store.sink()];
    match EventWriter::new(&config.clickhouse, health.clone()).await {
        Ok(writer) => sinks.push(Arc::new(writer)),
        Err(e) => {
            error!(error = %e, "Failed to connect to ClickHouse, event rows will not be stored");
            health.record_failure(format!("clickhouse: {e}"));
        }
    }

    Ok((store, Arc::new(FanoutSink::new(sinks))))
}

/// Register the campaigns in `path`, each starting from its persisted spend
/// and status.
async fn bootstrap_campaigns(engine: &AdEngine, store: &SpendStore, path: &str) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let campaigns: Vec<Campaign> =
        serde_json::from_str(&raw).with_context(|| format!("parsing campaigns in {path}"))?;

    let ids: Vec<Uuid> = campaigns.iter().map(|c| c.id).collect();
    let persisted = store
        .load(&ids)
        .await
        .context("loading persisted campaign state")?;

    let mut registered = 0;
    for campaign in campaigns {
        let id = campaign.id;
        let state = persisted.get(&id).copied().unwrap_or_default();
        match engine.restore_campaign(campaign, state) {
            Ok(_) => registered += 1,
            Err(e) => warn!(campaign_id = %id, error = %e, "Skipping invalid campaign"),
        }
    }
    Ok(registered)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adserve=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("adserve starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        persistence = !cli.no_persistence,
        "Configuration loaded"
    );

    let health = Arc::new(PersistenceHealth::new());
    let (spend_store, sink) = persistence(&config, &health, cli.no_persistence).await?;

    let engine = Arc::new(AdEngine::new(&config, sink));

    if let Some(path) = cli.campaigns.as_deref() {
        let registered = bootstrap_campaigns(&engine, &spend_store, path).await?;
        info!(registered, backend = spend_store.backend(), "Campaigns restored");
    }

    engine.spawn_maintenance();

    let api_server = ApiServer::new(config, engine, spend_store, health);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("adserve is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
