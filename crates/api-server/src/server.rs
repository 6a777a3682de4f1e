//! API server: the REST router over `AdEngine` plus the Prometheus exporter.

use crate::rest::{self, AppState};
use adserve_cache::SpendStore;
use adserve_core::config::AppConfig;
use adserve_core::event_bus::PersistenceHealth;
use adserve_serving::AdEngine;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the REST router for `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Serving and delivery events
        .route("/v1/serve", post(rest::serve_ad))
        .route("/v1/impressions", post(rest::record_impression))
        .route("/v1/clicks", post(rest::record_click))
        // Campaigns
        .route(
            "/v1/campaigns",
            get(rest::list_campaigns).post(rest::upsert_campaign),
        )
        .route("/v1/campaigns/:id", get(rest::get_campaign))
        .route("/v1/campaigns/:id/report", get(rest::campaign_report))
        .route("/v1/campaigns/:id/publish", post(rest::publish_campaign))
        .route("/v1/campaigns/:id/pause", post(rest::pause_campaign))
        .route("/v1/campaigns/:id/resume", post(rest::resume_campaign))
        .route("/v1/campaigns/:id/cancel", post(rest::cancel_campaign))
        .route(
            "/v1/campaigns/:id/ads",
            get(rest::list_ads).post(rest::add_ad),
        )
        .route("/v1/campaigns/:id/ads/:ad_id", delete(rest::remove_ad))
        .route("/v1/campaigns/:id/refunds", post(rest::refund))
        // Reporting
        .route("/v1/campaigns/:id/analytics", get(rest::get_analytics))
        .route("/v1/owners/:owner_id/revenue", get(rest::get_revenue))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<AdEngine>,
    spend_store: SpendStore,
    health: Arc<PersistenceHealth>,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        engine: Arc<AdEngine>,
        spend_store: SpendStore,
        health: Arc<PersistenceHealth>,
    ) -> Self {
        Self {
            config,
            engine,
            spend_store,
            health,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            spend_store: self.spend_store.clone(),
            health: self.health.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
            serve_timeout: Duration::from_millis(self.config.api.serve_timeout_ms),
        }
    }

    /// Start the HTTP REST server. Runs until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics exporter on its own port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
