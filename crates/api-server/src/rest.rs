//! REST handlers for serving, event recording, campaign management,
//! analytics and operational endpoints.

use adserve_cache::SpendStore;
use adserve_core::error::AdError;
use adserve_core::event_bus::{PersistenceHealth, PersistenceStatus};
use adserve_core::money::Money;
use adserve_core::targeting::Targeting;
use adserve_core::types::{
    Ad, AdEvent, AdType, AnalyticsBucket, Campaign, EventKind, Granularity, RequestContext,
};
use adserve_ledger::{AdRemoval, RefundOutcome};
use adserve_serving::{AdEngine, CampaignReport, RecordOutcome, Selection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header carrying the authenticated owner id on mutation endpoints.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AdEngine>,
    pub spend_store: SpendStore,
    pub health: Arc<PersistenceHealth>,
    pub node_id: String,
    pub start_time: Instant,
    pub serve_timeout: Duration,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn map_error(e: AdError) -> ApiError {
    match e {
        AdError::Validation(msg) => {
            metrics::counter!("api.validation_errors").increment(1);
            api_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        e @ AdError::CampaignNotFound(_) => {
            api_error(StatusCode::NOT_FOUND, "campaign_not_found", e.to_string())
        }
        e @ AdError::Forbidden { .. } => api_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
        e @ AdError::InvalidTransition { .. } => {
            api_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        e @ AdError::PersistenceUnavailable(_) => {
            warn!(error = %e, "Request refused, persistence unavailable");
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "persistence_unavailable",
                e.to_string(),
            )
        }
        e => {
            error!(error = %e, "Request failed");
            metrics::counter!("api.errors").increment(1);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal processing error",
            )
        }
    }
}

fn owner_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            api_error(
                StatusCode::UNAUTHORIZED,
                "missing_owner",
                format!("{OWNER_HEADER} header is required"),
            )
        })
}

fn money(field: &str, amount: f64) -> Result<Money, ApiError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("{field} must be a non-negative number"),
        ));
    }
    Ok(Money::from_f64(amount))
}

// ─── Serving ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ServeResponse {
    pub request_id: String,
    pub served: bool,
    pub selection: Option<Selection>,
}

/// POST /v1/serve: pick an ad, or answer "no ad" when nothing is eligible
/// or the decision misses its deadline.
pub async fn serve_ad(
    State(state): State<AppState>,
    Json(ctx): Json<RequestContext>,
) -> Result<Json<ServeResponse>, ApiError> {
    let request_id = ctx.request_id.clone();
    let engine = state.engine.clone();
    let decision = tokio::task::spawn_blocking(move || engine.serve_ad(&ctx));

    let selection = match tokio::time::timeout(state.serve_timeout, decision).await {
        Ok(Ok(result)) => result.map_err(map_error)?,
        Ok(Err(join_error)) => {
            error!(error = %join_error, request_id = %request_id, "Serve task failed");
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "serve_failed",
                "Internal processing error",
            ));
        }
        Err(_) => {
            metrics::counter!("serve.timeouts").increment(1);
            warn!(request_id = %request_id, "Serve deadline exceeded, answering no ad");
            None
        }
    };

    Ok(Json(ServeResponse {
        request_id,
        served: selection.is_some(),
        selection,
    }))
}

// ─── Events ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub campaign_id: Uuid,
    #[serde(default)]
    pub ad_id: Option<Uuid>,
    #[serde(default)]
    pub viewer_id: Option<String>,
    #[serde(default)]
    pub anonymous_token: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    /// Defaults to receipt time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventRequest {
    fn into_event(self, kind: EventKind) -> AdEvent {
        AdEvent {
            kind,
            campaign_id: self.campaign_id,
            ad_id: self.ad_id,
            viewer_id: self.viewer_id,
            anonymous_token: self.anonymous_token,
            video_id: self.video_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub accepted: bool,
    pub outcome: serde_json::Value,
}

fn record(state: &AppState, event: AdEvent) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let outcome = state.engine.record_event(event).map_err(map_error)?;
    let status = match outcome {
        RecordOutcome::Throttled => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::OK,
    };
    let body = serde_json::to_value(outcome).map_err(|e| map_error(e.into()))?;
    Ok((
        status,
        Json(EventResponse {
            accepted: outcome.accepted(),
            outcome: body,
        }),
    ))
}

/// POST /v1/impressions
pub async fn record_impression(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    record(&state, req.into_event(EventKind::Impression))
}

/// POST /v1/clicks
pub async fn record_click(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    record(&state, req.into_event(EventKind::Click))
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

/// Campaign record pushed by the management collaborator. Amounts are in
/// currency units.
#[derive(Debug, Deserialize)]
pub struct CampaignRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub budget: f64,
    pub cost_per_view: f64,
    pub cost_per_click: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub targeting: Targeting,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub campaign_id: Uuid,
    pub changed: bool,
}

/// POST /v1/campaigns: register or update a campaign. A campaign new to
/// this process starts from its persisted spend total and status; if those
/// cannot be read the campaign is not registered.
pub async fn upsert_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let owner = owner_id(&headers)?;
    let mut campaign = Campaign::draft(
        owner.clone(),
        req.name,
        money("budget", req.budget)?,
        money("cost_per_view", req.cost_per_view)?,
        money("cost_per_click", req.cost_per_click)?,
        req.start,
        req.end,
    )
    .with_targeting(req.targeting);
    if let Some(id) = req.id {
        campaign.id = id;
    }

    match state.engine.get_campaign(campaign.id) {
        Ok(existing) => {
            if existing.owner_id != owner {
                return Err(map_error(AdError::Forbidden {
                    campaign_id: campaign.id,
                    owner_id: owner,
                }));
            }
            let updated = state.engine.upsert_campaign(campaign).map_err(map_error)?;
            Ok((StatusCode::OK, Json(updated)))
        }
        Err(AdError::CampaignNotFound(id)) => {
            let persisted = state.spend_store.load(&[id]).await.map_err(|e| {
                map_error(AdError::PersistenceUnavailable(format!(
                    "{} campaign state lookup failed: {e}",
                    state.spend_store.backend()
                )))
            })?;
            let created = state
                .engine
                .restore_campaign(campaign, persisted.get(&id).copied().unwrap_or_default())
                .map_err(map_error)?;
            metrics::counter!("api.campaigns.registered").increment(1);
            info!(campaign_id = %id, owner_id = %created.owner_id, spent = %created.spent, "Campaign registered");
            Ok((StatusCode::CREATED, Json(created)))
        }
        Err(e) => Err(map_error(e)),
    }
}

/// GET /v1/campaigns
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Campaign>> {
    Json(state.engine.list_campaigns(query.owner_id.as_deref()))
}

/// GET /v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state.engine.get_campaign(id).map(Json).map_err(map_error)
}

/// GET /v1/campaigns/:id/report
pub async fn campaign_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignReport>, ApiError> {
    state.engine.campaign_report(id).map(Json).map_err(map_error)
}

fn transition(
    changed: Result<bool, AdError>,
    campaign_id: Uuid,
) -> Result<Json<TransitionResponse>, ApiError> {
    let changed = changed.map_err(map_error)?;
    Ok(Json(TransitionResponse {
        campaign_id,
        changed,
    }))
}

/// POST /v1/campaigns/:id/publish
pub async fn publish_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let owner = owner_id(&headers)?;
    transition(state.engine.publish_campaign(id, &owner), id)
}

/// POST /v1/campaigns/:id/pause
pub async fn pause_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let owner = owner_id(&headers)?;
    transition(state.engine.pause_campaign(id, &owner), id)
}

/// POST /v1/campaigns/:id/resume
pub async fn resume_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let owner = owner_id(&headers)?;
    transition(state.engine.resume_campaign(id, &owner), id)
}

/// POST /v1/campaigns/:id/cancel
pub async fn cancel_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let owner = owner_id(&headers)?;
    transition(state.engine.cancel_campaign(id, &owner), id)
}

// ─── Ads ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AdRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub ad_type: AdType,
    pub content_ref: String,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub skip_after_secs: Option<u32>,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdRemovalResponse {
    pub ad_id: Uuid,
    pub removal: AdRemoval,
}

/// POST /v1/campaigns/:id/ads
pub async fn add_ad(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<AdRequest>,
) -> Result<(StatusCode, Json<Ad>), ApiError> {
    let owner = owner_id(&headers)?;
    let mut ad = Ad::new(campaign_id, req.ad_type, req.content_ref);
    if let Some(id) = req.id {
        ad.id = id;
    }
    if let Some(duration) = req.duration_secs {
        ad.duration_secs = duration;
    }
    ad.skip_after_secs = req.skip_after_secs;
    ad.position = req.position;
    ad.enabled = req.enabled.unwrap_or(true);

    let ad = state.engine.add_ad(&owner, ad).map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(ad)))
}

/// GET /v1/campaigns/:id/ads
pub async fn list_ads(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Vec<Ad>>, ApiError> {
    state.engine.list_ads(campaign_id).map(Json).map_err(map_error)
}

/// DELETE /v1/campaigns/:id/ads/:ad_id
pub async fn remove_ad(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((campaign_id, ad_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AdRemovalResponse>, ApiError> {
    let owner = owner_id(&headers)?;
    let removal = state
        .engine
        .remove_ad(&owner, campaign_id, ad_id)
        .map_err(map_error)?;
    Ok(Json(AdRemovalResponse { ad_id, removal }))
}

// ─── Refunds ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Currency units.
    pub amount: f64,
}

/// POST /v1/campaigns/:id/refunds: void previously charged spend.
pub async fn refund(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundOutcome>, ApiError> {
    let amount = money("amount", req.amount)?;
    state
        .engine
        .refund(campaign_id, amount)
        .map(Json)
        .map_err(map_error)
}

// ─── Analytics ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub granularity: Option<Granularity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevenueResponse {
    pub owner_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub revenue: Money,
}

/// GET /v1/campaigns/:id/analytics?start=..&end=..&granularity=hour|day
pub async fn get_analytics(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<AnalyticsBucket>>, ApiError> {
    state
        .engine
        .get_analytics(campaign_id, range.start, range.end, range.granularity)
        .map(Json)
        .map_err(map_error)
}

/// GET /v1/owners/:owner_id/revenue?start=..&end=..
pub async fn get_revenue(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<RevenueResponse>, ApiError> {
    let revenue = state
        .engine
        .get_revenue(&owner_id, range.start, range.end)
        .map_err(map_error)?;
    Ok(Json(RevenueResponse {
        owner_id,
        start: range.start,
        end: range.end,
        revenue,
    }))
}

// ─── Operational ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub campaigns: usize,
    pub persistence: PersistenceStatus,
}

/// GET /health: reports "degraded" while write-behind persistence is
/// failing. Serving continues either way.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let persistence = state.health.status();
    Json(HealthResponse {
        status: (if persistence.degraded { "degraded" } else { "healthy" }).to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        campaigns: state.engine.ledger().len(),
        persistence,
    })
}

/// GET /ready: the server is only started after the ledger is rehydrated,
/// so a listening process is ready.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
