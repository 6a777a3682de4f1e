//! `AdEngine`: the serving facade. Owns the ledger, the dedup window and the
//! analytics rollups, and exposes the operations the API layer calls.

use crate::dedup::DedupWindow;
use crate::eligibility::EligibilityFilter;
use crate::recorder::{EventRecorder, RecordOutcome};
use crate::selector::{AdSelector, Selection};
use adserve_analytics::{AnalyticsAggregator, CampaignTotals};
use adserve_core::config::AppConfig;
use adserve_core::error::{AdError, AdResult};
use adserve_core::event_bus::{DurableRecord, PersistedCampaign, RecordSink};
use adserve_core::money::Money;
use adserve_core::types::{
    Ad, AdEvent, AnalyticsBucket, Campaign, CampaignStatus, EventKind, Granularity,
    RequestContext,
};
use adserve_ledger::{AdRemoval, CampaignLedger, LedgerStatus, PacingController, PacingStatus, RefundOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Budget, pacing and delivery totals for one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    #[serde(flatten)]
    pub status: LedgerStatus,
    pub pacing: PacingStatus,
    pub max_allowed_spend: Money,
    pub totals: CampaignTotals,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub dedup_evicted: usize,
    pub campaigns_completed: Vec<Uuid>,
}

pub struct AdEngine {
    ledger: Arc<CampaignLedger>,
    pacing: PacingController,
    filter: EligibilityFilter,
    selector: AdSelector,
    dedup: Arc<DedupWindow>,
    aggregator: Arc<AnalyticsAggregator>,
    recorder: EventRecorder,
    sink: Arc<dyn RecordSink>,
    default_granularity: Granularity,
    sweep_interval: Duration,
}

impl AdEngine {
    pub fn new(config: &AppConfig, sink: Arc<dyn RecordSink>) -> Self {
        let ledger = Arc::new(CampaignLedger::new());
        let pacing = PacingController::from_config(&config.pacing);
        let dedup = Arc::new(DedupWindow::from_config(&config.dedup));
        let aggregator = Arc::new(AnalyticsAggregator::new(&config.analytics));
        let recorder = EventRecorder::new(
            ledger.clone(),
            dedup.clone(),
            aggregator.clone(),
            sink.clone(),
            &config.recorder,
        );

        info!(
            pace_multiplier = pacing.pace_multiplier(),
            dedup_window_secs = config.dedup.window_secs,
            max_in_flight = config.recorder.max_in_flight,
            "Ad engine initialized"
        );

        Self {
            ledger,
            filter: EligibilityFilter::new(pacing.clone()),
            selector: AdSelector::new(pacing.clone()),
            pacing,
            dedup,
            aggregator,
            recorder,
            sink,
            default_granularity: config.analytics.default_granularity,
            sweep_interval: Duration::from_millis(config.dedup.sweep_interval_ms),
        }
    }

    pub fn ledger(&self) -> &CampaignLedger {
        &self.ledger
    }

    fn emit_status(&self, campaign_id: Uuid, status: CampaignStatus) {
        self.sink.emit(DurableRecord::StatusChange {
            campaign_id,
            status,
            timestamp: Utc::now(),
        });
    }

    fn check_owner(&self, campaign_id: Uuid, owner_id: &str) -> AdResult<Campaign> {
        let campaign = self.ledger.get(campaign_id)?;
        if campaign.owner_id != owner_id {
            return Err(AdError::Forbidden {
                campaign_id,
                owner_id: owner_id.to_string(),
            });
        }
        Ok(campaign)
    }

    // ── Campaign registry ──────────────────────────────────────────────

    pub fn upsert_campaign(&self, campaign: Campaign) -> AdResult<Campaign> {
        self.ledger.upsert_campaign(campaign)
    }

    pub fn get_campaign(&self, campaign_id: Uuid) -> AdResult<Campaign> {
        self.ledger.get(campaign_id)
    }

    pub fn list_campaigns(&self, owner_id: Option<&str>) -> Vec<Campaign> {
        self.ledger.list(owner_id)
    }

    pub fn campaign_ids(&self) -> Vec<Uuid> {
        self.ledger.scan(|c, _| Some(c.id))
    }

    /// Load persisted spend and status into the ledger. Run before serving
    /// resumes; ids the ledger does not know are skipped.
    pub fn rehydrate(&self, persisted: &HashMap<Uuid, PersistedCampaign>) -> usize {
        let mut restored = 0;
        for (campaign_id, state) in persisted {
            match self.ledger.rehydrate(*campaign_id, *state) {
                Ok(campaign) => {
                    debug!(campaign_id = %campaign_id, spent = %campaign.spent, status = ?campaign.status, "Campaign rehydrated");
                    restored += 1;
                }
                Err(e) => warn!(campaign_id = %campaign_id, error = %e, "Skipping persisted campaign state"),
            }
        }
        info!(restored, "Ledger rehydrated from persisted state");
        restored
    }

    /// Register a campaign this process has not seen, seeding its spend and
    /// status from what was persisted. A campaign the ledger already knows is
    /// updated as by `upsert_campaign` and `persisted` is ignored.
    pub fn restore_campaign(&self, mut campaign: Campaign, persisted: PersistedCampaign) -> AdResult<Campaign> {
        if self.ledger.contains(campaign.id) {
            return self.ledger.upsert_campaign(campaign);
        }
        let campaign_id = campaign.id;
        campaign.spent = Money::ZERO;
        self.ledger.upsert_campaign(campaign)?;
        self.ledger.rehydrate(campaign_id, persisted)
    }

    /// Owner-requested transition. `Ok(false)` when the campaign is in a
    /// state that does not allow it.
    fn owner_transition(&self, campaign_id: Uuid, owner_id: &str, to: CampaignStatus) -> AdResult<bool> {
        match self.ledger.transition(campaign_id, to, Some(owner_id)) {
            Ok(_) => {
                self.emit_status(campaign_id, to);
                Ok(true)
            }
            Err(AdError::InvalidTransition { from, to }) => {
                debug!(campaign_id = %campaign_id, from = ?from, to = ?to, "Transition refused");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn publish_campaign(&self, campaign_id: Uuid, owner_id: &str) -> AdResult<bool> {
        self.owner_transition(campaign_id, owner_id, CampaignStatus::Active)
    }

    /// Takes effect for the next serve request. Ads already served may still
    /// record impressions and clicks against the paused campaign.
    pub fn pause_campaign(&self, campaign_id: Uuid, owner_id: &str) -> AdResult<bool> {
        self.owner_transition(campaign_id, owner_id, CampaignStatus::Paused)
    }

    pub fn resume_campaign(&self, campaign_id: Uuid, owner_id: &str) -> AdResult<bool> {
        if self.ledger.get(campaign_id)?.status != CampaignStatus::Paused {
            self.check_owner(campaign_id, owner_id)?;
            return Ok(false);
        }
        self.owner_transition(campaign_id, owner_id, CampaignStatus::Active)
    }

    pub fn cancel_campaign(&self, campaign_id: Uuid, owner_id: &str) -> AdResult<bool> {
        self.owner_transition(campaign_id, owner_id, CampaignStatus::Cancelled)
    }

    pub fn add_ad(&self, owner_id: &str, ad: Ad) -> AdResult<Ad> {
        self.check_owner(ad.campaign_id, owner_id)?;
        self.ledger.add_ad(ad)
    }

    pub fn remove_ad(&self, owner_id: &str, campaign_id: Uuid, ad_id: Uuid) -> AdResult<AdRemoval> {
        self.check_owner(campaign_id, owner_id)?;
        self.ledger.remove_ad(campaign_id, ad_id)
    }

    pub fn list_ads(&self, campaign_id: Uuid) -> AdResult<Vec<Ad>> {
        self.ledger.ads(campaign_id)
    }

    // ── Serving ────────────────────────────────────────────────────────

    pub fn serve_ad(&self, ctx: &RequestContext) -> AdResult<Option<Selection>> {
        self.serve_ad_at(ctx, Utc::now())
    }

    /// Pick an ad for `ctx`. Selection never spends budget; the debit only
    /// happens when the impression is recorded.
    pub fn serve_ad_at(&self, ctx: &RequestContext, now: DateTime<Utc>) -> AdResult<Option<Selection>> {
        ctx.validate()?;
        let start = Instant::now();
        metrics::counter!("serve.requests").increment(1);

        let candidates = self.filter.eligible(&self.ledger, ctx, now);
        let selection = self.selector.select(&candidates, ctx, now);

        metrics::histogram!("serve.latency_us").record(start.elapsed().as_micros() as f64);
        match &selection {
            Some(s) => debug!(
                request_id = %ctx.request_id,
                campaign_id = %s.decision.campaign_id,
                ad_id = %s.decision.ad_id,
                candidates = candidates.len(),
                score = s.score,
                "Ad selected"
            ),
            None => {
                metrics::counter!("serve.no_ad").increment(1);
                debug!(request_id = %ctx.request_id, "No eligible ad");
            }
        }
        Ok(selection)
    }

    // ── Event recording ────────────────────────────────────────────────

    fn event(
        kind: EventKind,
        campaign_id: Uuid,
        viewer_id: Option<&str>,
        video_id: Option<&str>,
    ) -> AdEvent {
        let mut event = AdEvent::new(kind, campaign_id, Utc::now());
        event.viewer_id = viewer_id.map(str::to_string);
        event.video_id = video_id.map(str::to_string);
        event
    }

    pub fn record_impression(
        &self,
        campaign_id: Uuid,
        viewer_id: Option<&str>,
        video_id: Option<&str>,
    ) -> AdResult<RecordOutcome> {
        self.recorder
            .record(Self::event(EventKind::Impression, campaign_id, viewer_id, video_id))
    }

    pub fn record_click(
        &self,
        campaign_id: Uuid,
        viewer_id: Option<&str>,
        video_id: Option<&str>,
    ) -> AdResult<RecordOutcome> {
        self.recorder
            .record(Self::event(EventKind::Click, campaign_id, viewer_id, video_id))
    }

    /// Record a fully-specified event, e.g. one carrying an ad id or an
    /// anonymous session token.
    pub fn record_event(&self, event: AdEvent) -> AdResult<RecordOutcome> {
        self.recorder.record(event)
    }

    pub fn refund(&self, campaign_id: Uuid, amount: Money) -> AdResult<RefundOutcome> {
        self.recorder.refund(campaign_id, amount, Utc::now())
    }

    // ── Reporting ──────────────────────────────────────────────────────

    pub fn campaign_report(&self, campaign_id: Uuid) -> AdResult<CampaignReport> {
        self.campaign_report_at(campaign_id, Utc::now())
    }

    pub fn campaign_report_at(&self, campaign_id: Uuid, now: DateTime<Utc>) -> AdResult<CampaignReport> {
        let campaign = self.ledger.get(campaign_id)?;
        Ok(CampaignReport {
            status: self.ledger.status(campaign_id)?,
            pacing: self.pacing.status(&campaign, now),
            max_allowed_spend: self.pacing.max_allowed_spend(&campaign, now),
            totals: self.aggregator.totals(campaign_id),
        })
    }

    /// Zero-filled bucket series for `[start, end)`.
    pub fn get_analytics(
        &self,
        campaign_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Option<Granularity>,
    ) -> AdResult<Vec<AnalyticsBucket>> {
        if !self.ledger.contains(campaign_id) {
            return Err(AdError::CampaignNotFound(campaign_id));
        }
        self.aggregator.query(
            campaign_id,
            start,
            end,
            granularity.unwrap_or(self.default_granularity),
        )
    }

    /// Net revenue across every campaign `owner_id` owns.
    pub fn get_revenue(&self, owner_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> AdResult<Money> {
        let ids: Vec<Uuid> = self
            .ledger
            .list(Some(owner_id))
            .into_iter()
            .map(|c| c.id)
            .collect();
        self.aggregator.revenue(&ids, start, end)
    }

    // ── Maintenance ────────────────────────────────────────────────────

    /// Complete campaigns past their end date and evict expired dedup keys.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let campaigns_completed = self.ledger.complete_expired(now);
        for campaign_id in &campaigns_completed {
            info!(campaign_id = %campaign_id, "Campaign ended, marked completed");
            self.emit_status(*campaign_id, CampaignStatus::Completed);
        }
        MaintenanceReport {
            dedup_evicted: self.dedup.sweep(now),
            campaigns_completed,
        }
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    /// Run `run_maintenance` on the configured sweep cadence until the
    /// runtime shuts down.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let report = engine.run_maintenance(Utc::now());
                if report.dedup_evicted > 0 || !report.campaigns_completed.is_empty() {
                    debug!(
                        dedup_evicted = report.dedup_evicted,
                        completed = report.campaigns_completed.len(),
                        "Maintenance pass"
                    );
                }
            }
        })
    }
}
