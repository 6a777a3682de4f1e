use crate::error::{AdError, AdResult};
use crate::money::Money;
use crate::targeting::Targeting;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Maximum string field length accepted from callers (request id, viewer id, ...).
pub const MAX_FIELD_LEN: usize = 256;

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub budget: Money,
    /// Owned by the ledger; any value supplied by a caller is only used when
    /// rehydrating a campaign that already carries persisted spend.
    #[serde(default)]
    pub spent: Money,
    pub cost_per_view: Money,
    pub cost_per_click: Money,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub targeting: Targeting,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// Whether impressions and clicks may still be charged. Ads served just
    /// before a pause can still finish playing and are billed.
    pub fn is_chargeable(self) -> bool {
        matches!(self, CampaignStatus::Active | CampaignStatus::Paused)
    }
}

impl FromStr for CampaignStatus {
    type Err = AdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(AdError::Validation(format!("unknown campaign status {other:?}"))),
        }
    }
}

impl Campaign {
    pub fn draft(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        budget: Money,
        cost_per_view: Money,
        cost_per_click: Money,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            status: CampaignStatus::Draft,
            budget,
            spent: Money::ZERO,
            cost_per_view,
            cost_per_click,
            start,
            end,
            targeting: Targeting::NoFilter,
            created_at: Utc::now(),
        }
    }

    pub fn with_targeting(mut self, targeting: Targeting) -> Self {
        self.targeting = targeting;
        self
    }

    pub fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }

    pub fn remaining(&self) -> Money {
        self.budget.saturating_sub(self.spent).max(Money::ZERO)
    }

    pub fn is_within_schedule(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }

    pub fn rate_for(&self, kind: EventKind) -> Money {
        match kind {
            EventKind::Impression => self.cost_per_view,
            EventKind::Click => self.cost_per_click,
        }
    }

    /// Re-check the record invariants the CRUD collaborator is expected to
    /// have enforced already.
    pub fn validate(&self) -> AdResult<()> {
        if self.owner_id.is_empty() || self.owner_id.len() > MAX_FIELD_LEN {
            return Err(AdError::Validation(
                "campaign owner_id must be 1..=256 characters".to_string(),
            ));
        }
        if self.budget.is_negative() {
            return Err(AdError::Validation("campaign budget must be >= 0".to_string()));
        }
        if self.cost_per_view.is_negative() || self.cost_per_click.is_negative() {
            return Err(AdError::Validation("campaign rates must be >= 0".to_string()));
        }
        if self.end < self.start {
            return Err(AdError::Validation(
                "campaign end must not precede start".to_string(),
            ));
        }
        if self.spent.is_negative() || self.spent > self.budget {
            return Err(AdError::Validation(format!(
                "campaign spent {} outside [0, budget {}]",
                self.spent, self.budget
            )));
        }
        Ok(())
    }
}

// ─── Ad ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub ad_type: AdType,
    pub content_ref: String,
    pub duration_secs: u32,
    #[serde(default)]
    pub skip_after_secs: Option<u32>,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    PreRoll,
    Display,
    Overlay,
}

impl Ad {
    pub fn new(campaign_id: Uuid, ad_type: AdType, content_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            ad_type,
            content_ref: content_ref.into(),
            duration_secs: 15,
            skip_after_secs: None,
            position: None,
            enabled: true,
        }
    }
}

// ─── Serving ───────────────────────────────────────────────────────────────

/// Which rate a placement is billed and ranked on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingGoal {
    #[default]
    Views,
    Clicks,
}

/// Context of one inbound ad request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    #[serde(default)]
    pub viewer_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Restrict to one ad format; `None` accepts any enabled ad.
    #[serde(default)]
    pub ad_type: Option<AdType>,
    #[serde(default)]
    pub goal: BillingGoal,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> AdResult<()> {
        if self.request_id.is_empty() {
            return Err(AdError::Validation("request_id must not be empty".to_string()));
        }
        for (name, value) in [
            ("request_id", Some(&self.request_id)),
            ("viewer_id", self.viewer_id.as_ref()),
            ("video_id", self.video_id.as_ref()),
            ("channel_id", self.channel_id.as_ref()),
        ] {
            if value.is_some_and(|v| v.len() > MAX_FIELD_LEN) {
                return Err(AdError::Validation(format!("{name} exceeds maximum length")));
            }
        }
        Ok(())
    }

    pub fn effective_rate(&self, campaign: &Campaign) -> Money {
        match self.goal {
            BillingGoal::Views => campaign.cost_per_view,
            BillingGoal::Clicks => campaign.cost_per_click,
        }
    }
}

/// Outcome of a serve request, kept only long enough to correlate the
/// impression or click that follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeDecision {
    pub request_id: String,
    pub campaign_id: Uuid,
    pub ad_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

// ─── Delivery events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Impression,
    Click,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Impression => "impression",
            EventKind::Click => "click",
        }
    }
}

/// An impression or click reported by a playback session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdEvent {
    pub kind: EventKind,
    pub campaign_id: Uuid,
    #[serde(default)]
    pub ad_id: Option<Uuid>,
    #[serde(default)]
    pub viewer_id: Option<String>,
    /// Session token for anonymous viewers; stands in for `viewer_id` in the
    /// dedup key when present.
    #[serde(default)]
    pub anonymous_token: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AdEvent {
    pub fn new(kind: EventKind, campaign_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            campaign_id,
            ad_id: None,
            viewer_id: None,
            anonymous_token: None,
            video_id: None,
            timestamp,
        }
    }

    pub fn impression(campaign_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventKind::Impression, campaign_id, timestamp)
    }

    pub fn click(campaign_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventKind::Click, campaign_id, timestamp)
    }

    pub fn with_viewer(mut self, viewer_id: impl Into<String>) -> Self {
        self.viewer_id = Some(viewer_id.into());
        self
    }

    pub fn with_video(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    pub fn validate(&self) -> AdResult<()> {
        for (name, value) in [
            ("viewer_id", self.viewer_id.as_ref()),
            ("anonymous_token", self.anonymous_token.as_ref()),
            ("video_id", self.video_id.as_ref()),
        ] {
            if value.is_some_and(|v| v.len() > MAX_FIELD_LEN) {
                return Err(AdError::Validation(format!("{name} exceeds maximum length")));
            }
        }
        Ok(())
    }
}

// ─── Analytics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Hour,
    Day,
}

impl Granularity {
    pub fn step(self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    /// Start of the period containing `ts` (UTC boundaries).
    pub fn floor(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.step()).unwrap_or(ts)
    }
}

/// Aggregate counters for one campaign over one period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsBucket {
    pub campaign_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub granularity: Granularity,
    pub impressions: u64,
    pub clicks: u64,
    /// Gross amount charged.
    pub spend: Money,
    /// Amount charged net of refunds.
    pub revenue: Money,
    /// Clicks per impression; kept current by `refresh_ctr`.
    #[serde(default)]
    pub ctr: f64,
}

impl AnalyticsBucket {
    pub fn empty(campaign_id: Uuid, period_start: DateTime<Utc>, granularity: Granularity) -> Self {
        Self {
            campaign_id,
            period_start,
            granularity,
            impressions: 0,
            clicks: 0,
            spend: Money::ZERO,
            revenue: Money::ZERO,
            ctr: 0.0,
        }
    }

    pub fn refresh_ctr(&mut self) {
        self.ctr = if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        };
    }
}
