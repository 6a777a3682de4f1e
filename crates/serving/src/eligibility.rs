//! Narrows the campaign set to those that may serve the current request.

use adserve_core::types::{Ad, Campaign, CampaignStatus, RequestContext};
use adserve_ledger::{CampaignLedger, PacingController};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A campaign that passed every check, with the ad it would show.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub campaign: Campaign,
    pub ad: Ad,
}

/// Why a campaign was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligible {
    NotActive(CampaignStatus),
    OutsideSchedule,
    TargetingMismatch,
    BudgetExhausted,
    PacingCapped,
    NoMatchingAd,
}

#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    pacing: PacingController,
}

impl EligibilityFilter {
    pub fn new(pacing: PacingController) -> Self {
        Self { pacing }
    }

    /// Check one campaign, returning the ad to serve if it qualifies.
    pub fn check(
        &self,
        campaign: &Campaign,
        ads: &[Ad],
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Ad, Ineligible> {
        if campaign.status != CampaignStatus::Active {
            return Err(Ineligible::NotActive(campaign.status));
        }
        if !campaign.is_within_schedule(now) {
            return Err(Ineligible::OutsideSchedule);
        }
        if !campaign.targeting.matches(ctx.channel_id.as_deref()) {
            return Err(Ineligible::TargetingMismatch);
        }
        if campaign.remaining().is_zero() {
            return Err(Ineligible::BudgetExhausted);
        }
        if !self
            .pacing
            .is_pacing_eligible(campaign, campaign.cost_per_view, now)
        {
            return Err(Ineligible::PacingCapped);
        }
        ads.iter()
            .find(|ad| ad.enabled && ctx.ad_type.map_or(true, |t| ad.ad_type == t))
            .cloned()
            .ok_or(Ineligible::NoMatchingAd)
    }

    /// Every campaign that may serve `ctx`, in no particular order.
    pub fn eligible(
        &self,
        ledger: &CampaignLedger,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        ledger.scan(|campaign, ads| {
            self.check(campaign, ads, ctx, now).ok().map(|ad| Candidate {
                campaign: campaign.clone(),
                ad,
            })
        })
    }
}
