//! Picks one ad among eligible candidates.
//!
//! Score is `effective_rate * pacing_deficit`: campaigns furthest behind
//! their pacing target win, so none starves near its end date. Equal scores
//! go to the campaign that started first, then to the lower campaign id.

use crate::eligibility::Candidate;
use adserve_core::types::{Ad, RequestContext, ServeDecision};
use adserve_ledger::PacingController;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// The winning ad plus the decision record used to correlate later events.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub decision: ServeDecision,
    pub ad: Ad,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AdSelector {
    pacing: PacingController,
}

impl AdSelector {
    pub fn new(pacing: PacingController) -> Self {
        Self { pacing }
    }

    pub fn score(&self, candidate: &Candidate, ctx: &RequestContext, now: DateTime<Utc>) -> f64 {
        let rate = ctx.effective_rate(&candidate.campaign).as_f64();
        rate * self.pacing.pacing_deficit(&candidate.campaign, now)
    }

    fn rank(a: &(f64, &Candidate), b: &(f64, &Candidate)) -> Ordering {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.campaign.start.cmp(&b.1.campaign.start))
            .then_with(|| a.1.campaign.id.cmp(&b.1.campaign.id))
    }

    /// `None` when there are no candidates; that is a normal outcome.
    pub fn select(
        &self,
        candidates: &[Candidate],
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Option<Selection> {
        let (score, winner) = candidates
            .iter()
            .map(|c| (self.score(c, ctx, now), c))
            .min_by(Self::rank)?;

        Some(Selection {
            decision: ServeDecision {
                request_id: ctx.request_id.clone(),
                campaign_id: winner.campaign.id,
                ad_id: winner.ad.id,
                timestamp: now,
            },
            ad: winner.ad.clone(),
            score,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use adserve_core::money::Money;
    use adserve_core::types::{AdType, BillingGoal, Campaign, CampaignStatus};
    use chrono::Duration;

    fn candidate(
        budget: i64,
        spent: i64,
        cpv: i64,
        cpc: i64,
        started_days_ago: i64,
        now: DateTime<Utc>,
    ) -> Candidate {
        let start = now - Duration::days(started_days_ago);
        let mut campaign = Campaign::draft(
            "owner-1",
            "Ranked",
            Money::from_units(budget),
            Money::from_units(cpv),
            Money::from_units(cpc),
            start,
            start + Duration::days(10),
        )
        .with_status(CampaignStatus::Active);
        campaign.spent = Money::from_units(spent);
        let ad = Ad::new(campaign.id, AdType::PreRoll, "cdn://x.mp4");
        Candidate { campaign, ad }
    }

    #[test]
    fn test_empty_candidates_select_none() {
        let selector = AdSelector::default();
        assert!(selector.select(&[], &RequestContext::new("r"), Utc::now()).is_none());
    }

    #[test]
    fn test_behind_pace_wins() {
        let now = Utc::now();
        let on_pace = candidate(100, 50, 1, 1, 5, now);
        let behind = candidate(100, 0, 1, 1, 5, now);
        let selector = AdSelector::new(PacingController::new(1.0));

        let pick = selector
            .select(&[on_pace, behind.clone()], &RequestContext::new("r-1"), now)
            .unwrap();
        assert_eq!(pick.decision.campaign_id, behind.campaign.id);
        assert_eq!(pick.decision.ad_id, behind.ad.id);
        assert_eq!(pick.decision.request_id, "r-1");
    }

    #[test]
    fn test_rate_multiplies_score() {
        let now = Utc::now();
        let cheap = candidate(100, 0, 1, 10, 5, now);
        let pricey = candidate(100, 0, 2, 1, 5, now);
        let selector = AdSelector::new(PacingController::new(1.0));

        let views = RequestContext::new("r");
        let pick = selector.select(&[cheap.clone(), pricey.clone()], &views, now).unwrap();
        assert_eq!(pick.decision.campaign_id, pricey.campaign.id);

        let mut clicks = RequestContext::new("r");
        clicks.goal = BillingGoal::Clicks;
        let pick = selector.select(&[cheap.clone(), pricey], &clicks, now).unwrap();
        assert_eq!(pick.decision.campaign_id, cheap.campaign.id);
    }

    #[test]
    fn test_tie_goes_to_earliest_start() {
        let now = Utc::now();
        // Both fully spent relative to pace: score 0 for each.
        let newer = candidate(100, 100, 1, 1, 2, now);
        let older = candidate(100, 100, 1, 1, 4, now);
        let selector = AdSelector::default();

        let pick = selector
            .select(&[newer, older.clone()], &RequestContext::new("r"), now)
            .unwrap();
        assert_eq!(pick.decision.campaign_id, older.campaign.id);
        assert_eq!(pick.score, 0.0);
    }
}
