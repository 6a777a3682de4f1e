//! Spend pacing: how much of its budget a campaign may have spent by now.
//!
//! Pacing is advisory. It narrows and ranks serving candidates; the ledger's
//! budget check is the only hard limit.

use adserve_core::config::PacingConfig;
use adserve_core::money::Money;
use adserve_core::types::Campaign;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spend fraction below `elapsed * UNDERSPEND_RATIO` counts as underspending.
const UNDERSPEND_RATIO: f64 = 0.8;

/// Describes whether a campaign is spending at the expected rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingStatus {
    NotStarted,
    OnTrack,
    Underspending,
    Overspending,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PacingController {
    pace_multiplier: f64,
}

impl PacingController {
    pub fn new(pace_multiplier: f64) -> Self {
        Self { pace_multiplier }
    }

    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(config.pace_multiplier)
    }

    pub fn pace_multiplier(&self) -> f64 {
        self.pace_multiplier
    }

    /// Fraction of the scheduled run elapsed at `now`, clamped to `[0, 1]`.
    /// A zero-length schedule is fully elapsed once it starts.
    pub fn elapsed_fraction(&self, campaign: &Campaign, now: DateTime<Utc>) -> f64 {
        let total = (campaign.end - campaign.start).num_milliseconds();
        let elapsed = (now - campaign.start).num_milliseconds();
        if total <= 0 {
            return if elapsed >= 0 { 1.0 } else { 0.0 };
        }
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// `budget * elapsed_fraction * pace_multiplier`.
    pub fn max_allowed_spend(&self, campaign: &Campaign, now: DateTime<Utc>) -> Money {
        campaign
            .budget
            .mul_f64(self.elapsed_fraction(campaign, now) * self.pace_multiplier)
    }

    /// Whether spending `amount` now keeps the campaign within its pacing cap.
    pub fn is_pacing_eligible(&self, campaign: &Campaign, amount: Money, now: DateTime<Utc>) -> bool {
        match campaign.spent.checked_add(amount) {
            Some(after) => after <= self.max_allowed_spend(campaign, now),
            None => false,
        }
    }

    /// How far spend trails the pacing cap, as a fraction of total budget,
    /// clamped to `[0, 1]`.
    pub fn pacing_deficit(&self, campaign: &Campaign, now: DateTime<Utc>) -> f64 {
        let deficit = self
            .max_allowed_spend(campaign, now)
            .saturating_sub(campaign.spent)
            .max(Money::ZERO);
        deficit.ratio(campaign.budget).clamp(0.0, 1.0)
    }

    pub fn status(&self, campaign: &Campaign, now: DateTime<Utc>) -> PacingStatus {
        if now < campaign.start {
            return PacingStatus::NotStarted;
        }
        if campaign.spent >= campaign.budget {
            return PacingStatus::Exhausted;
        }

        let elapsed_fraction = self.elapsed_fraction(campaign, now);
        let spend_fraction = campaign.spent.ratio(campaign.budget);

        if spend_fraction > elapsed_fraction * self.pace_multiplier {
            PacingStatus::Overspending
        } else if spend_fraction < elapsed_fraction * UNDERSPEND_RATIO {
            PacingStatus::Underspending
        } else {
            PacingStatus::OnTrack
        }
    }
}

impl Default for PacingController {
    fn default() -> Self {
        Self::from_config(&PacingConfig::default())
    }
}
