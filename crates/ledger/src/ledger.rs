//! In-memory campaign ledger: budget, spend-so-far, lifecycle state and the
//! campaign's ads.
//!
//! Each campaign lives behind its own `RwLock`, reached through a `DashMap`
//! of `Arc`s. Lookups hold the map shard only long enough to clone the
//! `Arc`, so a debit on one campaign never waits on another, and serving
//! reads share the per-campaign read lock.

use adserve_core::error::{AdError, AdResult};
use adserve_core::event_bus::PersistedCampaign;
use adserve_core::money::Money;
use adserve_core::types::{Ad, Campaign, CampaignStatus};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

struct LedgerEntry {
    campaign: Campaign,
    ads: Vec<Ad>,
    /// Accepted debits in this process.
    events_recorded: u64,
    /// Spend was recorded before this process started.
    persisted_history: bool,
}

type EntryRef = Arc<RwLock<LedgerEntry>>;

/// Result of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitOutcome {
    pub accepted: bool,
    /// Spend after the attempt; unchanged when rejected.
    pub new_spent: Money,
    /// The debit brought spend exactly to budget and completed the campaign.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub requested: Money,
    pub applied: Money,
    pub new_spent: Money,
    /// The request exceeded recorded spend and was clamped at zero.
    pub clamped: bool,
}

/// Read-path view used by pacing and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub budget: Money,
    pub spent: Money,
    pub remaining: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdRemoval {
    Deleted,
    /// The campaign has recorded events, so the ad is kept but disabled.
    Disabled,
}

// ---------------------------------------------------------------------------
// CampaignLedger
// ---------------------------------------------------------------------------

pub struct CampaignLedger {
    entries: DashMap<Uuid, EntryRef>,
}

impl CampaignLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn entry(&self, campaign_id: Uuid) -> AdResult<EntryRef> {
        self.entries
            .get(&campaign_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(AdError::CampaignNotFound(campaign_id))
    }

    // -- registry -----------------------------------------------------------

    /// Insert a new campaign or refresh the descriptive fields of a known one.
    ///
    /// For a known campaign the ledger keeps its own `spent` and `status`.
    /// A budget lowered below current spend is accepted but every further
    /// debit is rejected.
    pub fn upsert_campaign(&self, campaign: Campaign) -> AdResult<Campaign> {
        let campaign_id = campaign.id;
        let existing = match self.entries.entry(campaign_id) {
            MapEntry::Occupied(occupied) => Arc::clone(occupied.get()),
            MapEntry::Vacant(vacant) => {
                campaign.validate()?;
                info!(campaign_id = %campaign_id, owner_id = %campaign.owner_id, "Campaign registered in ledger");
                let snapshot = campaign.clone();
                vacant.insert(Arc::new(RwLock::new(LedgerEntry {
                    persisted_history: !campaign.spent.is_zero(),
                    campaign,
                    ads: Vec::new(),
                    events_recorded: 0,
                })));
                return Ok(snapshot);
            }
        };

        let mut entry = existing.write();
        let mut updated = campaign;
        updated.spent = entry.campaign.spent;
        updated.status = entry.campaign.status;
        updated.created_at = entry.campaign.created_at;
        if updated.spent > updated.budget {
            warn!(
                campaign_id = %campaign_id,
                budget = %updated.budget,
                spent = %updated.spent,
                "Budget lowered below recorded spend; further debits will be rejected"
            );
            let mut check = updated.clone();
            check.spent = Money::ZERO;
            check.validate()?;
        } else {
            updated.validate()?;
        }
        entry.campaign = updated;
        Ok(entry.campaign.clone())
    }

    /// Apply what the persistence collaborator remembers: the running spend
    /// total and the last stored status. Only meant for the restart path,
    /// before serving resumes. A persisted total above budget is clamped to
    /// budget and completes the campaign.
    pub fn rehydrate(&self, campaign_id: Uuid, persisted: PersistedCampaign) -> AdResult<Campaign> {
        let entry = self.entry(campaign_id)?;
        let mut entry = entry.write();
        let budget = entry.campaign.budget;
        let spent = if persisted.spent.is_negative() {
            warn!(campaign_id = %campaign_id, persisted = %persisted.spent, "Negative persisted spend, clamping to zero");
            Money::ZERO
        } else if persisted.spent > budget {
            warn!(
                campaign_id = %campaign_id,
                persisted = %persisted.spent,
                budget = %budget,
                "Persisted spend exceeds budget, clamping and completing campaign"
            );
            budget
        } else {
            persisted.spent
        };
        entry.campaign.spent = spent;
        if !spent.is_zero() {
            entry.persisted_history = true;
        }
        if let Some(status) = persisted.status {
            entry.campaign.status = status;
        }
        if spent == budget && !budget.is_zero() && entry.campaign.status.is_chargeable() {
            entry.campaign.status = CampaignStatus::Completed;
        }
        Ok(entry.campaign.clone())
    }

    pub fn get(&self, campaign_id: Uuid) -> AdResult<Campaign> {
        Ok(self.entry(campaign_id)?.read().campaign.clone())
    }

    pub fn contains(&self, campaign_id: Uuid) -> bool {
        self.entries.contains_key(&campaign_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Campaigns, optionally restricted to one owner, newest first.
    pub fn list(&self, owner_id: Option<&str>) -> Vec<Campaign> {
        let mut campaigns = self.scan(|c, _| match owner_id {
            Some(owner) if c.owner_id != owner => None,
            _ => Some(c.clone()),
        });
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    /// Visit every campaign under its read lock, keeping what `f` returns.
    pub fn scan<T>(&self, mut f: impl FnMut(&Campaign, &[Ad]) -> Option<T>) -> Vec<T> {
        let refs: Vec<EntryRef> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        refs.iter()
            .filter_map(|entry| {
                let entry = entry.read();
                f(&entry.campaign, &entry.ads)
            })
            .collect()
    }

    // -- spend ----------------------------------------------------------------

    /// Atomically apply `amount` if `spent + amount <= budget`.
    ///
    /// Debits on one campaign are serialized by its write lock, so under
    /// concurrent attempts the ones that commit first are the ones that fit.
    pub fn try_debit(&self, campaign_id: Uuid, amount: Money) -> AdResult<DebitOutcome> {
        if amount.is_negative() {
            return Err(AdError::Validation("debit amount must be >= 0".to_string()));
        }
        let entry = self.entry(campaign_id)?;
        let mut entry = entry.write();
        let campaign = &mut entry.campaign;

        let next = match campaign.spent.checked_add(amount) {
            Some(next) if next <= campaign.budget => next,
            _ => {
                metrics::counter!("ledger.debits_rejected").increment(1);
                debug!(
                    campaign_id = %campaign_id,
                    amount = %amount,
                    spent = %campaign.spent,
                    budget = %campaign.budget,
                    "Debit rejected, budget exhausted"
                );
                return Ok(DebitOutcome {
                    accepted: false,
                    new_spent: campaign.spent,
                    exhausted: false,
                });
            }
        };

        campaign.spent = next;
        let exhausted = next == campaign.budget && campaign.status.is_chargeable();
        if exhausted {
            campaign.status = CampaignStatus::Completed;
            info!(campaign_id = %campaign_id, budget = %campaign.budget, "Campaign budget fully spent");
        }
        entry.events_recorded += 1;
        metrics::counter!("ledger.debits_accepted").increment(1);

        Ok(DebitOutcome {
            accepted: true,
            new_spent: next,
            exhausted,
        })
    }

    /// Give back spend for a voided event. Never drives spend below zero.
    pub fn refund(&self, campaign_id: Uuid, amount: Money) -> AdResult<RefundOutcome> {
        if amount.is_negative() {
            return Err(AdError::Validation("refund amount must be >= 0".to_string()));
        }
        let entry = self.entry(campaign_id)?;
        let mut entry = entry.write();
        let campaign = &mut entry.campaign;

        let clamped = amount > campaign.spent;
        let applied = if clamped { campaign.spent } else { amount };
        if clamped {
            metrics::counter!("ledger.refund_clamped").increment(1);
            warn!(
                campaign_id = %campaign_id,
                requested = %amount,
                spent = %campaign.spent,
                "Refund exceeds recorded spend, clamping at zero"
            );
        }
        campaign.spent = campaign.spent - applied;

        Ok(RefundOutcome {
            requested: amount,
            applied,
            new_spent: campaign.spent,
            clamped,
        })
    }

    pub fn status(&self, campaign_id: Uuid) -> AdResult<LedgerStatus> {
        let entry = self.entry(campaign_id)?;
        let entry = entry.read();
        let c = &entry.campaign;
        Ok(LedgerStatus {
            campaign_id,
            status: c.status,
            budget: c.budget,
            spent: c.spent,
            remaining: c.remaining(),
        })
    }

    // -- lifecycle ------------------------------------------------------------

    fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (from, to),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Completed)
                | (Paused, Completed)
                | (Draft, Cancelled)
                | (Active, Cancelled)
                | (Paused, Cancelled)
        )
    }

    /// Move a campaign to `to`. When `owner_id` is given it must own the
    /// campaign. Returns the previous status.
    pub fn transition(
        &self,
        campaign_id: Uuid,
        to: CampaignStatus,
        owner_id: Option<&str>,
    ) -> AdResult<CampaignStatus> {
        let entry = self.entry(campaign_id)?;
        let mut entry = entry.write();
        let campaign = &mut entry.campaign;

        if let Some(owner) = owner_id {
            if campaign.owner_id != owner {
                return Err(AdError::Forbidden {
                    campaign_id,
                    owner_id: owner.to_string(),
                });
            }
        }

        let from = campaign.status;
        if !Self::can_transition(from, to) {
            return Err(AdError::InvalidTransition { from, to });
        }
        campaign.status = to;
        info!(campaign_id = %campaign_id, from = ?from, to = ?to, "Campaign status changed");
        Ok(from)
    }

    /// System-initiated completion. Returns `true` if the status changed.
    pub fn mark_completed(&self, campaign_id: Uuid) -> AdResult<bool> {
        match self.transition(campaign_id, CampaignStatus::Completed, None) {
            Ok(_) => Ok(true),
            Err(AdError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Complete every running campaign whose end date has passed.
    pub fn complete_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let expired = self.scan(|c, _| {
            (c.status.is_chargeable() && now > c.end).then_some(c.id)
        });
        expired
            .into_iter()
            .filter(|id| matches!(self.mark_completed(*id), Ok(true)))
            .collect()
    }

    // -- ads ------------------------------------------------------------------

    pub fn add_ad(&self, ad: Ad) -> AdResult<Ad> {
        let entry = self.entry(ad.campaign_id)?;
        let mut entry = entry.write();
        if entry.campaign.status == CampaignStatus::Cancelled {
            return Err(AdError::Validation(format!(
                "campaign {} is cancelled",
                ad.campaign_id
            )));
        }
        if let Some(existing) = entry.ads.iter_mut().find(|a| a.id == ad.id) {
            *existing = ad.clone();
        } else {
            entry.ads.push(ad.clone());
        }
        Ok(ad)
    }

    pub fn remove_ad(&self, campaign_id: Uuid, ad_id: Uuid) -> AdResult<AdRemoval> {
        let entry = self.entry(campaign_id)?;
        let mut entry = entry.write();
        let index = entry
            .ads
            .iter()
            .position(|a| a.id == ad_id)
            .ok_or_else(|| AdError::Validation(format!("unknown ad {ad_id}")))?;

        if entry.events_recorded == 0 && !entry.persisted_history {
            entry.ads.remove(index);
            Ok(AdRemoval::Deleted)
        } else {
            entry.ads[index].enabled = false;
            Ok(AdRemoval::Disabled)
        }
    }

    pub fn ads(&self, campaign_id: Uuid) -> AdResult<Vec<Ad>> {
        Ok(self.entry(campaign_id)?.read().ads.clone())
    }

    pub fn events_recorded(&self, campaign_id: Uuid) -> AdResult<u64> {
        Ok(self.entry(campaign_id)?.read().events_recorded)
    }
}

impl Default for CampaignLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use adserve_core::types::AdType;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn campaign(budget_units: i64) -> Campaign {
        let start = Utc::now() - Duration::days(1);
        Campaign::draft(
            "owner-1",
            "Autumn promo",
            Money::from_units(budget_units),
            Money::from_units(10),
            Money::from_units(25),
            start,
            start + Duration::days(10),
        )
        .with_status(CampaignStatus::Active)
    }

    fn ledger_with(budget_units: i64) -> (CampaignLedger, Uuid) {
        let ledger = CampaignLedger::new();
        let c = ledger.upsert_campaign(campaign(budget_units)).unwrap();
        (ledger, c.id)
    }

    // 1. Debits -------------------------------------------------------------

    #[test]
    fn test_budget_100_cpv_10_accepts_exactly_ten() {
        let (ledger, cid) = ledger_with(100);
        for i in 1..=10 {
            let out = ledger.try_debit(cid, Money::from_units(10)).unwrap();
            assert!(out.accepted, "debit {i} should fit");
            assert_eq!(out.new_spent, Money::from_units(10 * i));
        }
        let out = ledger.try_debit(cid, Money::from_units(10)).unwrap();
        assert!(!out.accepted);
        assert_eq!(out.new_spent, Money::from_units(100));
    }

    #[test]
    fn test_rejected_debit_has_no_side_effect() {
        let (ledger, cid) = ledger_with(15);
        ledger.try_debit(cid, Money::from_units(10)).unwrap();
        let out = ledger.try_debit(cid, Money::from_units(10)).unwrap();
        assert!(!out.accepted);
        let status = ledger.status(cid).unwrap();
        assert_eq!(status.spent, Money::from_units(10));
        assert_eq!(status.remaining, Money::from_units(5));
        assert_eq!(ledger.events_recorded(cid).unwrap(), 1);
    }

    #[test]
    fn test_exact_exhaustion_completes_campaign() {
        let (ledger, cid) = ledger_with(20);
        assert!(!ledger.try_debit(cid, Money::from_units(10)).unwrap().exhausted);
        let out = ledger.try_debit(cid, Money::from_units(10)).unwrap();
        assert!(out.accepted && out.exhausted);
        assert_eq!(ledger.get(cid).unwrap().status, CampaignStatus::Completed);
    }

    #[test]
    fn test_unknown_campaign_and_negative_amount() {
        let (ledger, cid) = ledger_with(10);
        assert!(matches!(
            ledger.try_debit(Uuid::new_v4(), Money::from_units(1)),
            Err(AdError::CampaignNotFound(_))
        ));
        assert!(matches!(
            ledger.try_debit(cid, Money::from_units(-1)),
            Err(AdError::Validation(_))
        ));
    }

    #[test]
    fn test_concurrent_debits_never_overspend() {
        let (ledger, cid) = ledger_with(1_000);
        let accepted = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    for _ in 0..50 {
                        if ledger.try_debit(cid, Money::from_units(3)).unwrap().accepted {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        let status = ledger.status(cid).unwrap();
        assert!(status.spent <= status.budget);
        // 1000 / 3 = 333 debits fit, 800 were attempted.
        assert_eq!(accepted.load(Ordering::Relaxed), 333);
        assert_eq!(status.spent, Money::from_units(999));
    }

    // The ledger alone accepts any later debit that still fits. Prefix
    // semantics come from the recorder completing the campaign on the first
    // rejection.
    #[test]
    fn test_sequential_debits_accept_whatever_fits() {
        let (ledger, cid) = ledger_with(50);
        let amounts = [20, 20, 20, 5, 5];
        let results: Vec<bool> = amounts
            .iter()
            .map(|a| ledger.try_debit(cid, Money::from_units(*a)).unwrap().accepted)
            .collect();
        assert_eq!(results, vec![true, true, false, true, true]);
        assert_eq!(ledger.status(cid).unwrap().spent, Money::from_units(50));
    }

    // 2. Refunds ------------------------------------------------------------

    #[test]
    fn test_refund_restores_spend() {
        let (ledger, cid) = ledger_with(100);
        ledger.try_debit(cid, Money::from_units(30)).unwrap();
        let out = ledger.refund(cid, Money::from_units(10)).unwrap();
        assert!(!out.clamped);
        assert_eq!(out.new_spent, Money::from_units(20));
    }

    #[test]
    fn test_refund_clamps_at_zero() {
        let (ledger, cid) = ledger_with(100);
        ledger.try_debit(cid, Money::from_units(5)).unwrap();
        let out = ledger.refund(cid, Money::from_units(50)).unwrap();
        assert!(out.clamped);
        assert_eq!(out.applied, Money::from_units(5));
        assert_eq!(out.new_spent, Money::ZERO);
        assert_eq!(ledger.status(cid).unwrap().spent, Money::ZERO);
    }

    // 3. Registry -----------------------------------------------------------

    #[test]
    fn test_upsert_keeps_ledger_owned_fields() {
        let (ledger, cid) = ledger_with(100);
        ledger.try_debit(cid, Money::from_units(40)).unwrap();
        ledger.transition(cid, CampaignStatus::Paused, None).unwrap();

        let mut update = ledger.get(cid).unwrap();
        update.name = "Renamed".to_string();
        update.spent = Money::ZERO;
        update.status = CampaignStatus::Active;
        let stored = ledger.upsert_campaign(update).unwrap();

        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.spent, Money::from_units(40));
        assert_eq!(stored.status, CampaignStatus::Paused);
    }

    #[test]
    fn test_budget_lowered_below_spend_fails_closed() {
        let (ledger, cid) = ledger_with(100);
        ledger.try_debit(cid, Money::from_units(60)).unwrap();

        let mut update = ledger.get(cid).unwrap();
        update.budget = Money::from_units(50);
        ledger.upsert_campaign(update).unwrap();

        assert!(!ledger.try_debit(cid, Money::ZERO).unwrap().accepted);
        assert_eq!(ledger.status(cid).unwrap().remaining, Money::ZERO);
    }

    #[test]
    fn test_rehydrate_clamps_to_budget() {
        let (ledger, cid) = ledger_with(100);
        let persisted = |units| PersistedCampaign {
            spent: Money::from_units(units),
            status: None,
        };
        assert_eq!(
            ledger.rehydrate(cid, persisted(42)).unwrap().spent,
            Money::from_units(42)
        );
        let restored = ledger.rehydrate(cid, persisted(500)).unwrap();
        assert_eq!(restored.spent, Money::from_units(100));
        assert_eq!(restored.status, CampaignStatus::Completed);
    }

    #[test]
    fn test_rehydrate_applies_persisted_status() {
        let (ledger, cid) = ledger_with(100);
        let restored = ledger
            .rehydrate(
                cid,
                PersistedCampaign {
                    spent: Money::from_units(10),
                    status: Some(CampaignStatus::Cancelled),
                },
            )
            .unwrap();
        assert_eq!(restored.status, CampaignStatus::Cancelled);
        assert!(ledger.transition(cid, CampaignStatus::Active, None).is_err());
    }

    #[test]
    fn test_ad_soft_disabled_when_spend_predates_process() {
        let (ledger, cid) = ledger_with(100);
        ledger
            .rehydrate(
                cid,
                PersistedCampaign {
                    spent: Money::from_units(40),
                    status: None,
                },
            )
            .unwrap();
        let ad = ledger.add_ad(Ad::new(cid, AdType::PreRoll, "cdn://c.mp4")).unwrap();
        assert_eq!(ledger.events_recorded(cid).unwrap(), 0);
        assert_eq!(ledger.remove_ad(cid, ad.id).unwrap(), AdRemoval::Disabled);
    }

    #[test]
    fn test_concurrent_first_registration_keeps_one_entry() {
        let ledger = CampaignLedger::new();
        let template = campaign(100);
        std::thread::scope(|s| {
            for i in 0..8 {
                let mut copy = template.clone();
                copy.name = format!("copy-{i}");
                let ledger = &ledger;
                s.spawn(move || ledger.upsert_campaign(copy).unwrap());
            }
        });
        assert_eq!(ledger.len(), 1);
        ledger.try_debit(template.id, Money::from_units(10)).unwrap();
        let mut late = template.clone();
        late.name = "late".to_string();
        ledger.upsert_campaign(late).unwrap();
        assert_eq!(ledger.status(template.id).unwrap().spent, Money::from_units(10));
    }

    // 4. Lifecycle ----------------------------------------------------------

    #[test]
    fn test_lifecycle_transitions() {
        let ledger = CampaignLedger::new();
        let c = ledger
            .upsert_campaign(campaign(100).with_status(CampaignStatus::Draft))
            .unwrap();

        assert!(matches!(
            ledger.transition(c.id, CampaignStatus::Paused, None),
            Err(AdError::InvalidTransition { .. })
        ));
        ledger.transition(c.id, CampaignStatus::Active, None).unwrap();
        ledger.transition(c.id, CampaignStatus::Paused, None).unwrap();
        ledger.transition(c.id, CampaignStatus::Active, None).unwrap();
        ledger.transition(c.id, CampaignStatus::Cancelled, None).unwrap();
        assert!(ledger.transition(c.id, CampaignStatus::Active, None).is_err());
    }

    #[test]
    fn test_owner_checked_on_transition() {
        let (ledger, cid) = ledger_with(100);
        assert!(matches!(
            ledger.transition(cid, CampaignStatus::Paused, Some("intruder")),
            Err(AdError::Forbidden { .. })
        ));
        assert_eq!(
            ledger.transition(cid, CampaignStatus::Paused, Some("owner-1")).unwrap(),
            CampaignStatus::Active
        );
    }

    #[test]
    fn test_complete_expired() {
        let ledger = CampaignLedger::new();
        let mut ended = campaign(100);
        ended.start = Utc::now() - Duration::days(10);
        ended.end = Utc::now() - Duration::days(1);
        let ended = ledger.upsert_campaign(ended).unwrap();
        let running = ledger.upsert_campaign(campaign(100)).unwrap();

        let completed = ledger.complete_expired(Utc::now());
        assert_eq!(completed, vec![ended.id]);
        assert_eq!(ledger.get(running.id).unwrap().status, CampaignStatus::Active);
    }

    // 5. Ads ----------------------------------------------------------------

    #[test]
    fn test_ad_hard_delete_without_events() {
        let (ledger, cid) = ledger_with(100);
        let ad = ledger.add_ad(Ad::new(cid, AdType::PreRoll, "cdn://a.mp4")).unwrap();
        assert_eq!(ledger.remove_ad(cid, ad.id).unwrap(), AdRemoval::Deleted);
        assert!(ledger.ads(cid).unwrap().is_empty());
    }

    #[test]
    fn test_ad_soft_disable_after_events() {
        let (ledger, cid) = ledger_with(100);
        let ad = ledger.add_ad(Ad::new(cid, AdType::Display, "cdn://b.png")).unwrap();
        ledger.try_debit(cid, Money::from_units(10)).unwrap();

        assert_eq!(ledger.remove_ad(cid, ad.id).unwrap(), AdRemoval::Disabled);
        let ads = ledger.ads(cid).unwrap();
        assert_eq!(ads.len(), 1);
        assert!(!ads[0].enabled);
    }

    #[test]
    fn test_list_by_owner() {
        let ledger = CampaignLedger::new();
        ledger.upsert_campaign(campaign(10)).unwrap();
        let mut other = campaign(10);
        other.owner_id = "owner-2".to_string();
        ledger.upsert_campaign(other).unwrap();

        assert_eq!(ledger.list(None).len(), 2);
        assert_eq!(ledger.list(Some("owner-2")).len(), 1);
    }
}
