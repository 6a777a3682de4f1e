//! Event recorder: accepts impressions and clicks, collapses duplicates,
//! and charges the campaign ledger.
//!
//! Order of operations for one event:
//! 1. admit (bounded in-flight count, excess is rejected as `Throttled`)
//! 2. reserve the dedup key at receipt time
//! 3. `try_debit` at the campaign's rate for the event kind
//! 4. on acceptance: aggregate and hand a `Charge` record to the sink;
//!    on rejection: release the key and complete the campaign
//!
//! Nothing here waits on persistence. The sink only queues.

use crate::dedup::{dedup_key, DedupCheck, DedupWindow};
use adserve_analytics::AnalyticsAggregator;
use adserve_core::config::RecorderConfig;
use adserve_core::error::{AdError, AdResult};
use adserve_core::event_bus::{DurableRecord, RecordSink};
use adserve_core::money::Money;
use adserve_core::types::{AdEvent, CampaignStatus, EventKind};
use adserve_ledger::{CampaignLedger, RefundOutcome};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What happened to a recorded event. Only `Charged` moved money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Charged { amount: Money, new_spent: Money },
    /// Already counted within the dedup window.
    Duplicate,
    /// The campaign could not afford the event.
    BudgetExhausted,
    /// The campaign is not in a chargeable state.
    CampaignInactive { status: CampaignStatus },
    /// Shed under load; the caller may retry.
    Throttled,
}

impl RecordOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, RecordOutcome::Charged { .. })
    }

    fn metric_name(&self) -> &'static str {
        match self {
            RecordOutcome::Charged { .. } => "events.charged",
            RecordOutcome::Duplicate => "events.duplicate",
            RecordOutcome::BudgetExhausted => "events.budget_exhausted",
            RecordOutcome::CampaignInactive { .. } => "events.campaign_inactive",
            RecordOutcome::Throttled => "events.throttled",
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct EventRecorder {
    ledger: Arc<CampaignLedger>,
    dedup: Arc<DedupWindow>,
    aggregator: Arc<AnalyticsAggregator>,
    sink: Arc<dyn RecordSink>,
    in_flight: AtomicUsize,
    max_in_flight: usize,
    max_clock_skew: Duration,
}

impl EventRecorder {
    pub fn new(
        ledger: Arc<CampaignLedger>,
        dedup: Arc<DedupWindow>,
        aggregator: Arc<AnalyticsAggregator>,
        sink: Arc<dyn RecordSink>,
        config: &RecorderConfig,
    ) -> Self {
        Self {
            ledger,
            dedup,
            aggregator,
            sink,
            in_flight: AtomicUsize::new(0),
            max_in_flight: config.max_in_flight,
            max_clock_skew: Duration::seconds(config.max_clock_skew_secs as i64),
        }
    }

    fn admit(&self) -> Option<InFlight<'_>> {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(&self.in_flight);
        (current < self.max_in_flight).then_some(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn record_impression(&self, event: AdEvent) -> AdResult<RecordOutcome> {
        self.record(AdEvent {
            kind: EventKind::Impression,
            ..event
        })
    }

    pub fn record_click(&self, event: AdEvent) -> AdResult<RecordOutcome> {
        self.record(AdEvent {
            kind: EventKind::Click,
            ..event
        })
    }

    /// Record one delivery event. Unknown campaigns and malformed events are
    /// errors; every other outcome, including rejection, is an `Ok`.
    pub fn record(&self, event: AdEvent) -> AdResult<RecordOutcome> {
        self.record_at(event, Utc::now())
    }

    /// Record an event received at `received`. The dedup window runs on
    /// receipt time, the same clock the maintenance sweep uses; the event's
    /// own timestamp only places it in analytics.
    pub fn record_at(&self, event: AdEvent, received: DateTime<Utc>) -> AdResult<RecordOutcome> {
        event.validate()?;
        if event.timestamp > received + self.max_clock_skew {
            return Err(AdError::Validation(format!(
                "event timestamp {} is ahead of receipt time",
                event.timestamp
            )));
        }
        let kind = event.kind;
        let outcome = match self.admit() {
            Some(_guard) => self.charge(event, received)?,
            None => RecordOutcome::Throttled,
        };
        metrics::counter!(outcome.metric_name(), "kind" => kind.as_str()).increment(1);
        Ok(outcome)
    }

    fn charge(&self, event: AdEvent, received: DateTime<Utc>) -> AdResult<RecordOutcome> {
        let campaign_id = event.campaign_id;
        let campaign = self.ledger.get(campaign_id)?;
        let amount = campaign.rate_for(event.kind);
        if !campaign.status.is_chargeable() {
            // A campaign completed by spend still reads as "couldn't afford".
            if campaign.status == CampaignStatus::Completed && campaign.remaining() < amount {
                return Ok(RecordOutcome::BudgetExhausted);
            }
            debug!(campaign_id = %campaign_id, status = ?campaign.status, "Event for inactive campaign not charged");
            return Ok(RecordOutcome::CampaignInactive {
                status: campaign.status,
            });
        }

        let key = dedup_key(&event);
        match self.dedup.try_reserve(key.clone(), received) {
            DedupCheck::Fresh => {}
            DedupCheck::Duplicate => return Ok(RecordOutcome::Duplicate),
            DedupCheck::Saturated => return Ok(RecordOutcome::Throttled),
        }

        let debit = match self.ledger.try_debit(campaign_id, amount) {
            Ok(debit) => debit,
            Err(e) => {
                self.dedup.release(&key);
                return Err(e);
            }
        };

        if !debit.accepted {
            self.dedup.release(&key);
            if self.ledger.mark_completed(campaign_id)? {
                info!(campaign_id = %campaign_id, "Campaign completed after rejected debit");
                self.emit_status(campaign_id, CampaignStatus::Completed);
            }
            return Ok(RecordOutcome::BudgetExhausted);
        }

        self.aggregator.ingest(&event, amount);
        self.sink.emit(DurableRecord::Charge {
            record_id: Uuid::new_v4(),
            event,
            amount,
            new_spent: debit.new_spent,
        });
        if debit.exhausted {
            self.emit_status(campaign_id, CampaignStatus::Completed);
        }

        Ok(RecordOutcome::Charged {
            amount,
            new_spent: debit.new_spent,
        })
    }

    /// Return spend for a voided event. Revenue drops in the bucket holding
    /// `at`; gross spend in analytics is untouched.
    pub fn refund(
        &self,
        campaign_id: Uuid,
        amount: Money,
        at: DateTime<Utc>,
    ) -> AdResult<RefundOutcome> {
        let outcome = self.ledger.refund(campaign_id, amount)?;
        self.aggregator.record_refund(campaign_id, outcome.applied, at);
        self.sink.emit(DurableRecord::Refund {
            record_id: Uuid::new_v4(),
            campaign_id,
            requested: outcome.requested,
            applied: outcome.applied,
            new_spent: outcome.new_spent,
            timestamp: at,
        });
        Ok(outcome)
    }

    fn emit_status(&self, campaign_id: Uuid, status: CampaignStatus) {
        self.sink.emit(DurableRecord::StatusChange {
            campaign_id,
            status,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use adserve_core::event_bus::{capture_sink, CaptureSink};
    use adserve_core::types::Campaign;

    struct Fixture {
        recorder: EventRecorder,
        ledger: Arc<CampaignLedger>,
        aggregator: Arc<AnalyticsAggregator>,
        sink: Arc<CaptureSink>,
        campaign_id: Uuid,
    }

    fn fixture(budget: i64, cpv: i64, max_in_flight: usize) -> Fixture {
        fixture_with_click(budget, cpv, cpv * 2, max_in_flight)
    }

    fn fixture_with_click(budget: i64, cpv: i64, cpc: i64, max_in_flight: usize) -> Fixture {
        let ledger = Arc::new(CampaignLedger::new());
        let start = Utc::now() - Duration::days(1);
        let campaign = ledger
            .upsert_campaign(
                Campaign::draft(
                    "owner-1",
                    "Recorder",
                    Money::from_units(budget),
                    Money::from_units(cpv),
                    Money::from_units(cpc),
                    start,
                    start + Duration::days(10),
                )
                .with_status(CampaignStatus::Active),
            )
            .unwrap();
        let aggregator = Arc::new(AnalyticsAggregator::default());
        let sink = capture_sink();
        let recorder = EventRecorder::new(
            ledger.clone(),
            Arc::new(DedupWindow::default()),
            aggregator.clone(),
            sink.clone(),
            &RecorderConfig {
                max_in_flight,
                ..Default::default()
            },
        );
        Fixture {
            recorder,
            ledger,
            aggregator,
            sink,
            campaign_id: campaign.id,
        }
    }

    fn impression(campaign_id: Uuid, viewer: usize) -> AdEvent {
        AdEvent::impression(campaign_id, Utc::now())
            .with_viewer(format!("viewer-{viewer}"))
            .with_video("vid-1")
    }

    #[test]
    fn test_budget_100_cpv_10_charges_ten_then_completes() {
        let f = fixture(100, 10, 64);
        for i in 0..10 {
            let out = f.recorder.record_impression(impression(f.campaign_id, i)).unwrap();
            assert!(out.accepted(), "impression {i} should be charged");
        }
        let out = f.recorder.record_impression(impression(f.campaign_id, 10)).unwrap();
        assert_eq!(out, RecordOutcome::BudgetExhausted);

        let status = f.ledger.status(f.campaign_id).unwrap();
        assert_eq!(status.spent, Money::from_units(100));
        assert_eq!(status.status, CampaignStatus::Completed);
        assert_eq!(f.aggregator.totals(f.campaign_id).impressions, 10);
        assert_eq!(f.sink.total_spend_delta(f.campaign_id), Money::from_units(100));
    }

    #[test]
    fn test_unaffordable_event_completes_campaign() {
        let f = fixture(15, 10, 64);
        assert!(f.recorder.record(impression(f.campaign_id, 1)).unwrap().accepted());
        assert_eq!(
            f.recorder.record(impression(f.campaign_id, 2)).unwrap(),
            RecordOutcome::BudgetExhausted
        );
        assert_eq!(
            f.ledger.get(f.campaign_id).unwrap().status,
            CampaignStatus::Completed
        );
        assert!(f.sink.records().iter().any(|r| matches!(
            r,
            DurableRecord::StatusChange { status: CampaignStatus::Completed, .. }
        )));
    }

    #[test]
    fn test_accepted_events_form_a_prefix() {
        // 50 budget, 20 per view, 5 per click.
        let f = fixture_with_click(50, 20, 5, 64);
        let outcomes: Vec<RecordOutcome> = (0..3)
            .map(|i| f.recorder.record(impression(f.campaign_id, i)).unwrap())
            .collect();
        assert!(outcomes[0].accepted() && outcomes[1].accepted());
        assert_eq!(outcomes[2], RecordOutcome::BudgetExhausted);

        // A cheaper click would still fit, but the campaign is done.
        let click = AdEvent::click(f.campaign_id, Utc::now()).with_viewer("late");
        assert!(!f.recorder.record(click).unwrap().accepted());
        assert_eq!(f.ledger.status(f.campaign_id).unwrap().spent, Money::from_units(40));
    }

    #[test]
    fn test_ended_campaign_with_budget_left_is_inactive() {
        let f = fixture(100, 10, 64);
        f.ledger.mark_completed(f.campaign_id).unwrap();
        assert_eq!(
            f.recorder.record(impression(f.campaign_id, 1)).unwrap(),
            RecordOutcome::CampaignInactive { status: CampaignStatus::Completed }
        );
    }

    #[test]
    fn test_late_event_dedups_on_receipt_time() {
        let f = fixture(100, 1, 64);
        let received = Utc::now();
        let late = AdEvent::impression(f.campaign_id, received - Duration::seconds(90))
            .with_viewer("v-late")
            .with_video("vid");

        assert!(f.recorder.record_at(late.clone(), received).unwrap().accepted());
        f.recorder.dedup.sweep(received + Duration::seconds(5));
        assert_eq!(
            f.recorder
                .record_at(late, received + Duration::seconds(5))
                .unwrap(),
            RecordOutcome::Duplicate
        );
        assert_eq!(f.ledger.status(f.campaign_id).unwrap().spent, Money::from_units(1));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let f = fixture(100, 1, 64);
        let received = Utc::now();
        let ahead = AdEvent::impression(f.campaign_id, received + Duration::hours(1)).with_viewer("v");
        assert!(matches!(
            f.recorder.record_at(ahead, received),
            Err(AdError::Validation(_))
        ));
        let slight = AdEvent::impression(f.campaign_id, received + Duration::seconds(5)).with_viewer("v");
        assert!(f.recorder.record_at(slight, received).unwrap().accepted());
        assert_eq!(f.recorder.dedup.len(), 1);
    }

    #[test]
    fn test_duplicate_charged_once() {
        let f = fixture(100, 10, 64);
        let event = impression(f.campaign_id, 7);
        assert!(f.recorder.record(event.clone()).unwrap().accepted());
        assert_eq!(f.recorder.record(event).unwrap(), RecordOutcome::Duplicate);
        assert_eq!(f.ledger.status(f.campaign_id).unwrap().spent, Money::from_units(10));
        assert_eq!(f.aggregator.totals(f.campaign_id).impressions, 1);
    }

    #[test]
    fn test_concurrent_duplicates_charged_once() {
        let f = fixture(1_000, 1, 1_024);
        let event = impression(f.campaign_id, 42);

        let charged: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    let event = event.clone();
                    let recorder = &f.recorder;
                    s.spawn(move || recorder.record(event).unwrap().accepted() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(charged, 1);
        assert_eq!(f.ledger.status(f.campaign_id).unwrap().spent, Money::from_units(1));
    }

    #[test]
    fn test_click_uses_click_rate() {
        let f = fixture(100, 3, 64);
        let click = AdEvent::click(f.campaign_id, Utc::now()).with_viewer("v");
        assert_eq!(
            f.recorder.record_click(click).unwrap(),
            RecordOutcome::Charged {
                amount: Money::from_units(6),
                new_spent: Money::from_units(6)
            }
        );
    }

    #[test]
    fn test_inactive_and_unknown_campaigns() {
        let f = fixture(100, 10, 64);
        f.ledger
            .transition(f.campaign_id, CampaignStatus::Cancelled, None)
            .unwrap();
        assert_eq!(
            f.recorder.record(impression(f.campaign_id, 1)).unwrap(),
            RecordOutcome::CampaignInactive { status: CampaignStatus::Cancelled }
        );
        assert!(matches!(
            f.recorder.record(impression(Uuid::new_v4(), 1)),
            Err(AdError::CampaignNotFound(_))
        ));
    }

    #[test]
    fn test_paused_campaign_still_charged() {
        let f = fixture(100, 10, 64);
        f.ledger
            .transition(f.campaign_id, CampaignStatus::Paused, None)
            .unwrap();
        assert!(f.recorder.record(impression(f.campaign_id, 1)).unwrap().accepted());
    }

    #[test]
    fn test_zero_in_flight_budget_throttles() {
        let f = fixture(100, 10, 0);
        assert_eq!(
            f.recorder.record(impression(f.campaign_id, 1)).unwrap(),
            RecordOutcome::Throttled
        );
        assert_eq!(f.recorder.in_flight(), 0);
        assert_eq!(f.ledger.status(f.campaign_id).unwrap().spent, Money::ZERO);
    }

    #[test]
    fn test_refund_nets_revenue_and_clamps() {
        let f = fixture(100, 10, 64);
        f.recorder.record(impression(f.campaign_id, 1)).unwrap();
        let out = f
            .recorder
            .refund(f.campaign_id, Money::from_units(25), Utc::now())
            .unwrap();
        assert!(out.clamped);
        assert_eq!(out.applied, Money::from_units(10));
        assert_eq!(out.new_spent, Money::ZERO);

        let totals = f.aggregator.totals(f.campaign_id);
        assert_eq!(totals.spend, Money::from_units(10));
        assert_eq!(totals.revenue, Money::ZERO);
        assert_eq!(f.sink.total_spend_delta(f.campaign_id), Money::ZERO);
    }
}
