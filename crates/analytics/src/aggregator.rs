//! Time-bucketed rollups of charged events, per campaign, per hour and day.
//!
//! Buckets are only ever merge-incremented. The recorder deduplicates before
//! calling `ingest`, so every call here is exactly one chargeable event.

use adserve_core::config::AnalyticsConfig;
use adserve_core::error::{AdError, AdResult};
use adserve_core::money::Money;
use adserve_core::types::{AdEvent, AnalyticsBucket, EventKind, Granularity};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const GRANULARITIES: [Granularity; 2] = [Granularity::Hour, Granularity::Day];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    campaign_id: Uuid,
    granularity: Granularity,
    period_start: DateTime<Utc>,
}

/// Lifetime totals for one campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignTotals {
    pub campaign_id: Uuid,
    pub impressions: u64,
    pub clicks: u64,
    pub spend: Money,
    pub revenue: Money,
    pub ctr: f64,
}

pub struct AnalyticsAggregator {
    buckets: DashMap<BucketKey, AnalyticsBucket>,
    max_buckets_per_query: usize,
}

impl AnalyticsAggregator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            max_buckets_per_query: config.max_buckets_per_query,
        }
    }

    fn key(campaign_id: Uuid, granularity: Granularity, ts: DateTime<Utc>) -> BucketKey {
        BucketKey {
            campaign_id,
            granularity,
            period_start: granularity.floor(ts),
        }
    }

    fn merge(&self, campaign_id: Uuid, ts: DateTime<Utc>, apply: impl Fn(&mut AnalyticsBucket)) {
        for granularity in GRANULARITIES {
            let key = Self::key(campaign_id, granularity, ts);
            let mut bucket = self
                .buckets
                .entry(key)
                .or_insert_with(|| AnalyticsBucket::empty(campaign_id, key.period_start, granularity));
            apply(bucket.value_mut());
            bucket.refresh_ctr();
        }
    }

    /// Count one charged event at its own timestamp.
    pub fn ingest(&self, event: &AdEvent, amount: Money) {
        self.merge(event.campaign_id, event.timestamp, |bucket| {
            match event.kind {
                EventKind::Impression => bucket.impressions += 1,
                EventKind::Click => bucket.clicks += 1,
            }
            bucket.spend += amount;
            bucket.revenue += amount;
        });
        metrics::counter!("analytics.ingested", "kind" => event.kind.as_str()).increment(1);
    }

    /// Net a refund out of revenue in the bucket containing `at`; gross spend is kept.
    pub fn record_refund(&self, campaign_id: Uuid, amount: Money, at: DateTime<Utc>) {
        if amount.is_zero() {
            return;
        }
        let negated = Money::from_micros(-amount.micros());
        self.merge(campaign_id, at, |bucket| bucket.revenue += negated);
    }

    /// Continuous series of buckets whose period starts in
    /// `[floor(start), end)`. Periods without events come back zero-filled.
    pub fn query(
        &self,
        campaign_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> AdResult<Vec<AnalyticsBucket>> {
        if end <= start {
            return Err(AdError::Validation(
                "analytics range end must be after start".to_string(),
            ));
        }

        let step = granularity.step();
        let first = granularity.floor(start);
        let periods = ((end - first).num_seconds() + step.num_seconds() - 1) / step.num_seconds();
        if periods as usize > self.max_buckets_per_query {
            return Err(AdError::Validation(format!(
                "analytics range spans {periods} buckets, limit is {}",
                self.max_buckets_per_query
            )));
        }

        let mut series = Vec::with_capacity(periods as usize);
        let mut period_start = first;
        while period_start < end {
            let key = BucketKey {
                campaign_id,
                granularity,
                period_start,
            };
            let bucket = self
                .buckets
                .get(&key)
                .map(|b| b.value().clone())
                .unwrap_or_else(|| AnalyticsBucket::empty(campaign_id, period_start, granularity));
            series.push(bucket);
            period_start += step;
        }
        Ok(series)
    }

    /// Net revenue across `campaign_ids` for hours starting in `[floor(start), end)`.
    pub fn revenue(
        &self,
        campaign_ids: &[Uuid],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AdResult<Money> {
        if end <= start {
            return Err(AdError::Validation(
                "revenue range end must be after start".to_string(),
            ));
        }
        let first = Granularity::Hour.floor(start);
        Ok(self
            .buckets
            .iter()
            .filter(|b| {
                let key = b.key();
                key.granularity == Granularity::Hour
                    && key.period_start >= first
                    && key.period_start < end
                    && campaign_ids.contains(&key.campaign_id)
            })
            .map(|b| b.value().revenue)
            .sum())
    }

    pub fn totals(&self, campaign_id: Uuid) -> CampaignTotals {
        let mut totals = CampaignTotals {
            campaign_id,
            ..Default::default()
        };
        for bucket in self.buckets.iter().filter(|b| {
            b.key().campaign_id == campaign_id && b.key().granularity == Granularity::Day
        }) {
            totals.impressions += bucket.impressions;
            totals.clicks += bucket.clicks;
            totals.spend += bucket.spend;
            totals.revenue += bucket.revenue;
        }
        if totals.impressions > 0 {
            totals.ctr = totals.clicks as f64 / totals.impressions as f64;
        }
        totals
    }
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(&AnalyticsConfig::default())
    }
}
