//! In-process spend store backed by DashMap. Used when running without
//! Redis and in tests; totals do not survive the process.

use adserve_core::event_bus::{DurableRecord, PersistedCampaign, RecordSink};
use adserve_core::money::Money;
use adserve_core::types::CampaignStatus;
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct LocalSpendStore {
    totals: DashMap<Uuid, Money>,
    statuses: DashMap<Uuid, CampaignStatus>,
}

impl LocalSpendStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored spend and status for the given campaigns; unknown ids are omitted.
    pub fn load(&self, campaign_ids: &[Uuid]) -> HashMap<Uuid, PersistedCampaign> {
        campaign_ids
            .iter()
            .filter_map(|id| {
                let spent = self.totals.get(id).map(|t| *t);
                let status = self.statuses.get(id).map(|s| *s);
                (spent.is_some() || status.is_some()).then(|| {
                    (
                        *id,
                        PersistedCampaign {
                            spent: spent.unwrap_or_default(),
                            status,
                        },
                    )
                })
            })
            .collect()
    }

    pub fn total(&self, campaign_id: Uuid) -> Money {
        self.totals.get(&campaign_id).map(|t| *t).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

impl RecordSink for LocalSpendStore {
    fn emit(&self, record: DurableRecord) {
        if let DurableRecord::StatusChange { campaign_id, status, .. } = record {
            self.statuses.insert(campaign_id, status);
            return;
        }
        let delta = record.spend_delta();
        if delta.is_zero() {
            return;
        }
        *self.totals.entry(record.campaign_id()).or_default() += delta;
    }
}
