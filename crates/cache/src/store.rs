//! Deployment-selected spend store.

use crate::{LocalSpendStore, RedisSpendStore};
use adserve_core::event_bus::{PersistedCampaign, RecordSink};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Where persisted spend totals and campaign status live: Redis in production, process memory
/// when running with `--no-persistence` or in tests.
#[derive(Clone)]
pub enum SpendStore {
    Redis(Arc<RedisSpendStore>),
    Local(Arc<LocalSpendStore>),
}

impl SpendStore {
    pub fn local() -> Self {
        SpendStore::Local(Arc::new(LocalSpendStore::new()))
    }

    pub async fn load(&self, campaign_ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, PersistedCampaign>> {
        match self {
            SpendStore::Redis(store) => store.load(campaign_ids).await,
            SpendStore::Local(store) => Ok(store.load(campaign_ids)),
        }
    }

    /// The store as a record sink, so charges, refunds and status changes
    /// keep it current.
    pub fn sink(&self) -> Arc<dyn RecordSink> {
        match self {
            SpendStore::Redis(store) => store.clone(),
            SpendStore::Local(store) => store.clone(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            SpendStore::Redis(_) => "redis",
            SpendStore::Local(_) => "memory",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use adserve_core::event_bus::DurableRecord;
    use adserve_core::money::Money;
    use adserve_core::types::AdEvent;
    use chrono::Utc;

    #[tokio::test]
    async fn test_local_store_round_trip_through_sink() {
        let store = SpendStore::local();
        let cid = Uuid::new_v4();
        store.sink().emit(DurableRecord::Charge {
            record_id: Uuid::new_v4(),
            event: AdEvent::click(cid, Utc::now()),
            amount: Money::from_units(4),
            new_spent: Money::from_units(4),
        });

        let loaded = store.load(&[cid]).await.unwrap();
        assert_eq!(loaded.get(&cid).map(|p| p.spent), Some(Money::from_units(4)));
        assert_eq!(store.backend(), "memory");
    }
}
