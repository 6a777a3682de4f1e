//! Durable-record bus: trait for handing charge and refund records to the
//! write-behind persistence layer without blocking the spend path.
//!
//! The recorder holds an `Arc<dyn RecordSink>`; production wiring fans the
//! records out to ClickHouse (event rows) and Redis (running spend totals).

use crate::money::Money;
use crate::types::{AdEvent, CampaignStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A fact the persistence collaborator must eventually store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum DurableRecord {
    Charge {
        record_id: Uuid,
        event: AdEvent,
        amount: Money,
        new_spent: Money,
    },
    Refund {
        record_id: Uuid,
        campaign_id: Uuid,
        requested: Money,
        applied: Money,
        new_spent: Money,
        timestamp: DateTime<Utc>,
    },
    StatusChange {
        campaign_id: Uuid,
        status: CampaignStatus,
        timestamp: DateTime<Utc>,
    },
}

impl DurableRecord {
    pub fn campaign_id(&self) -> Uuid {
        match self {
            DurableRecord::Charge { event, .. } => event.campaign_id,
            DurableRecord::Refund { campaign_id, .. } => *campaign_id,
            DurableRecord::StatusChange { campaign_id, .. } => *campaign_id,
        }
    }

    /// Signed change this record applies to the campaign's persisted spend total.
    pub fn spend_delta(&self) -> Money {
        match self {
            DurableRecord::Charge { amount, .. } => *amount,
            DurableRecord::Refund { applied, .. } => Money::from_micros(-applied.micros()),
            DurableRecord::StatusChange { .. } => Money::ZERO,
        }
    }
}

/// What the persistence collaborator holds for one campaign: its running
/// spend total and the last lifecycle status it was told about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCampaign {
    pub spent: Money,
    /// `None` when no status change was ever stored.
    pub status: Option<CampaignStatus>,
}

/// Implementations must not block: they queue and return.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: DurableRecord);
}

/// No-op sink for tests and in-memory deployments.
pub struct NoOpSink;

impl RecordSink for NoOpSink {
    fn emit(&self, _record: DurableRecord) {}
}

/// In-memory sink that captures records for testing.
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<DurableRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DurableRecord> {
        self.records.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn total_spend_delta(&self, campaign_id: Uuid) -> Money {
        self.records
            .lock()
            .iter()
            .filter(|r| r.campaign_id() == campaign_id)
            .map(DurableRecord::spend_delta)
            .sum()
    }
}

impl RecordSink for CaptureSink {
    fn emit(&self, record: DurableRecord) {
        self.records.lock().push(record);
    }
}

/// Forwards every record to each inner sink.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn RecordSink>>) -> Self {
        Self { sinks }
    }
}

impl RecordSink for FanoutSink {
    fn emit(&self, record: DurableRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(record.clone());
            }
            last.emit(record);
        }
    }
}

pub fn noop_sink() -> Arc<dyn RecordSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

/// Shared flag raised by the write-behind writers when the persistence
/// collaborator is failing. Serving keeps going; operators are alerted.
#[derive(Default)]
pub struct PersistenceHealth {
    degraded: AtomicBool,
    dropped: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceStatus {
    pub degraded: bool,
    pub dropped_records: u64,
    pub failed_flushes: u64,
    pub last_error: Option<String>,
}

impl PersistenceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        self.degraded.store(true, Ordering::Release);
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.into());
    }

    pub fn record_dropped(&self, count: u64) {
        self.degraded.store(true, Ordering::Release);
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Called after a successful flush.
    pub fn record_success(&self) {
        self.degraded.store(false, Ordering::Release);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PersistenceStatus {
        PersistenceStatus {
            degraded: self.is_degraded(),
            dropped_records: self.dropped.load(Ordering::Relaxed),
            failed_flushes: self.failures.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}
