//! Write-behind event writer that batches durable records into ClickHouse.
//! Submission is a non-blocking channel send; the spend path never waits on
//! the database.

use adserve_core::config::ClickHouseConfig;
use adserve_core::event_bus::{DurableRecord, PersistenceHealth, RecordSink};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 100_000;

/// One row of the `ad_events` table.
#[derive(Debug, Clone, Serialize, clickhouse::Row)]
pub struct EventRow {
    pub record_id: String,
    pub record_type: String,
    pub campaign_id: String,
    pub event_kind: Option<String>,
    pub ad_id: Option<String>,
    pub viewer_id: Option<String>,
    pub video_id: Option<String>,
    pub amount_micros: i64,
    pub new_spent_micros: i64,
    pub timestamp_ms: i64,
}

impl EventRow {
    /// Status changes are not event rows; they return `None`.
    pub fn from_record(record: &DurableRecord) -> Option<Self> {
        match record {
            DurableRecord::Charge {
                record_id,
                event,
                amount,
                new_spent,
            } => Some(Self {
                record_id: record_id.to_string(),
                record_type: "charge".to_string(),
                campaign_id: event.campaign_id.to_string(),
                event_kind: Some(event.kind.as_str().to_string()),
                ad_id: event.ad_id.map(|id| id.to_string()),
                viewer_id: event.viewer_id.clone(),
                video_id: event.video_id.clone(),
                amount_micros: amount.micros(),
                new_spent_micros: new_spent.micros(),
                timestamp_ms: event.timestamp.timestamp_millis(),
            }),
            DurableRecord::Refund {
                record_id,
                campaign_id,
                applied,
                new_spent,
                timestamp,
                ..
            } => Some(Self {
                record_id: record_id.to_string(),
                record_type: "refund".to_string(),
                campaign_id: campaign_id.to_string(),
                event_kind: None,
                ad_id: None,
                viewer_id: None,
                video_id: None,
                amount_micros: -applied.micros(),
                new_spent_micros: new_spent.micros(),
                timestamp_ms: timestamp.timestamp_millis(),
            }),
            DurableRecord::StatusChange { .. } => None,
        }
    }
}

/// ClickHouse sink with a background batch writer.
pub struct EventWriter {
    sender: mpsc::Sender<EventRow>,
    health: Arc<PersistenceHealth>,
}

impl EventWriter {
    /// Create the writer and spawn its background flush loop.
    pub async fn new(config: &ClickHouseConfig, health: Arc<PersistenceHealth>) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel::<EventRow>(CHANNEL_CAPACITY);

        let writer = BatchWriter::new(config, health.clone()).await?;
        let batch_size = config.batch_size;
        let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms);

        tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await;
        });

        info!("Event writer initialized with ClickHouse backend");

        Ok(Self { sender, health })
    }
}

impl RecordSink for EventWriter {
    fn emit(&self, record: DurableRecord) {
        let Some(row) = EventRow::from_record(&record) else {
            return;
        };
        if let Err(e) = self.sender.try_send(row) {
            metrics::counter!("persistence.dropped", "store" => "clickhouse").increment(1);
            self.health.record_dropped(1);
            warn!("Event row dropped: {}", e);
        } else {
            metrics::counter!("persistence.queued", "store" => "clickhouse").increment(1);
        }
    }
}

/// Background writer that batches rows and flushes to ClickHouse.
struct BatchWriter {
    client: clickhouse::Client,
    health: Arc<PersistenceHealth>,
}

impl BatchWriter {
    async fn new(config: &ClickHouseConfig, health: Arc<PersistenceHealth>) -> anyhow::Result<Self> {
        let client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        Self::ensure_schema(&client).await?;

        Ok(Self { client, health })
    }

    async fn ensure_schema(client: &clickhouse::Client) -> anyhow::Result<()> {
        client
            .query(
                "CREATE TABLE IF NOT EXISTS ad_events (
                    record_id String,
                    record_type LowCardinality(String),
                    campaign_id String,
                    event_kind Nullable(String),
                    ad_id Nullable(String),
                    viewer_id Nullable(String),
                    video_id Nullable(String),
                    amount_micros Int64,
                    new_spent_micros Int64,
                    timestamp_ms DateTime64(3)
                ) ENGINE = ReplacingMergeTree()
                ORDER BY (campaign_id, timestamp_ms, record_id)
                PARTITION BY toYYYYMM(timestamp_ms)",
            )
            .execute()
            .await?;

        info!("ClickHouse schema verified");
        Ok(())
    }

    async fn run(
        self,
        mut receiver: mpsc::Receiver<EventRow>,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) {
        let mut buffer: Vec<EventRow> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                maybe_row = receiver.recv() => match maybe_row {
                    Some(row) => {
                        buffer.push(row);
                        if buffer.len() >= batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        if !buffer.is_empty() {
                            self.flush(&mut buffer).await;
                        }
                        info!("Event writer channel closed, stopping");
                        return;
                    }
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }
    }

    async fn write_batch(&self, rows: &[EventRow]) -> Result<(), clickhouse::error::Error> {
        let mut insert = self.client.insert::<EventRow>("ad_events")?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await
    }

    async fn flush(&self, buffer: &mut Vec<EventRow>) {
        let count = buffer.len();
        debug!(count = count, "Flushing event batch to ClickHouse");

        match self.write_batch(buffer).await {
            Ok(()) => {
                metrics::counter!("persistence.flushed", "store" => "clickhouse").increment(count as u64);
                self.health.record_success();
                debug!(count = count, "Event batch flushed successfully");
            }
            Err(e) => {
                metrics::counter!("persistence.flush_errors", "store" => "clickhouse").increment(1);
                self.health.record_failure(format!("clickhouse: {e}"));
                error!(error = %e, count = count, "Failed to flush event batch");
            }
        }

        buffer.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use adserve_core::money::Money;
    use adserve_core::types::{AdEvent, CampaignStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_charge_row() {
        let cid = Uuid::new_v4();
        let event = AdEvent::click(cid, Utc::now()).with_viewer("viewer-9").with_video("vid-1");
        let row = EventRow::from_record(&DurableRecord::Charge {
            record_id: Uuid::new_v4(),
            event: event.clone(),
            amount: Money::from_units(2),
            new_spent: Money::from_units(12),
        })
        .unwrap();

        assert_eq!(row.record_type, "charge");
        assert_eq!(row.campaign_id, cid.to_string());
        assert_eq!(row.event_kind.as_deref(), Some("click"));
        assert_eq!(row.viewer_id.as_deref(), Some("viewer-9"));
        assert_eq!(row.amount_micros, 2_000_000);
        assert_eq!(row.timestamp_ms, event.timestamp.timestamp_millis());
    }

    #[test]
    fn test_refund_row_is_negative() {
        let row = EventRow::from_record(&DurableRecord::Refund {
            record_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            requested: Money::from_units(9),
            applied: Money::from_units(3),
            new_spent: Money::ZERO,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(row.record_type, "refund");
        assert_eq!(row.amount_micros, -3_000_000);
    }

    #[test]
    fn test_status_change_has_no_row() {
        let record = DurableRecord::StatusChange {
            campaign_id: Uuid::new_v4(),
            status: CampaignStatus::Completed,
            timestamp: Utc::now(),
        };
        assert!(EventRow::from_record(&record).is_none());
    }
}
