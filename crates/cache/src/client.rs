//! Redis running-total spend store.
//!
//! Charges and refunds are folded into per-campaign deltas in memory and
//! applied with pipelined `INCRBY` every flush interval, so at most one
//! interval of spend is lost if the process dies. Status changes ride the
//! same pipeline as a plain `SET` of the latest status. Failed flushes keep
//! their pending writes and retry on the next tick.

use adserve_core::config::RedisConfig;
use adserve_core::event_bus::{DurableRecord, PersistedCampaign, PersistenceHealth, RecordSink};
use adserve_core::money::Money;
use adserve_core::types::CampaignStatus;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 100_000;

fn spend_key(prefix: &str, campaign_id: Uuid) -> String {
    format!("{prefix}:spend:{campaign_id}")
}

fn status_key(prefix: &str, campaign_id: Uuid) -> String {
    format!("{prefix}:status:{campaign_id}")
}

enum PendingWrite {
    Spend { campaign_id: Uuid, micros: i64 },
    Status { campaign_id: Uuid, status: CampaignStatus },
}

#[derive(Default)]
struct Pending {
    spend: HashMap<Uuid, i64>,
    status: HashMap<Uuid, CampaignStatus>,
}

impl Pending {
    fn add(&mut self, write: PendingWrite) {
        match write {
            PendingWrite::Spend { campaign_id, micros } => {
                *self.spend.entry(campaign_id).or_default() += micros;
            }
            PendingWrite::Status { campaign_id, status } => {
                self.status.insert(campaign_id, status);
            }
        }
    }
}

/// Redis-backed spend totals with a background delta flusher.
pub struct RedisSpendStore {
    conn: ConnectionManager,
    key_prefix: String,
    sender: mpsc::Sender<PendingWrite>,
    health: Arc<PersistenceHealth>,
}

impl RedisSpendStore {
    /// Connect to Redis and spawn the flusher.
    pub async fn connect(config: &RedisConfig, health: Arc<PersistenceHealth>) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let mut conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to Redis at {url}"))??;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let flusher = SpendFlusher {
            conn: conn.clone(),
            key_prefix: config.key_prefix.clone(),
            health: health.clone(),
        };
        let interval = Duration::from_millis(config.flush_interval_ms);
        tokio::spawn(async move {
            flusher.run(receiver, interval).await;
        });

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            sender,
            health,
        })
    }

    /// Persisted spend and status for the given campaigns; campaigns with
    /// neither are omitted.
    pub async fn load(&self, campaign_ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, PersistedCampaign>> {
        if campaign_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = campaign_ids
            .iter()
            .map(|id| spend_key(&self.key_prefix, *id))
            .chain(campaign_ids.iter().map(|id| status_key(&self.key_prefix, *id)))
            .collect();

        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        let (spend, status) = values.split_at(campaign_ids.len().min(values.len()));

        let mut loaded = HashMap::new();
        for (i, campaign_id) in campaign_ids.iter().enumerate() {
            let spent = spend.get(i).cloned().flatten();
            let last_status = status.get(i).cloned().flatten();
            if spent.is_none() && last_status.is_none() {
                continue;
            }
            let spent = match spent {
                Some(raw) => Money::from_micros(raw.parse::<i64>()?),
                None => Money::ZERO,
            };
            let status = match last_status {
                Some(raw) => Some(raw.parse::<CampaignStatus>()?),
                None => None,
            };
            loaded.insert(*campaign_id, PersistedCampaign { spent, status });
        }
        debug!(requested = campaign_ids.len(), found = loaded.len(), "Loaded persisted campaign state");
        Ok(loaded)
    }
}

impl RecordSink for RedisSpendStore {
    fn emit(&self, record: DurableRecord) {
        let write = match record {
            DurableRecord::StatusChange { campaign_id, status, .. } => {
                PendingWrite::Status { campaign_id, status }
            }
            other => {
                let delta = other.spend_delta();
                if delta.is_zero() {
                    return;
                }
                PendingWrite::Spend {
                    campaign_id: other.campaign_id(),
                    micros: delta.micros(),
                }
            }
        };
        if let Err(e) = self.sender.try_send(write) {
            metrics::counter!("persistence.dropped", "store" => "redis").increment(1);
            self.health.record_dropped(1);
            warn!("Campaign state write dropped: {}", e);
        }
    }
}

struct SpendFlusher {
    conn: ConnectionManager,
    key_prefix: String,
    health: Arc<PersistenceHealth>,
}

impl SpendFlusher {
    async fn run(mut self, mut receiver: mpsc::Receiver<PendingWrite>, interval: Duration) {
        let mut pending = Pending::default();
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                maybe_write = receiver.recv() => match maybe_write {
                    Some(write) => pending.add(write),
                    None => {
                        self.flush(&mut pending).await;
                        info!("Spend flusher channel closed, stopping");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&mut pending).await;
                }
            }
        }
    }

    async fn flush(&mut self, pending: &mut Pending) {
        pending.spend.retain(|_, micros| *micros != 0);
        if pending.spend.is_empty() && pending.status.is_empty() {
            return;
        }

        let mut pipe = redis::pipe();
        for (campaign_id, micros) in pending.spend.iter() {
            pipe.cmd("INCRBY")
                .arg(spend_key(&self.key_prefix, *campaign_id))
                .arg(*micros)
                .ignore();
        }
        for (campaign_id, status) in pending.status.iter() {
            pipe.cmd("SET")
                .arg(status_key(&self.key_prefix, *campaign_id))
                .arg(status.as_str())
                .ignore();
        }

        let writes = pending.spend.len() + pending.status.len();
        match pipe.query_async::<_, ()>(&mut self.conn).await {
            Ok(()) => {
                metrics::counter!("persistence.flushed", "store" => "redis").increment(writes as u64);
                self.health.record_success();
                debug!(
                    spend = pending.spend.len(),
                    status = pending.status.len(),
                    "Campaign state flushed"
                );
                pending.spend.clear();
                pending.status.clear();
            }
            Err(e) => {
                metrics::counter!("persistence.flush_errors", "store" => "redis").increment(1);
                self.health.record_failure(format!("redis: {e}"));
                error!(error = %e, writes, "Failed to flush campaign state, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            spend_key("adserve", id),
            "adserve:spend:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            status_key("adserve", id),
            "adserve:status:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_pending_folds_deltas_and_keeps_latest_status() {
        let id = Uuid::new_v4();
        let mut pending = Pending::default();
        pending.add(PendingWrite::Spend { campaign_id: id, micros: 5 });
        pending.add(PendingWrite::Spend { campaign_id: id, micros: -2 });
        pending.add(PendingWrite::Status { campaign_id: id, status: CampaignStatus::Paused });
        pending.add(PendingWrite::Status { campaign_id: id, status: CampaignStatus::Cancelled });

        assert_eq!(pending.spend[&id], 3);
        assert_eq!(pending.status[&id], CampaignStatus::Cancelled);
    }
}
