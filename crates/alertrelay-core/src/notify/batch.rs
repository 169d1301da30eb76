//! Batch aggregation
//!
//! Notifications for channels with batching enabled are collected per
//! `(channel, kind)` bucket. A bucket is removed from the table before it
//! is flushed, so every item lands in exactly one digest.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::channels::OutboundMessage;
use super::delivery::Dispatcher;
use super::history::HistoryDraft;
use crate::config::BatchingConfig;
use crate::db::Storage;
use crate::error::Result;
use crate::models::{
    BatchStatus, Incident, NotificationBatch, NotificationChannel, NotificationType,
    RenderedMessage,
};

/// Entries listed in a digest before the overflow line
const DIGEST_ENTRIES: usize = 10;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

type BucketKey = (Uuid, NotificationType);

/// One queued notification
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub history_id: Uuid,
    pub incident: Incident,
    /// Per-item rendering, used when the bucket holds a single entry
    pub message: RenderedMessage,
}

struct Bucket {
    channel: NotificationChannel,
    kind: NotificationType,
    entries: Vec<BatchEntry>,
    opened_at: DateTime<Utc>,
    timeout: Duration,
}

impl Bucket {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.opened_at)
            .to_std()
            .is_ok_and(|age| age >= self.timeout)
    }
}

/// Collects batched notifications and flushes them as digests
pub struct BatchAggregator {
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
    storage: Arc<dyn Storage>,
    dispatcher: Arc<Dispatcher>,
    config: BatchingConfig,
    system_name: String,
    system_url: String,
}

impl BatchAggregator {
    pub fn new(
        storage: Arc<dyn Storage>,
        dispatcher: Arc<Dispatcher>,
        config: BatchingConfig,
        system_name: impl Into<String>,
        system_url: impl Into<String>,
    ) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            storage,
            dispatcher,
            config,
            system_name: system_name.into(),
            system_url: system_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Queue a notification.
    ///
    /// A pending history record is stored first. If the bucket reaches its
    /// size limit it is flushed before returning, and the batch is returned.
    pub async fn add(
        &self,
        channel: &NotificationChannel,
        kind: NotificationType,
        incident: &Incident,
        template_id: Option<Uuid>,
        message: RenderedMessage,
    ) -> Result<Option<NotificationBatch>> {
        let record = self
            .dispatcher
            .ledger()
            .open(HistoryDraft {
                incident_id: incident.id,
                channel_id: Some(channel.id),
                template_id,
                kind,
                channel: channel.channel_type,
                recipient: self.dispatcher.recipient(channel.channel_type, &channel.config),
                message: message.clone(),
            })
            .await?;

        let preferences = channel.preferences();
        let max_size = match preferences.max_batch_size {
            0 => self.config.max_batch_size.max(1),
            n => n,
        };
        let timeout = preferences
            .batching_interval
            .unwrap_or(self.config.batch_timeout);

        let full = {
            let mut buckets = self.buckets.lock();
            let bucket = buckets.entry((channel.id, kind)).or_insert_with(|| Bucket {
                channel: channel.clone(),
                kind,
                entries: Vec::new(),
                opened_at: Utc::now(),
                timeout,
            });
            bucket.entries.push(BatchEntry {
                history_id: record.id,
                incident: incident.clone(),
                message,
            });
            debug!(
                channel = %channel.name,
                kind = %kind,
                size = bucket.entries.len(),
                "Notification queued for batching"
            );

            if bucket.entries.len() >= max_size {
                buckets.remove(&(channel.id, kind))
            } else {
                None
            }
        };

        match full {
            Some(bucket) => self.flush(bucket).await.map(Some),
            None => Ok(None),
        }
    }

    /// Queued entries across all buckets
    pub fn pending(&self) -> usize {
        self.buckets.lock().values().map(|b| b.entries.len()).sum()
    }

    /// Flush every bucket older than its timeout, one after the other
    pub async fn flush_expired(&self, now: DateTime<Utc>) -> Vec<NotificationBatch> {
        let mut flushed = Vec::new();
        for bucket in self.take_expired(now) {
            match self.flush(bucket).await {
                Ok(batch) => flushed.push(batch),
                Err(e) => error!(error = %e, "Batch flush failed"),
            }
        }
        flushed
    }

    /// Flush everything regardless of age
    pub async fn flush_all(&self) -> Vec<NotificationBatch> {
        let buckets: Vec<Bucket> = self.buckets.lock().drain().map(|(_, b)| b).collect();
        let mut flushed = Vec::new();
        for bucket in buckets {
            match self.flush(bucket).await {
                Ok(batch) => flushed.push(batch),
                Err(e) => error!(error = %e, "Batch flush failed"),
            }
        }
        flushed
    }

    /// Periodic sweep. Each tick flushes expired buckets on its own task;
    /// remaining buckets are drained on cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.config.sweep_interval, "Batch sweep started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let pending = self.pending();
                    let drained = self.flush_all().await;
                    info!(pending, batches = drained.len(), "Batch sweep stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if self.pending() == 0 {
                continue;
            }
            let this = Arc::clone(&self);
            let now = Utc::now();
            tokio::spawn(async move {
                let flushed = this.flush_expired(now).await;
                if !flushed.is_empty() {
                    debug!(batches = flushed.len(), "Expired batches flushed");
                }
            });
        }
    }

    fn take_expired(&self, now: DateTime<Utc>) -> Vec<Bucket> {
        let mut buckets = self.buckets.lock();
        let expired: Vec<BucketKey> = buckets
            .iter()
            .filter(|(_, bucket)| bucket.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| buckets.remove(&key))
            .collect()
    }

    async fn flush(&self, bucket: Bucket) -> Result<NotificationBatch> {
        let ids: Vec<Uuid> = bucket.entries.iter().map(|e| e.history_id).collect();
        let mut batch = NotificationBatch {
            id: Uuid::new_v4(),
            channel_id: bucket.channel.id,
            kind: bucket.kind,
            count: ids.len(),
            notifications: ids.clone(),
            status: BatchStatus::Open,
            created_at: bucket.opened_at,
            processed_at: None,
        };
        if let Err(e) = self.storage.create_batch(&batch).await {
            self.fail_entries(&ids, &format!("batch not recorded: {e}")).await;
            return Err(e);
        }

        let message = match bucket.entries.as_slice() {
            [single] => single.message.clone(),
            entries => self.digest(bucket.kind, entries),
        };
        for id in &ids {
            if let Err(e) = self.dispatcher.ledger().assign_batch(*id, batch.id, &message).await {
                error!(history_id = %id, batch_id = %batch.id, error = %e, "Failed to link record to batch");
            }
        }
        let outbound = OutboundMessage::new(&message, &bucket.channel.config);
        let report = self
            .dispatcher
            .deliver(bucket.channel.channel_type, &outbound, &ids)
            .await;

        batch.status = if report.is_success() {
            BatchStatus::Processed
        } else {
            BatchStatus::Failed
        };
        batch.processed_at = Some(Utc::now());
        self.storage.update_batch(&batch).await?;

        info!(
            batch_id = %batch.id,
            channel = %bucket.channel.name,
            kind = %bucket.kind,
            count = batch.count,
            status = ?batch.status,
            "Batch flushed"
        );
        Ok(batch)
    }

    /// The bucket is gone, so its records will never be attempted
    async fn fail_entries(&self, ids: &[Uuid], reason: &str) {
        for id in ids {
            if let Err(e) = self.dispatcher.ledger().mark_failed(*id, 0, reason).await {
                error!(history_id = %id, error = %e, "Failed to close batched record");
            }
        }
    }

    /// Summary message for several queued notifications
    pub fn digest(&self, kind: NotificationType, entries: &[BatchEntry]) -> RenderedMessage {
        let n = entries.len();
        let header = match kind {
            NotificationType::IncidentCreated => format!("{n} new incidents"),
            NotificationType::IncidentAcknowledged => format!("{n} incidents acknowledged"),
            NotificationType::IncidentResolved => format!("{n} incidents resolved"),
            NotificationType::IncidentAssigned => format!("{n} incidents reassigned"),
        };

        let mut content = format!("{header}\n\n");
        for entry in entries.iter().take(DIGEST_ENTRIES) {
            let incident = &entry.incident;
            let _ = writeln!(
                content,
                "• [{}] {} ({})",
                incident.severity.as_str().to_uppercase(),
                incident.title,
                incident.status
            );
        }
        if n > DIGEST_ENTRIES {
            let _ = writeln!(content, "…and {} more", n - DIGEST_ENTRIES);
        }
        let _ = write!(content, "\n{}/incidents", self.system_url);

        RenderedMessage {
            subject: format!("[{}] {header}", self.system_name),
            content,
        }
    }
}
