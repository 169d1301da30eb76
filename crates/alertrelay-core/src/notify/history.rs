//! Notification history ledger
//!
//! One record per delivery context. A record is written as `pending`
//! before any attempt and only moves forward afterwards.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Storage;
use crate::error::{Error, Result};
use crate::models::{
    ChannelType, HistoryFilter, NotificationHistory, NotificationStatus, NotificationType,
    RenderedMessage,
};

/// Fields of a record about to be opened
#[derive(Debug, Clone)]
pub struct HistoryDraft {
    pub incident_id: Uuid,
    pub channel_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub kind: NotificationType,
    pub channel: ChannelType,
    pub recipient: String,
    pub message: RenderedMessage,
}

/// Status bookkeeping over the history table
pub struct HistoryLedger {
    storage: Arc<dyn Storage>,
}

impl HistoryLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist a new `pending` record
    pub async fn open(&self, draft: HistoryDraft) -> Result<NotificationHistory> {
        let now = Utc::now();
        let record = NotificationHistory {
            id: Uuid::new_v4(),
            incident_id: draft.incident_id,
            channel_id: draft.channel_id,
            template_id: draft.template_id,
            kind: draft.kind,
            channel: draft.channel,
            recipient: draft.recipient,
            subject: draft.message.subject,
            content: draft.message.content,
            status: NotificationStatus::Pending,
            error_msg: None,
            attempts: 0,
            batch_id: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.create_history(&record).await?;
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<NotificationHistory> {
        self.storage
            .get_history(id)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))
    }

    pub async fn list(&self, filter: &HistoryFilter) -> Result<Vec<NotificationHistory>> {
        self.storage.list_history(filter).await
    }

    /// A retryable attempt failed and another one follows
    pub async fn mark_retrying(&self, id: Uuid, attempts: u32, error: &str) -> Result<NotificationHistory> {
        self.transition(id, NotificationStatus::Retrying, |record| {
            record.attempts = attempts;
            record.error_msg = Some(error.to_string());
        })
        .await
    }

    /// Provider accepted the message
    pub async fn mark_sent(&self, id: Uuid, attempts: u32) -> Result<NotificationHistory> {
        self.transition(id, NotificationStatus::Sent, |record| {
            record.attempts = attempts;
            record.error_msg = None;
            record.sent_at = Some(Utc::now());
        })
        .await
    }

    /// Provider confirmed delivery
    pub async fn mark_delivered(&self, id: Uuid) -> Result<NotificationHistory> {
        self.transition(id, NotificationStatus::Delivered, |_| {}).await
    }

    /// Gave up
    pub async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str) -> Result<NotificationHistory> {
        self.transition(id, NotificationStatus::Failed, |record| {
            record.attempts = attempts;
            record.error_msg = Some(error.to_string());
        })
        .await
    }

    /// Store a record that never reached an adapter, already `failed`
    pub async fn record_failure(&self, draft: HistoryDraft, reason: &str) -> Result<NotificationHistory> {
        let record = self.open(draft).await?;
        self.mark_failed(record.id, 0, reason).await
    }

    /// Link a pending record to the batch that carries it. The record's
    /// subject and content become what is actually sent.
    pub async fn assign_batch(&self, id: Uuid, batch_id: Uuid, sent: &RenderedMessage) -> Result<()> {
        let mut record = self.get(id).await?;
        record.batch_id = Some(batch_id);
        record.subject.clone_from(&sent.subject);
        record.content.clone_from(&sent.content);
        record.updated_at = Utc::now();
        self.storage.update_history(&record).await
    }

    async fn transition<F>(&self, id: Uuid, next: NotificationStatus, apply: F) -> Result<NotificationHistory>
    where
        F: FnOnce(&mut NotificationHistory) + Send,
    {
        let mut record = self.get(id).await?;
        if !record.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: format!("{:?}", record.status).to_lowercase(),
                to: format!("{next:?}").to_lowercase(),
            });
        }

        record.status = next;
        apply(&mut record);
        record.updated_at = Utc::now();
        self.storage.update_history(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStorage;

    fn draft() -> HistoryDraft {
        HistoryDraft {
            incident_id: Uuid::new_v4(),
            channel_id: Some(Uuid::new_v4()),
            template_id: None,
            kind: NotificationType::IncidentCreated,
            channel: ChannelType::Chat,
            recipient: "#ops".to_string(),
            message: RenderedMessage {
                subject: "s".to_string(),
                content: "c".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_retry_path() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStorage::new()));
        let record = ledger.open(draft()).await.unwrap();
        assert_eq!(record.status, NotificationStatus::Pending);

        ledger.mark_retrying(record.id, 1, "timeout").await.unwrap();
        ledger.mark_retrying(record.id, 2, "timeout").await.unwrap();
        let failed = ledger.mark_failed(record.id, 3, "timeout").await.unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.error_msg.as_deref(), Some("timeout"));
        assert!(failed.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_terminal_records_do_not_move() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStorage::new()));
        let record = ledger.open(draft()).await.unwrap();

        let sent = ledger.mark_sent(record.id, 1).await.unwrap();
        assert!(sent.sent_at.is_some());

        let err = ledger.mark_failed(record.id, 2, "late").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        ledger.mark_delivered(record.id).await.unwrap();
        assert!(ledger.mark_sent(record.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_without_attempts() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStorage::new()));
        let record = ledger.record_failure(draft(), "channel disabled").await.unwrap();

        let stored = ledger.get(record.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.error_msg.as_deref(), Some("channel disabled"));
    }
}
