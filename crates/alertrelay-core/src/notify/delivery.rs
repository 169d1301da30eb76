//! Send-with-retry path shared by immediate, batched and scheduled delivery

use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::channels::{AdapterSet, DeliveryError, OutboundMessage};
use super::history::HistoryLedger;
use super::retry::RetryExecutor;
use crate::models::ChannelType;

/// How a delivery ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Attempts made
    pub attempts: u32,
    /// Final error, if delivery failed
    pub error: Option<DeliveryError>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs an adapter under the retry policy and keeps history records in step
pub struct Dispatcher {
    adapters: AdapterSet,
    retry: RetryExecutor,
    ledger: Arc<HistoryLedger>,
}

impl Dispatcher {
    pub fn new(adapters: AdapterSet, retry: RetryExecutor, ledger: Arc<HistoryLedger>) -> Self {
        Self {
            adapters,
            retry,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<HistoryLedger> {
        &self.ledger
    }

    /// Target a channel config resolves to
    pub fn recipient(&self, channel_type: ChannelType, config: &HashMap<String, String>) -> String {
        self.adapters.get(channel_type).recipient(config)
    }

    /// Deliver one message on behalf of every record in `history_ids`.
    ///
    /// The records must already exist in `pending`. Retries mark them
    /// `retrying`; the final outcome marks them `sent` or `failed`.
    pub async fn deliver(
        &self,
        channel_type: ChannelType,
        message: &OutboundMessage,
        history_ids: &[Uuid],
    ) -> DeliveryReport {
        let adapter = self.adapters.get(channel_type);
        let ledger = self.ledger.as_ref();

        let outcome = self
            .retry
            .execute(
                |_| adapter.send(message),
                move |attempt, error| async move {
                    for id in history_ids {
                        if let Err(e) = ledger.mark_retrying(*id, attempt, &error).await {
                            warn!(history_id = %id, error = %e, "Failed to record retry");
                        }
                    }
                },
            )
            .await;

        let attempts = outcome.attempts;
        let status = match &outcome.result {
            Ok(()) => {
                for id in history_ids {
                    if let Err(e) = self.ledger.mark_sent(*id, attempts).await {
                        warn!(history_id = %id, error = %e, "Failed to record delivery");
                    }
                }
                debug!(channel = %channel_type, attempts, "Notification delivered");
                "sent"
            }
            Err(error) => {
                let text = error.to_string();
                for id in history_ids {
                    if let Err(e) = self.ledger.mark_failed(*id, attempts, &text).await {
                        warn!(history_id = %id, error = %e, "Failed to record delivery failure");
                    }
                }
                warn!(channel = %channel_type, attempts, error = %error, "Notification delivery failed");
                "failed"
            }
        };

        counter!(
            "alertrelay_notifications_total",
            "channel" => channel_type.as_str(),
            "status" => status
        )
        .increment(history_ids.len() as u64);

        DeliveryReport {
            attempts,
            error: outcome.result.err(),
        }
    }
}
