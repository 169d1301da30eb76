//! Notification orchestration
//!
//! Turns lifecycle events into deliveries: preference filtering, template
//! selection, then immediate, batched or scheduled delivery. Channels are
//! notified concurrently and failures are collected, never short-circuited.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::batch::BatchAggregator;
use super::channels::{AdapterSet, OutboundMessage};
use super::delivery::Dispatcher;
use super::history::{HistoryDraft, HistoryLedger};
use super::retry::{RetryExecutor, RetryPolicy};
use super::scheduler::{Recurrence, Scheduler};
use super::templates::{resolve_template, TemplateRenderer};
use crate::config::NotificationConfig;
use crate::db::Storage;
use crate::error::{Error, Result};
use crate::incident::IncidentEvent;
use crate::models::{
    ChannelType, Incident, NotificationChannel, NotificationType, RenderedMessage,
    ScheduledNotification,
};

/// Per-event delivery summary
#[derive(Debug, Default, Clone, Serialize)]
pub struct NotifyReport {
    /// Channels delivered to immediately
    pub delivered: usize,
    /// Channels that queued the notification for a digest
    pub batched: usize,
    /// Channels skipped by state or preferences
    pub skipped: usize,
    /// `"<channel>: <error>"` per failed channel
    pub failures: Vec<String>,
}

impl NotifyReport {
    /// Fold per-channel failures into one error
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::Delivery(self.failures))
        }
    }
}

enum ChannelOutcome {
    Delivered,
    Batched,
    Skipped,
    Failed(String),
}

/// Drives notifications for incident lifecycle events
pub struct NotificationService {
    storage: Arc<dyn Storage>,
    renderer: Arc<TemplateRenderer>,
    dispatcher: Arc<Dispatcher>,
    batcher: Arc<BatchAggregator>,
    scheduler: Arc<Scheduler>,
    /// Channel types with complete global credentials
    legacy_targets: Vec<ChannelType>,
}

impl NotificationService {
    /// Wire the pipeline from configuration
    pub fn new(storage: Arc<dyn Storage>, adapters: AdapterSet, config: &NotificationConfig) -> Self {
        let renderer = Arc::new(TemplateRenderer::new(
            config.system_name.clone(),
            config.system_url.clone(),
        ));
        let ledger = Arc::new(HistoryLedger::new(storage.clone()));
        let retry = RetryExecutor::new(RetryPolicy::from(&config.retry));
        let dispatcher = Arc::new(Dispatcher::new(adapters, retry, ledger));
        let batcher = Arc::new(BatchAggregator::new(
            storage.clone(),
            dispatcher.clone(),
            config.batching.clone(),
            config.system_name.clone(),
            config.system_url.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));

        Self {
            storage,
            renderer,
            dispatcher,
            batcher,
            scheduler,
            legacy_targets: legacy_targets(config),
        }
    }

    pub fn renderer(&self) -> &Arc<TemplateRenderer> {
        &self.renderer
    }

    pub fn history(&self) -> &Arc<HistoryLedger> {
        self.dispatcher.ledger()
    }

    pub fn batcher(&self) -> &Arc<BatchAggregator> {
        &self.batcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Notify every eligible channel about `incident`
    pub async fn notify(&self, kind: NotificationType, incident: &Incident) -> Result<NotifyReport> {
        let channels = self.storage.list_channels().await?;
        if channels.is_empty() {
            return self.broadcast_legacy(kind, incident).await;
        }

        let now = Utc::now();
        let outcomes = join_all(
            channels
                .iter()
                .map(|channel| self.notify_channel(channel, kind, incident, now)),
        )
        .await;

        let mut report = NotifyReport::default();
        for (channel, outcome) in channels.iter().zip(outcomes) {
            match outcome {
                ChannelOutcome::Delivered => report.delivered += 1,
                ChannelOutcome::Batched => report.batched += 1,
                ChannelOutcome::Skipped => report.skipped += 1,
                ChannelOutcome::Failed(reason) => {
                    report.failures.push(format!("{}: {reason}", channel.name));
                }
            }
        }

        info!(
            incident_id = %incident.id,
            kind = %kind,
            delivered = report.delivered,
            batched = report.batched,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Notifications processed"
        );
        Ok(report)
    }

    /// Notify for one lifecycle event
    pub async fn handle_event(&self, event: IncidentEvent) -> Result<NotifyReport> {
        let kind = event.kind();
        let incident = event.into_incident();
        self.notify(kind, &incident).await?.into_result()
    }

    /// Consume lifecycle events until cancelled or the sender goes away
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<IncidentEvent>,
        cancel: CancellationToken,
    ) {
        info!("Notification service started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let incident_id = event.incident().id;
            if let Err(e) = self.handle_event(event).await {
                error!(incident_id = %incident_id, error = %e, "Notification delivery incomplete");
            }
        }
        info!("Notification service stopped");
    }

    async fn notify_channel(
        &self,
        channel: &NotificationChannel,
        kind: NotificationType,
        incident: &Incident,
        now: DateTime<Utc>,
    ) -> ChannelOutcome {
        if let Some(reason) = channel.skip_reason(incident.severity, now) {
            debug!(channel = %channel.name, reason = ?reason, "Channel skipped");
            return ChannelOutcome::Skipped;
        }

        let (template_id, message) = match self.render(channel, kind, incident).await {
            Ok(rendered) => rendered,
            Err(e) => return ChannelOutcome::Failed(e.to_string()),
        };

        if channel.preferences().batching_enabled {
            return match self
                .batcher
                .add(channel, kind, incident, template_id, message)
                .await
            {
                Ok(_) => ChannelOutcome::Batched,
                Err(e) => ChannelOutcome::Failed(e.to_string()),
            };
        }

        match self
            .deliver_now(channel, Some(channel.id), kind, incident, template_id, message)
            .await
        {
            Ok(()) => ChannelOutcome::Delivered,
            Err(reason) => ChannelOutcome::Failed(reason),
        }
    }

    async fn render(
        &self,
        channel: &NotificationChannel,
        kind: NotificationType,
        incident: &Incident,
    ) -> Result<(Option<Uuid>, RenderedMessage)> {
        let stored = self
            .storage
            .find_default_template(kind, channel.channel_type)
            .await?;
        let template = resolve_template(channel, kind, stored.as_ref());
        let message = self.renderer.render_for(&template, incident, &channel.name)?;
        Ok((template.template_id, message))
    }

    /// Record, then send through the retry path
    async fn deliver_now(
        &self,
        channel: &NotificationChannel,
        channel_id: Option<Uuid>,
        kind: NotificationType,
        incident: &Incident,
        template_id: Option<Uuid>,
        message: RenderedMessage,
    ) -> std::result::Result<(), String> {
        let outbound = OutboundMessage::new(&message, &channel.config);
        let record = self
            .history()
            .open(HistoryDraft {
                incident_id: incident.id,
                channel_id,
                template_id,
                kind,
                channel: channel.channel_type,
                recipient: self.dispatcher.recipient(channel.channel_type, &channel.config),
                message,
            })
            .await
            .map_err(|e| e.to_string())?;

        let report = self
            .dispatcher
            .deliver(channel.channel_type, &outbound, &[record.id])
            .await;
        report.error.map_or(Ok(()), |e| Err(e.to_string()))
    }

    /// Credentials-only mode: one message per channel type with complete
    /// global credentials
    async fn broadcast_legacy(&self, kind: NotificationType, incident: &Incident) -> Result<NotifyReport> {
        let mut report = NotifyReport::default();
        if self.legacy_targets.is_empty() {
            debug!(incident_id = %incident.id, "No channels or global credentials configured");
            return Ok(report);
        }

        for channel_type in &self.legacy_targets {
            let channel = NotificationChannel::new(format!("default-{channel_type}"), *channel_type);
            let outcome = match self.render(&channel, kind, incident).await {
                Ok((template_id, message)) => {
                    self.deliver_now(&channel, None, kind, incident, template_id, message)
                        .await
                }
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => report.failures.push(format!("{}: {reason}", channel.name)),
            }
        }

        info!(
            incident_id = %incident.id,
            kind = %kind,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Legacy broadcast processed"
        );
        Ok(report)
    }

    // === Scheduling ===

    /// Defer a notification to `scheduled_at`. The incident is snapshotted now.
    pub async fn schedule_notification(
        &self,
        incident_id: Uuid,
        channel_id: Uuid,
        kind: NotificationType,
        scheduled_at: DateTime<Utc>,
        metadata: HashMap<String, String>,
    ) -> Result<ScheduledNotification> {
        let (incident, channel) = self.schedule_target(incident_id, channel_id).await?;
        Ok(self
            .scheduler
            .schedule(incident, &channel, kind, scheduled_at, metadata))
    }

    /// Defer a recurring notification
    pub async fn schedule_recurring(
        &self,
        incident_id: Uuid,
        channel_id: Uuid,
        kind: NotificationType,
        recurrence: &Recurrence,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<ScheduledNotification>> {
        let (incident, channel) = self.schedule_target(incident_id, channel_id).await?;
        self.scheduler
            .schedule_recurring(incident, &channel, kind, recurrence, metadata)
    }

    async fn schedule_target(
        &self,
        incident_id: Uuid,
        channel_id: Uuid,
    ) -> Result<(Incident, NotificationChannel)> {
        let channel = self
            .storage
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| Error::not_found("Channel", channel_id))?;
        let incident = self
            .storage
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| Error::not_found("Incident", incident_id))?;
        Ok((incident, channel))
    }

    /// Deliver a released scheduled notification.
    ///
    /// Preferences were accepted when it was scheduled and are not
    /// re-evaluated. A deleted or disabled channel, or a template that no
    /// longer renders, leaves a `failed` history record behind.
    pub async fn dispatch_scheduled(&self, entry: &ScheduledNotification) -> Result<()> {
        let Some(channel) = self.storage.get_channel(entry.channel_id).await? else {
            self.record_scheduled_failure(entry, String::new(), "channel no longer exists")
                .await?;
            return Err(Error::not_found("Channel", entry.channel_id));
        };

        let recipient = self.dispatcher.recipient(channel.channel_type, &channel.config);
        if !channel.enabled {
            warn!(scheduled_id = %entry.id, channel = %channel.name, "Channel disabled, dropping scheduled notification");
            self.record_scheduled_failure(entry, recipient, "channel disabled")
                .await?;
            return Ok(());
        }

        let (template_id, message) = match self.render(&channel, entry.kind, &entry.incident).await {
            Ok(rendered) => rendered,
            Err(e) => {
                self.record_scheduled_failure(entry, recipient, &e.to_string())
                    .await?;
                return Err(e);
            }
        };
        self.deliver_now(&channel, Some(channel.id), entry.kind, &entry.incident, template_id, message)
            .await
            .map_err(|reason| Error::Delivery(vec![format!("{}: {reason}", channel.name)]))
    }

    async fn record_scheduled_failure(
        &self,
        entry: &ScheduledNotification,
        recipient: String,
        reason: &str,
    ) -> Result<()> {
        let record = self
            .history()
            .record_failure(
                HistoryDraft {
                    incident_id: entry.incident.id,
                    channel_id: Some(entry.channel_id),
                    template_id: None,
                    kind: entry.kind,
                    channel: entry.channel,
                    recipient,
                    message: RenderedMessage {
                        subject: format!("Scheduled {} notification", entry.kind),
                        content: String::new(),
                    },
                },
                reason,
            )
            .await?;
        debug!(scheduled_id = %entry.id, history_id = %record.id, reason, "Scheduled notification recorded as failed");
        Ok(())
    }

    /// Consume released scheduled notifications; each is delivered on its
    /// own task so a slow provider does not hold up the next one
    pub async fn run_scheduled(
        self: Arc<Self>,
        mut due: mpsc::UnboundedReceiver<ScheduledNotification>,
        cancel: CancellationToken,
    ) {
        loop {
            let entry = tokio::select! {
                _ = cancel.cancelled() => break,
                entry = due.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.dispatch_scheduled(&entry).await {
                    error!(scheduled_id = %entry.id, error = %e, "Scheduled notification failed");
                }
            });
        }
        debug!("Scheduled dispatcher stopped");
    }
}

fn legacy_targets(config: &NotificationConfig) -> Vec<ChannelType> {
    let set = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

    ChannelType::ALL
        .into_iter()
        .filter(|channel_type| match channel_type {
            ChannelType::Chat => set(&config.slack.token) && set(&config.slack.channel),
            ChannelType::Email => {
                set(&config.email.smtp_host) && set(&config.email.from) && set(&config.email.to)
            }
            ChannelType::Bot => set(&config.telegram.bot_token) && set(&config.telegram.chat_id),
        })
        .collect()
}
