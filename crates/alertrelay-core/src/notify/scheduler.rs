//! Deferred notifications
//!
//! The scheduler only owns pending entries. A due entry is removed from the
//! table and handed to the dispatcher side over a channel, so cancelling
//! it afterwards reports not-found.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::models::{
    Incident, NotificationChannel, NotificationType, ScheduledNotification, ScheduledStatus,
};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Recurrence of a scheduled notification.
///
/// Expanded eagerly into `start + k * interval`; at least one of
/// `max_occurrences` and `end_time` must bound it.
#[derive(Debug, Clone, Deserialize)]
pub struct Recurrence {
    pub start: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub max_occurrences: Option<usize>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Pending scheduled notifications keyed by ID
pub struct Scheduler {
    entries: RwLock<HashMap<Uuid, ScheduledNotification>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Schedule a one-shot notification
    pub fn schedule(
        &self,
        incident: Incident,
        channel: &NotificationChannel,
        kind: NotificationType,
        scheduled_at: DateTime<Utc>,
        metadata: HashMap<String, String>,
    ) -> ScheduledNotification {
        let entry = ScheduledNotification {
            id: Uuid::new_v4(),
            incident,
            channel_id: channel.id,
            channel: channel.channel_type,
            kind,
            scheduled_at,
            status: ScheduledStatus::Pending,
            metadata,
            created_at: Utc::now(),
        };
        self.entries.write().insert(entry.id, entry.clone());

        debug!(scheduled_id = %entry.id, at = %scheduled_at, kind = %kind, "Notification scheduled");
        entry
    }

    /// Expand a recurrence into discrete entries.
    ///
    /// Expansion never exceeds the configured ceiling, whatever
    /// `max_occurrences` asks for.
    pub fn schedule_recurring(
        &self,
        incident: Incident,
        channel: &NotificationChannel,
        kind: NotificationType,
        recurrence: &Recurrence,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<ScheduledNotification>> {
        if recurrence.interval.is_zero() {
            return Err(Error::validation("recurrence interval must be positive"));
        }
        if recurrence.max_occurrences.is_none() && recurrence.end_time.is_none() {
            return Err(Error::validation(
                "recurrence needs max_occurrences or end_time",
            ));
        }
        let step = chrono::Duration::from_std(recurrence.interval)
            .map_err(|_| Error::validation("recurrence interval is too large"))?;

        let ceiling = self.config.max_occurrences;
        let limit = recurrence.max_occurrences.map_or(ceiling, |n| n.min(ceiling));
        let series_id = Uuid::new_v4();
        let created_at = Utc::now();

        let mut scheduled = Vec::new();
        let mut at = Some(recurrence.start);
        while let Some(current) = at {
            if scheduled.len() >= limit || recurrence.end_time.is_some_and(|end| current > end) {
                break;
            }

            let mut entry_metadata = metadata.clone();
            entry_metadata.insert("series_id".to_string(), series_id.to_string());
            entry_metadata.insert("occurrence".to_string(), scheduled.len().to_string());

            scheduled.push(ScheduledNotification {
                id: Uuid::new_v4(),
                incident: incident.clone(),
                channel_id: channel.id,
                channel: channel.channel_type,
                kind,
                scheduled_at: current,
                status: ScheduledStatus::Pending,
                metadata: entry_metadata,
                created_at,
            });
            at = current.checked_add_signed(step);
        }

        if scheduled.is_empty() {
            return Err(Error::validation("recurrence produces no occurrences"));
        }

        {
            let mut entries = self.entries.write();
            for entry in &scheduled {
                entries.insert(entry.id, entry.clone());
            }
        }

        info!(
            series_id = %series_id,
            occurrences = scheduled.len(),
            kind = %kind,
            "Recurring notification scheduled"
        );
        Ok(scheduled)
    }

    /// Cancel a pending entry
    pub fn cancel(&self, id: Uuid) -> Result<ScheduledNotification> {
        self.entries
            .write()
            .remove(&id)
            .ok_or_else(|| Error::not_found("ScheduledNotification", id))
    }

    pub fn get(&self, id: Uuid) -> Result<ScheduledNotification> {
        self.entries
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("ScheduledNotification", id))
    }

    /// Pending entries, soonest first
    pub fn list(&self) -> Vec<ScheduledNotification> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by_key(|e| e.scheduled_at);
        entries
    }

    /// Remove and return every entry due at `now`, soonest first
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledNotification> {
        let mut due: Vec<ScheduledNotification> = {
            let mut entries = self.entries.write();
            let ids: Vec<Uuid> = entries
                .values()
                .filter(|e| e.status == ScheduledStatus::Pending && e.scheduled_at <= now)
                .map(|e| e.id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        for entry in &mut due {
            entry.status = ScheduledStatus::Dispatched;
        }
        due.sort_by_key(|e| e.scheduled_at);
        due
    }

    /// Periodic sweep releasing due entries to `due_tx`
    pub async fn run(
        self: Arc<Self>,
        due_tx: mpsc::UnboundedSender<ScheduledNotification>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.config.sweep_interval, "Scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(pending = self.entries.read().len(), "Scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            for entry in self.take_due(Utc::now()) {
                debug!(scheduled_id = %entry.id, "Releasing scheduled notification");
                if due_tx.send(entry).is_err() {
                    warn!("Scheduled notification receiver dropped, stopping scheduler");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelType;
    use crate::notify::templates::fixture_incident;
    use chrono::Duration as ChronoDuration;
    use rstest::rstest;

    fn channel() -> NotificationChannel {
        NotificationChannel::new("ops", ChannelType::Chat)
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default())
    }

    fn recurrence(max: Option<usize>, end: Option<DateTime<Utc>>, start: DateTime<Utc>) -> Recurrence {
        Recurrence {
            start,
            interval: Duration::from_secs(600),
            max_occurrences: max,
            end_time: end,
        }
    }

    #[test]
    fn test_not_released_before_due() {
        let scheduler = scheduler();
        let at = Utc::now() + ChronoDuration::minutes(5);
        let entry = scheduler.schedule(
            fixture_incident(),
            &channel(),
            NotificationType::IncidentCreated,
            at,
            HashMap::new(),
        );

        assert!(scheduler.take_due(Utc::now()).is_empty());
        assert_eq!(scheduler.get(entry.id).unwrap().status, ScheduledStatus::Pending);

        let due = scheduler.take_due(at);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, ScheduledStatus::Dispatched);
        assert!(scheduler.list().is_empty());
    }

    #[test]
    fn test_cancel() {
        let scheduler = scheduler();
        let now = Utc::now();
        let first = scheduler.schedule(fixture_incident(), &channel(), NotificationType::IncidentResolved, now, HashMap::new());
        let second = scheduler.schedule(
            fixture_incident(),
            &channel(),
            NotificationType::IncidentResolved,
            now + ChronoDuration::hours(1),
            HashMap::new(),
        );

        scheduler.cancel(second.id).unwrap();
        assert!(scheduler.cancel(second.id).unwrap_err().is_not_found());

        scheduler.take_due(now);
        assert!(scheduler.cancel(first.id).unwrap_err().is_not_found());
        assert!(scheduler.cancel(Uuid::new_v4()).unwrap_err().is_not_found());
    }

    #[rstest]
    #[case(Some(3), None, 3)]
    #[case(None, Some(25), 3)]
    #[case(Some(10), Some(15), 2)]
    #[case(Some(1000), None, 100)]
    fn test_recurring_expansion(
        #[case] max: Option<usize>,
        #[case] end_after_minutes: Option<i64>,
        #[case] expected: usize,
    ) {
        let scheduler = scheduler();
        let start = Utc::now();
        let end = end_after_minutes.map(|m| start + ChronoDuration::minutes(m));

        let entries = scheduler
            .schedule_recurring(
                fixture_incident(),
                &channel(),
                NotificationType::IncidentCreated,
                &recurrence(max, end, start),
                HashMap::new(),
            )
            .unwrap();

        assert_eq!(entries.len(), expected);
        assert_eq!(scheduler.list().len(), expected);
        for (k, entry) in entries.iter().enumerate() {
            let offset = ChronoDuration::minutes(10 * i64::try_from(k).unwrap());
            assert_eq!(entry.scheduled_at, start + offset);
            assert_eq!(entry.metadata["occurrence"], k.to_string());
        }
    }

    #[test]
    fn test_recurrence_must_be_bounded() {
        let scheduler = scheduler();
        let start = Utc::now();

        let unbounded = scheduler.schedule_recurring(
            fixture_incident(),
            &channel(),
            NotificationType::IncidentCreated,
            &recurrence(None, None, start),
            HashMap::new(),
        );
        assert!(matches!(unbounded, Err(Error::Validation(_))));

        let mut zero = recurrence(Some(3), None, start);
        zero.interval = Duration::ZERO;
        let zero = scheduler.schedule_recurring(
            fixture_incident(),
            &channel(),
            NotificationType::IncidentCreated,
            &zero,
            HashMap::new(),
        );
        assert!(matches!(zero, Err(Error::Validation(_))));

        let ended = scheduler.schedule_recurring(
            fixture_incident(),
            &channel(),
            NotificationType::IncidentCreated,
            &recurrence(None, Some(start - ChronoDuration::minutes(1)), start),
            HashMap::new(),
        );
        assert!(ended.is_err());
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_releases_due_entries() {
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            sweep_interval: Duration::from_millis(20),
            ..Default::default()
        }));
        let entry = scheduler.schedule(
            fixture_incident(),
            &channel(),
            NotificationType::IncidentCreated,
            Utc::now() + ChronoDuration::milliseconds(50),
            HashMap::new(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.clone().run(tx, cancel.clone()));

        let released = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("released within the timeout")
            .expect("sender alive");
        assert_eq!(released.id, entry.id);
        assert!(Utc::now() >= entry.scheduled_at);

        cancel.cancel();
        handle.await.unwrap();
    }
}
