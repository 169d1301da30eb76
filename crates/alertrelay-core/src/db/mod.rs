//! Storage layer for AlertRelay
//!
//! The pipeline talks to persistence through the [`Storage`] trait. The
//! bundled [`MemoryStorage`] keeps every table behind its own lock.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Alert, HistoryFilter, Incident, IncidentFilter, NotificationBatch, NotificationChannel,
    NotificationHistory, NotificationTemplate, NotificationType, ChannelType, TimelineEntry,
};

/// Storage interface consumed by the correlation engine, the lifecycle
/// manager and the notification pipeline
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend identifier
    fn storage_type(&self) -> &'static str;

    // === Incidents ===

    /// Insert a new incident
    async fn create_incident(&self, incident: &Incident) -> Result<()>;

    /// Get an incident by ID
    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>>;

    /// Compare-and-swap write.
    ///
    /// Succeeds only if the stored version equals `incident.version`; the
    /// stored copy gets the next version and is returned.
    async fn update_incident(&self, incident: &Incident) -> Result<Incident>;

    /// Hard delete (administrative)
    async fn delete_incident(&self, id: Uuid) -> Result<()>;

    /// List incidents matching a filter
    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>>;

    // === Alerts ===

    /// Insert a new alert
    async fn create_alert(&self, alert: &Alert) -> Result<()>;

    /// Get an alert by ID
    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>>;

    /// Get an alert by its dedup key
    async fn get_alert_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Alert>>;

    /// Replace an alert
    async fn update_alert(&self, alert: &Alert) -> Result<()>;

    /// Full alert snapshot
    async fn list_alerts(&self) -> Result<Vec<Alert>>;

    // === Timeline ===

    /// Append an immutable timeline entry
    async fn append_timeline(&self, entry: &TimelineEntry) -> Result<()>;

    /// Timeline of an incident in creation order
    async fn list_timeline(&self, incident_id: Uuid) -> Result<Vec<TimelineEntry>>;

    // === Channels ===

    async fn create_channel(&self, channel: &NotificationChannel) -> Result<()>;
    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>>;
    async fn update_channel(&self, channel: &NotificationChannel) -> Result<()>;
    async fn delete_channel(&self, id: Uuid) -> Result<()>;
    async fn list_channels(&self) -> Result<Vec<NotificationChannel>>;

    // === Templates ===

    async fn create_template(&self, template: &NotificationTemplate) -> Result<()>;
    async fn get_template(&self, id: Uuid) -> Result<Option<NotificationTemplate>>;
    async fn update_template(&self, template: &NotificationTemplate) -> Result<()>;
    async fn delete_template(&self, id: Uuid) -> Result<()>;
    async fn list_templates(&self) -> Result<Vec<NotificationTemplate>>;

    /// Default stored template for a (type, channel) pair
    async fn find_default_template(
        &self,
        kind: NotificationType,
        channel: ChannelType,
    ) -> Result<Option<NotificationTemplate>>;

    // === History ===

    async fn create_history(&self, record: &NotificationHistory) -> Result<()>;
    async fn get_history(&self, id: Uuid) -> Result<Option<NotificationHistory>>;
    async fn update_history(&self, record: &NotificationHistory) -> Result<()>;
    async fn list_history(&self, filter: &HistoryFilter) -> Result<Vec<NotificationHistory>>;

    // === Batches ===

    async fn create_batch(&self, batch: &NotificationBatch) -> Result<()>;
    async fn get_batch(&self, id: Uuid) -> Result<Option<NotificationBatch>>;
    async fn update_batch(&self, batch: &NotificationBatch) -> Result<()>;
    async fn list_batches(&self) -> Result<Vec<NotificationBatch>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Test doubles

    use super::*;
    use parking_lot::Mutex;

    /// In-memory storage whose next `update_incident` calls lose the
    /// version race, and whose batch table can be made unavailable
    pub struct ContendedStorage {
        inner: MemoryStorage,
        conflicts: Mutex<u32>,
        incident_writes: Mutex<u32>,
        batches_down: Mutex<bool>,
    }

    impl ContendedStorage {
        pub fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                conflicts: Mutex::new(0),
                incident_writes: Mutex::new(0),
                batches_down: Mutex::new(false),
            }
        }

        /// Make every batch write fail
        pub fn fail_batches(&self) {
            *self.batches_down.lock() = true;
        }

        /// Fail the next `n` incident writes with a conflict
        pub fn conflict_next(&self, n: u32) {
            *self.conflicts.lock() = n;
        }

        /// Incident writes attempted so far
        pub fn incident_writes(&self) -> u32 {
            *self.incident_writes.lock()
        }
    }

    #[async_trait]
    impl Storage for ContendedStorage {
        fn storage_type(&self) -> &'static str {
            "contended"
        }

        async fn create_incident(&self, incident: &Incident) -> Result<()> {
            self.inner.create_incident(incident).await
        }
        async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
            self.inner.get_incident(id).await
        }
        async fn update_incident(&self, incident: &Incident) -> Result<Incident> {
            *self.incident_writes.lock() += 1;
            {
                let mut conflicts = self.conflicts.lock();
                if *conflicts > 0 {
                    *conflicts -= 1;
                    return Err(crate::error::Error::conflict("Incident", incident.id));
                }
            }
            self.inner.update_incident(incident).await
        }
        async fn delete_incident(&self, id: Uuid) -> Result<()> {
            self.inner.delete_incident(id).await
        }
        async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
            self.inner.list_incidents(filter).await
        }

        async fn create_alert(&self, alert: &Alert) -> Result<()> {
            self.inner.create_alert(alert).await
        }
        async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
            self.inner.get_alert(id).await
        }
        async fn get_alert_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Alert>> {
            self.inner.get_alert_by_fingerprint(fingerprint).await
        }
        async fn update_alert(&self, alert: &Alert) -> Result<()> {
            self.inner.update_alert(alert).await
        }
        async fn list_alerts(&self) -> Result<Vec<Alert>> {
            self.inner.list_alerts().await
        }

        async fn append_timeline(&self, entry: &TimelineEntry) -> Result<()> {
            self.inner.append_timeline(entry).await
        }
        async fn list_timeline(&self, incident_id: Uuid) -> Result<Vec<TimelineEntry>> {
            self.inner.list_timeline(incident_id).await
        }

        async fn create_channel(&self, channel: &NotificationChannel) -> Result<()> {
            self.inner.create_channel(channel).await
        }
        async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
            self.inner.get_channel(id).await
        }
        async fn update_channel(&self, channel: &NotificationChannel) -> Result<()> {
            self.inner.update_channel(channel).await
        }
        async fn delete_channel(&self, id: Uuid) -> Result<()> {
            self.inner.delete_channel(id).await
        }
        async fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
            self.inner.list_channels().await
        }

        async fn create_template(&self, template: &NotificationTemplate) -> Result<()> {
            self.inner.create_template(template).await
        }
        async fn get_template(&self, id: Uuid) -> Result<Option<NotificationTemplate>> {
            self.inner.get_template(id).await
        }
        async fn update_template(&self, template: &NotificationTemplate) -> Result<()> {
            self.inner.update_template(template).await
        }
        async fn delete_template(&self, id: Uuid) -> Result<()> {
            self.inner.delete_template(id).await
        }
        async fn list_templates(&self) -> Result<Vec<NotificationTemplate>> {
            self.inner.list_templates().await
        }
        async fn find_default_template(
            &self,
            kind: NotificationType,
            channel: ChannelType,
        ) -> Result<Option<NotificationTemplate>> {
            self.inner.find_default_template(kind, channel).await
        }

        async fn create_history(&self, record: &NotificationHistory) -> Result<()> {
            self.inner.create_history(record).await
        }
        async fn get_history(&self, id: Uuid) -> Result<Option<NotificationHistory>> {
            self.inner.get_history(id).await
        }
        async fn update_history(&self, record: &NotificationHistory) -> Result<()> {
            self.inner.update_history(record).await
        }
        async fn list_history(&self, filter: &HistoryFilter) -> Result<Vec<NotificationHistory>> {
            self.inner.list_history(filter).await
        }

        async fn create_batch(&self, batch: &NotificationBatch) -> Result<()> {
            if *self.batches_down.lock() {
                return Err(crate::error::Error::storage("batch table unavailable"));
            }
            self.inner.create_batch(batch).await
        }
        async fn get_batch(&self, id: Uuid) -> Result<Option<NotificationBatch>> {
            self.inner.get_batch(id).await
        }
        async fn update_batch(&self, batch: &NotificationBatch) -> Result<()> {
            self.inner.update_batch(batch).await
        }
        async fn list_batches(&self) -> Result<Vec<NotificationBatch>> {
            self.inner.list_batches().await
        }
    }
}
