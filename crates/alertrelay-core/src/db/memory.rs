//! In-memory storage backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::Storage;
use crate::error::{Error, Result};
use crate::models::{
    Alert, ChannelType, HistoryFilter, Incident, IncidentFilter, NotificationBatch,
    NotificationChannel, NotificationHistory, NotificationTemplate, NotificationType,
    TimelineEntry,
};

#[derive(Default)]
struct AlertTable {
    rows: HashMap<Uuid, Alert>,
    by_fingerprint: HashMap<String, Uuid>,
}

/// Reference storage. Each table has its own lock, held only for the
/// duration of a single operation.
#[derive(Default)]
pub struct MemoryStorage {
    incidents: RwLock<HashMap<Uuid, Incident>>,
    alerts: RwLock<AlertTable>,
    timeline: RwLock<HashMap<Uuid, Vec<TimelineEntry>>>,
    channels: RwLock<HashMap<Uuid, NotificationChannel>>,
    templates: RwLock<HashMap<Uuid, NotificationTemplate>>,
    history: RwLock<HashMap<Uuid, NotificationHistory>>,
    batches: RwLock<HashMap<Uuid, NotificationBatch>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_new<T: Clone>(
    table: &RwLock<HashMap<Uuid, T>>,
    entity: &str,
    id: Uuid,
    value: &T,
) -> Result<()> {
    let mut rows = table.write();
    if rows.contains_key(&id) {
        return Err(Error::storage(format!("{entity} {id} already exists")));
    }
    rows.insert(id, value.clone());
    Ok(())
}

fn replace<T: Clone>(
    table: &RwLock<HashMap<Uuid, T>>,
    entity: &str,
    id: Uuid,
    value: &T,
) -> Result<()> {
    let mut rows = table.write();
    match rows.get_mut(&id) {
        Some(row) => {
            *row = value.clone();
            Ok(())
        }
        None => Err(Error::not_found(entity, id)),
    }
}

fn remove<T>(table: &RwLock<HashMap<Uuid, T>>, entity: &str, id: Uuid) -> Result<T> {
    table
        .write()
        .remove(&id)
        .ok_or_else(|| Error::not_found(entity, id))
}

#[async_trait]
impl Storage for MemoryStorage {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    async fn create_incident(&self, incident: &Incident) -> Result<()> {
        insert_new(&self.incidents, "Incident", incident.id, incident)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.incidents.read().get(&id).cloned())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<Incident> {
        let mut rows = self.incidents.write();
        let stored = rows
            .get_mut(&incident.id)
            .ok_or_else(|| Error::not_found("Incident", incident.id))?;

        if stored.version != incident.version {
            return Err(Error::conflict("Incident", incident.id));
        }

        *stored = incident.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_incident(&self, id: Uuid) -> Result<()> {
        remove(&self.incidents, "Incident", id)?;
        self.timeline.write().remove(&id);
        Ok(())
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let snapshot: Vec<Incident> = self.incidents.read().values().cloned().collect();
        Ok(filter.apply(snapshot))
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        let mut table = self.alerts.write();
        if table.by_fingerprint.contains_key(&alert.fingerprint) {
            return Err(Error::storage(format!(
                "alert with fingerprint {} already exists",
                alert.fingerprint
            )));
        }
        table
            .by_fingerprint
            .insert(alert.fingerprint.clone(), alert.id);
        table.rows.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(self.alerts.read().rows.get(&id).cloned())
    }

    async fn get_alert_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Alert>> {
        let table = self.alerts.read();
        Ok(table
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let mut table = self.alerts.write();
        let row = table
            .rows
            .get_mut(&alert.id)
            .ok_or_else(|| Error::not_found("Alert", alert.id))?;
        if row.fingerprint != alert.fingerprint {
            return Err(Error::validation("alert fingerprint is immutable"));
        }
        *row = alert.clone();
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.alerts.read().rows.values().cloned().collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn append_timeline(&self, entry: &TimelineEntry) -> Result<()> {
        self.timeline
            .write()
            .entry(entry.incident_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_timeline(&self, incident_id: Uuid) -> Result<Vec<TimelineEntry>> {
        Ok(self
            .timeline
            .read()
            .get(&incident_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_channel(&self, channel: &NotificationChannel) -> Result<()> {
        insert_new(&self.channels, "Channel", channel.id, channel)
    }

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self.channels.read().get(&id).cloned())
    }

    async fn update_channel(&self, channel: &NotificationChannel) -> Result<()> {
        replace(&self.channels, "Channel", channel.id, channel)
    }

    async fn delete_channel(&self, id: Uuid) -> Result<()> {
        remove(&self.channels, "Channel", id).map(drop)
    }

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
        let mut channels: Vec<_> = self.channels.read().values().cloned().collect();
        channels.sort_by_key(|c| c.created_at);
        Ok(channels)
    }

    async fn create_template(&self, template: &NotificationTemplate) -> Result<()> {
        insert_new(&self.templates, "Template", template.id, template)
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<NotificationTemplate>> {
        Ok(self.templates.read().get(&id).cloned())
    }

    async fn update_template(&self, template: &NotificationTemplate) -> Result<()> {
        replace(&self.templates, "Template", template.id, template)
    }

    async fn delete_template(&self, id: Uuid) -> Result<()> {
        remove(&self.templates, "Template", id).map(drop)
    }

    async fn list_templates(&self) -> Result<Vec<NotificationTemplate>> {
        let mut templates: Vec<_> = self.templates.read().values().cloned().collect();
        templates.sort_by_key(|t| t.created_at);
        Ok(templates)
    }

    async fn find_default_template(
        &self,
        kind: NotificationType,
        channel: ChannelType,
    ) -> Result<Option<NotificationTemplate>> {
        // Most recently updated default wins
        Ok(self
            .templates
            .read()
            .values()
            .filter(|t| t.is_default && t.kind == kind && t.channel == channel)
            .max_by_key(|t| t.updated_at)
            .cloned())
    }

    async fn create_history(&self, record: &NotificationHistory) -> Result<()> {
        insert_new(&self.history, "Notification", record.id, record)
    }

    async fn get_history(&self, id: Uuid) -> Result<Option<NotificationHistory>> {
        Ok(self.history.read().get(&id).cloned())
    }

    async fn update_history(&self, record: &NotificationHistory) -> Result<()> {
        replace(&self.history, "Notification", record.id, record)
    }

    async fn list_history(&self, filter: &HistoryFilter) -> Result<Vec<NotificationHistory>> {
        let snapshot: Vec<_> = self.history.read().values().cloned().collect();
        Ok(filter.apply(snapshot))
    }

    async fn create_batch(&self, batch: &NotificationBatch) -> Result<()> {
        insert_new(&self.batches, "Batch", batch.id, batch)
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<NotificationBatch>> {
        Ok(self.batches.read().get(&id).cloned())
    }

    async fn update_batch(&self, batch: &NotificationBatch) -> Result<()> {
        replace(&self.batches, "Batch", batch.id, batch)
    }

    async fn list_batches(&self) -> Result<Vec<NotificationBatch>> {
        let mut batches: Vec<_> = self.batches.read().values().cloned().collect();
        batches.sort_by_key(|b| b.created_at);
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fingerprint, AlertStatus, LabelSet, TimelineKind};
    use chrono::Utc;

    fn alert(name: &str) -> Alert {
        let now = Utc::now();
        let labels: LabelSet = [("alertname".to_string(), name.to_string())]
            .into_iter()
            .collect();
        Alert {
            id: Uuid::new_v4(),
            fingerprint: fingerprint(&labels),
            status: AlertStatus::Firing,
            starts_at: now,
            ends_at: None,
            labels,
            annotations: LabelSet::new(),
            incident_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_update_incident_is_compare_and_swap() {
        let store = MemoryStorage::new();
        let incident = Incident::from_alert(&alert("HighCPU"), Utc::now());
        store.create_incident(&incident).await.unwrap();

        let mut first = incident.clone();
        first.title = "first writer".to_string();
        let stored = store.update_incident(&first).await.unwrap();
        assert_eq!(stored.version, 1);

        // Second writer still holds version 0
        let mut stale = incident.clone();
        stale.title = "second writer".to_string();
        let err = store.update_incident(&stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let current = store.get_incident(incident.id).await.unwrap().unwrap();
        assert_eq!(current.title, "first writer");
    }

    #[tokio::test]
    async fn test_fingerprint_index() {
        let store = MemoryStorage::new();
        let a = alert("DiskFull");
        store.create_alert(&a).await.unwrap();

        let found = store
            .get_alert_by_fingerprint(&a.fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, a.id);

        let mut duplicate = alert("DiskFull");
        duplicate.id = Uuid::new_v4();
        assert!(store.create_alert(&duplicate).await.is_err());
        assert_eq!(store.list_alerts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let store = MemoryStorage::new();
        let channel = NotificationChannel::new("ops", ChannelType::Chat);

        assert!(store.update_channel(&channel).await.unwrap_err().is_not_found());
        assert!(store.delete_template(Uuid::new_v4()).await.unwrap_err().is_not_found());
        assert!(store.get_incident(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timeline_keeps_append_order() {
        let store = MemoryStorage::new();
        let incident_id = Uuid::new_v4();
        let now = Utc::now();

        for message in ["one", "two", "three"] {
            let entry = TimelineEntry::new(incident_id, TimelineKind::Comment, message, now);
            store.append_timeline(&entry).await.unwrap();
        }

        let messages: Vec<_> = store
            .list_timeline(incident_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }
}
