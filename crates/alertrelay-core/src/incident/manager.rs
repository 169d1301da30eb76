//! Incident state machine, timeline and bulk operations

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::IncidentEvent;
use crate::db::Storage;
use crate::error::{Error, Result};
use crate::models::{
    Alert, BulkFailure, BulkOutcome, Incident, IncidentFilter, IncidentStatus, ResponseMetrics,
    TimelineEntry, TimelineKind,
};

/// Read-modify-CAS attempts before a conflict is surfaced
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Owns incident lifecycle transitions
pub struct IncidentManager {
    storage: Arc<dyn Storage>,
    events: mpsc::UnboundedSender<IncidentEvent>,
}

impl IncidentManager {
    /// Create a manager and the receiving end of its event stream
    pub fn new(storage: Arc<dyn Storage>) -> (Self, mpsc::UnboundedReceiver<IncidentEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { storage, events }, rx)
    }

    /// Open a new incident for an ungrouped firing alert
    pub async fn create_from_alert(&self, alert: &Alert) -> Result<Incident> {
        let now = Utc::now();
        let incident = Incident::from_alert(alert, now);
        self.storage.create_incident(&incident).await?;

        let entry = TimelineEntry::new(
            incident.id,
            TimelineKind::Created,
            format!("Incident opened from alert {}", alert.fingerprint),
            now,
        )
        .with("alert_id", alert.id.to_string())
        .with("severity", incident.severity.as_str());
        self.storage.append_timeline(&entry).await?;

        info!(
            incident_id = %incident.id,
            severity = %incident.severity,
            title = %incident.title,
            "Incident created"
        );

        self.publish(IncidentEvent::Created(incident.clone()));
        Ok(incident)
    }

    /// Merge an alert into an existing active incident. Emits no event.
    pub async fn attach_alert(&self, incident_id: Uuid, alert: &Alert) -> Result<Incident> {
        let incident = self
            .mutate(incident_id, |incident, now| {
                if !incident.status.is_active() {
                    return Err(Error::validation(format!(
                        "incident {} is resolved and cannot take new alerts",
                        incident.id
                    )));
                }
                if !incident.attach_alert(alert.id, now) {
                    return Ok(Vec::new());
                }
                Ok(vec![TimelineEntry::new(
                    incident.id,
                    TimelineKind::AlertGrouped,
                    format!("Alert {} grouped into incident", alert.fingerprint),
                    now,
                )
                .with("alert_id", alert.id.to_string())])
            })
            .await?;

        debug!(incident_id = %incident.id, alert_id = %alert.id, "Alert grouped");
        Ok(incident)
    }

    /// open -> acknowledged, taking ownership
    pub async fn acknowledge(&self, id: Uuid, assignee: &str) -> Result<Incident> {
        let incident = self
            .mutate(id, |incident, now| {
                let previous = incident.assignee_id.clone();
                incident.acknowledge(assignee, now)?;

                let mut entries = vec![TimelineEntry::status_change(
                    incident.id,
                    IncidentStatus::Open,
                    IncidentStatus::Acknowledged,
                    now,
                )
                .by(Some(assignee))];

                if incident.assignee_id != previous {
                    entries.push(assignment_entry(incident, previous.as_deref(), assignee, now));
                }
                Ok(entries)
            })
            .await?;

        info!(incident_id = %id, assignee = %assignee, "Incident acknowledged");
        self.publish(IncidentEvent::Acknowledged(incident.clone()));
        Ok(incident)
    }

    /// (open|acknowledged) -> resolved. Open incidents are acknowledged at
    /// the same instant.
    pub async fn resolve(&self, id: Uuid, actor: Option<&str>) -> Result<Incident> {
        let incident = self
            .mutate(id, |incident, now| {
                let auto_acked = incident.resolve(now)?;

                let mut entries = Vec::with_capacity(2);
                if auto_acked {
                    entries.push(
                        TimelineEntry::status_change(
                            incident.id,
                            IncidentStatus::Open,
                            IncidentStatus::Acknowledged,
                            now,
                        )
                        .by(actor)
                        .with("implicit", "true"),
                    );
                }
                entries.push(
                    TimelineEntry::status_change(
                        incident.id,
                        IncidentStatus::Acknowledged,
                        IncidentStatus::Resolved,
                        now,
                    )
                    .by(actor),
                );
                Ok(entries)
            })
            .await?;

        info!(incident_id = %id, "Incident resolved");
        self.publish(IncidentEvent::Resolved(incident.clone()));
        Ok(incident)
    }

    /// Change the owner without touching the status
    pub async fn assign(&self, id: Uuid, assignee: &str, actor: Option<&str>) -> Result<Incident> {
        let incident = self
            .mutate(id, |incident, now| {
                let previous = incident.assign(assignee, now)?;
                Ok(vec![
                    assignment_entry(incident, previous.as_deref(), assignee, now).by(actor)
                ])
            })
            .await?;

        info!(incident_id = %id, assignee = %assignee, "Incident assigned");
        self.publish(IncidentEvent::Assigned(incident.clone()));
        Ok(incident)
    }

    /// Add a tag
    pub async fn add_tag(&self, id: Uuid, tag: &str, actor: Option<&str>) -> Result<Incident> {
        let tag = normalize_tag(tag)?;
        self.mutate(id, |incident, now| {
            if !incident.tags.insert(tag.clone()) {
                return Err(Error::validation(format!("incident already has tag '{tag}'")));
            }
            incident.updated_at = now;
            Ok(vec![TimelineEntry::new(
                incident.id,
                TimelineKind::TagAdded,
                format!("Tag '{tag}' added"),
                now,
            )
            .by(actor)
            .with("tag", tag.as_str())])
        })
        .await
    }

    /// Remove a tag
    pub async fn remove_tag(&self, id: Uuid, tag: &str, actor: Option<&str>) -> Result<Incident> {
        let tag = normalize_tag(tag)?;
        self.mutate(id, |incident, now| {
            if !incident.tags.remove(&tag) {
                return Err(Error::not_found("Tag", &tag));
            }
            incident.updated_at = now;
            Ok(vec![TimelineEntry::new(
                incident.id,
                TimelineKind::TagRemoved,
                format!("Tag '{tag}' removed"),
                now,
            )
            .by(actor)
            .with("tag", tag.as_str())])
        })
        .await
    }

    /// Append a free-form comment to the timeline
    pub async fn add_comment(
        &self,
        id: Uuid,
        author: Option<&str>,
        text: &str,
    ) -> Result<TimelineEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("comment must not be empty"));
        }
        self.get(id).await?;

        let entry = TimelineEntry::new(id, TimelineKind::Comment, text, Utc::now()).by(author);
        self.storage.append_timeline(&entry).await?;
        Ok(entry)
    }

    /// Acknowledge many incidents, reporting per-item failures
    pub async fn bulk_acknowledge(&self, ids: &[Uuid], assignee: &str) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            record(&mut outcome, id, self.acknowledge(id, assignee).await);
        }
        info!(processed = outcome.processed, failed = outcome.failures.len(), "Bulk acknowledge");
        outcome
    }

    /// Resolve many incidents, reporting per-item failures
    pub async fn bulk_resolve(&self, ids: &[Uuid], actor: Option<&str>) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            record(&mut outcome, id, self.resolve(id, actor).await);
        }
        info!(processed = outcome.processed, failed = outcome.failures.len(), "Bulk resolve");
        outcome
    }

    /// Assign many incidents, reporting per-item failures
    pub async fn bulk_assign(
        &self,
        ids: &[Uuid],
        assignee: &str,
        actor: Option<&str>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            record(&mut outcome, id, self.assign(id, assignee, actor).await);
        }
        info!(processed = outcome.processed, failed = outcome.failures.len(), "Bulk assign");
        outcome
    }

    /// Hard delete. Administrative only.
    ///
    /// Alerts that pointed at the incident become ungrouped so a later
    /// firing delivery opens a fresh one.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let incident = self.get(id).await?;
        self.storage.delete_incident(id).await?;

        for alert_id in &incident.alert_ids {
            let Some(mut alert) = self.storage.get_alert(*alert_id).await? else {
                continue;
            };
            if alert.incident_id == Some(id) {
                alert.incident_id = None;
                alert.updated_at = Utc::now();
                self.storage.update_alert(&alert).await?;
            }
        }

        warn!(incident_id = %id, alerts = incident.alert_ids.len(), "Incident deleted");
        Ok(())
    }

    /// Get an incident
    pub async fn get(&self, id: Uuid) -> Result<Incident> {
        self.storage
            .get_incident(id)
            .await?
            .ok_or_else(|| Error::not_found("Incident", id))
    }

    /// List incidents
    pub async fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        self.storage.list_incidents(filter).await
    }

    /// Timeline in creation order
    pub async fn timeline(&self, id: Uuid) -> Result<Vec<TimelineEntry>> {
        self.get(id).await?;
        self.storage.list_timeline(id).await
    }

    /// MTTA/MTTR over every incident
    pub async fn response_metrics(&self) -> Result<ResponseMetrics> {
        let incidents = self.storage.list_incidents(&IncidentFilter::default()).await?;
        Ok(ResponseMetrics::compute(&incidents))
    }

    /// Read, apply `change`, compare-and-swap, then append the timeline
    /// entries `change` produced. Retries on version conflicts.
    async fn mutate<F>(&self, id: Uuid, mut change: F) -> Result<Incident>
    where
        F: FnMut(&mut Incident, DateTime<Utc>) -> Result<Vec<TimelineEntry>> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut incident = self.get(id).await?;
            let entries = change(&mut incident, Utc::now())?;

            match self.storage.update_incident(&incident).await {
                Ok(stored) => {
                    for entry in &entries {
                        self.storage.append_timeline(entry).await?;
                    }
                    return Ok(stored);
                }
                Err(Error::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(incident_id = %id, attempt, "Incident version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn publish(&self, event: IncidentEvent) {
        if self.events.send(event).is_err() {
            debug!("No incident event consumer attached");
        }
    }
}

fn assignment_entry(
    incident: &Incident,
    previous: Option<&str>,
    assignee: &str,
    now: DateTime<Utc>,
) -> TimelineEntry {
    let entry = TimelineEntry::new(
        incident.id,
        TimelineKind::Assignment,
        format!("Assigned to {assignee}"),
        now,
    )
    .with("to", assignee);

    match previous {
        Some(from) => entry.with("from", from),
        None => entry,
    }
}

fn normalize_tag(tag: &str) -> Result<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(Error::validation("tag must not be empty"));
    }
    Ok(tag.to_string())
}

fn record(outcome: &mut BulkOutcome, id: Uuid, result: Result<Incident>) {
    match result {
        Ok(_) => outcome.processed += 1,
        Err(e) => outcome.failures.push(BulkFailure {
            id,
            reason: e.to_string(),
        }),
    }
}
