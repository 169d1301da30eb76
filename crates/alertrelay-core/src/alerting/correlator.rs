//! Alert deduplication and grouping

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Storage;
use crate::error::{Error, Result};
use crate::incident::IncidentManager;
use crate::models::{
    Alert, AlertStatus, Incident, IncidentFilter, IncidentOrder, WebhookAlert, WebhookPayload,
};

/// Labels compared against a candidate incident's first alert, strongest
/// first. An earlier label wins over any later one across all candidates.
pub const GROUPING_LABELS: [&str; 3] = ["service", "instance", "alertname"];

/// Summary of one webhook delivery
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookOutcome {
    /// Alerts in the payload
    pub received: usize,
    /// New alert records
    pub created: usize,
    /// Re-delivered alerts updated in place
    pub updated: usize,
    /// Incidents opened by this delivery
    pub incidents_created: Vec<Uuid>,
    /// Alerts merged into existing incidents
    pub grouped: usize,
    /// Alerts left ungrouped after a grouping failure
    pub ungrouped: usize,
}

/// Turns webhook alerts into deduplicated alert records and incidents
pub struct AlertCorrelator {
    storage: Arc<dyn Storage>,
    incidents: Arc<IncidentManager>,
}

impl AlertCorrelator {
    /// Create a new correlator
    pub fn new(storage: Arc<dyn Storage>, incidents: Arc<IncidentManager>) -> Self {
        Self { storage, incidents }
    }

    /// Process every alert of a webhook payload in order.
    ///
    /// A storage error aborts the remaining alerts; alerts and incidents
    /// already committed stay as they are.
    pub async fn process_webhook(&self, payload: &WebhookPayload) -> Result<WebhookOutcome> {
        let mut outcome = WebhookOutcome {
            received: payload.alerts.len(),
            ..Default::default()
        };

        metrics::counter!("alertrelay_alerts_received_total", "receiver" => payload.receiver.clone())
            .increment(payload.alerts.len() as u64);

        for incoming in &payload.alerts {
            let mut alert = self.upsert(incoming, &mut outcome).await?;

            if alert.needs_grouping() {
                self.group(&mut alert, &mut outcome).await?;
            }
        }

        info!(
            received = outcome.received,
            created = outcome.created,
            updated = outcome.updated,
            incidents = outcome.incidents_created.len(),
            grouped = outcome.grouped,
            "Webhook processed"
        );

        Ok(outcome)
    }

    /// Insert a new alert or update the existing record for its fingerprint
    async fn upsert(&self, incoming: &WebhookAlert, outcome: &mut WebhookOutcome) -> Result<Alert> {
        let fingerprint = incoming.fingerprint();
        let now = Utc::now();

        let Some(mut alert) = self.storage.get_alert_by_fingerprint(&fingerprint).await? else {
            let alert = Alert {
                id: Uuid::new_v4(),
                fingerprint,
                status: incoming.status(),
                starts_at: incoming.starts_at,
                ends_at: incoming.ends_at(),
                labels: incoming.labels.clone(),
                annotations: incoming.annotations.clone(),
                incident_id: None,
                created_at: now,
                updated_at: now,
            };
            self.storage.create_alert(&alert).await?;
            outcome.created += 1;
            debug!(alert_id = %alert.id, fingerprint = %alert.fingerprint, "Alert created");
            return Ok(alert);
        };

        let refired = alert.status == AlertStatus::Resolved && incoming.status() == AlertStatus::Firing;
        alert.status = incoming.status();
        alert.ends_at = incoming.ends_at();
        if !incoming.annotations.is_empty() {
            alert.annotations = incoming.annotations.clone();
        }
        alert.updated_at = now;

        // A firing alert never keeps a reference to a deleted incident; a
        // re-fired one also leaves a closed incident behind
        if alert.status == AlertStatus::Firing {
            if let Some(incident_id) = alert.incident_id {
                let stale = match self.storage.get_incident(incident_id).await? {
                    None => true,
                    Some(incident) => refired && !incident.status.is_active(),
                };
                if stale {
                    debug!(alert_id = %alert.id, incident_id = %incident_id, "Dropping stale incident reference");
                    alert.incident_id = None;
                }
            }
        }

        self.storage.update_alert(&alert).await?;
        outcome.updated += 1;
        debug!(alert_id = %alert.id, status = ?alert.status, "Alert updated");
        Ok(alert)
    }

    /// Attach to the best matching active incident, or open a new one
    async fn group(&self, alert: &mut Alert, outcome: &mut WebhookOutcome) -> Result<()> {
        let incident_id = match self.find_match(alert).await? {
            Some(candidate) => match self.incidents.attach_alert(candidate, alert).await {
                Ok(incident) => {
                    outcome.grouped += 1;
                    incident.id
                }
                // Resolved or deleted between the scan and the write
                Err(Error::Validation(_) | Error::NotFound { .. }) => {
                    self.open_incident(alert, outcome).await?
                }
                Err(e @ Error::Conflict { .. }) => {
                    warn!(
                        alert_id = %alert.id,
                        incident_id = %candidate,
                        error = %e,
                        "Grouping lost a race, alert left ungrouped"
                    );
                    outcome.ungrouped += 1;
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            None => self.open_incident(alert, outcome).await?,
        };

        alert.incident_id = Some(incident_id);
        self.storage.update_alert(alert).await
    }

    async fn open_incident(&self, alert: &Alert, outcome: &mut WebhookOutcome) -> Result<Uuid> {
        let incident = self.incidents.create_from_alert(alert).await?;
        outcome.incidents_created.push(incident.id);
        Ok(incident.id)
    }

    /// Find the incident to merge into
    async fn find_match(&self, alert: &Alert) -> Result<Option<Uuid>> {
        let filter = IncidentFilter {
            order_by: Some(IncidentOrder::CreatedAsc),
            ..Default::default()
        };
        let active: Vec<Incident> = self
            .storage
            .list_incidents(&filter)
            .await?
            .into_iter()
            .filter(|i| i.status.is_active())
            .collect();

        let mut firsts = Vec::with_capacity(active.len());
        for incident in &active {
            let Some(first_id) = incident.alert_ids.first() else {
                continue;
            };
            if let Some(first) = self.storage.get_alert(*first_id).await? {
                firsts.push((incident.id, first));
            }
        }

        Ok(match_by_labels(alert, &firsts))
    }
}

/// Apply [`GROUPING_LABELS`] precedence over `(incident_id, first_alert)`
/// candidates in scan order
fn match_by_labels(alert: &Alert, candidates: &[(Uuid, Alert)]) -> Option<Uuid> {
    GROUPING_LABELS.iter().find_map(|name| {
        let value = alert.label(name)?;
        candidates
            .iter()
            .find(|(_, first)| first.label(name) == Some(value))
            .map(|(id, _)| *id)
    })
}
