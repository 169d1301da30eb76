//! Incident data models and state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::alert::{Alert, LabelSet, Severity};

/// Incident lifecycle status. Ordered: open < acknowledged < resolved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    /// Newly created, nobody is on it
    #[default]
    Open,
    /// Someone has taken ownership
    Acknowledged,
    /// Closed
    Resolved,
}

impl IncidentStatus {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Open or acknowledged incidents accept newly grouped alerts
    pub fn is_active(self) -> bool {
        self != Self::Resolved
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incident grouping one or more alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Unique identifier
    pub id: Uuid,

    /// Short human-readable title
    pub title: String,

    /// Longer description
    pub description: String,

    /// Lifecycle status
    pub status: IncidentStatus,

    /// Severity
    pub severity: Severity,

    /// When the incident was opened
    pub created_at: DateTime<Utc>,

    /// When the incident last changed
    pub updated_at: DateTime<Utc>,

    /// When the incident was acknowledged
    pub acked_at: Option<DateTime<Utc>>,

    /// When the incident was resolved
    pub resolved_at: Option<DateTime<Utc>>,

    /// Current owner
    pub assignee_id: Option<String>,

    /// Grouped alerts, in grouping order, without duplicates
    pub alert_ids: Vec<Uuid>,

    /// Labels copied from the first alert
    pub labels: LabelSet,

    /// Free-form tags
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Optimistic concurrency version, bumped by every storage write
    #[serde(default)]
    pub version: u64,
}

impl Incident {
    /// Open a new incident for an ungrouped firing alert
    pub fn from_alert(alert: &Alert, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: alert.incident_title(),
            description: alert
                .annotation("description")
                .unwrap_or_default()
                .to_string(),
            status: IncidentStatus::Open,
            severity: alert.severity(),
            created_at: now,
            updated_at: now,
            acked_at: None,
            resolved_at: None,
            assignee_id: None,
            alert_ids: vec![alert.id],
            labels: alert.labels.clone(),
            tags: BTreeSet::new(),
            version: 0,
        }
    }

    /// Attach an alert. Returns false if it was already attached.
    pub fn attach_alert(&mut self, alert_id: Uuid, now: DateTime<Utc>) -> bool {
        if self.alert_ids.contains(&alert_id) {
            return false;
        }
        self.alert_ids.push(alert_id);
        self.updated_at = now;
        true
    }

    /// open -> acknowledged
    pub fn acknowledge(&mut self, assignee: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != IncidentStatus::Open {
            return Err(self.invalid_transition(IncidentStatus::Acknowledged));
        }
        self.status = IncidentStatus::Acknowledged;
        self.acked_at = Some(now);
        if !assignee.is_empty() {
            self.assignee_id = Some(assignee.to_string());
        }
        self.updated_at = now;
        Ok(())
    }

    /// (open|acknowledged) -> resolved.
    ///
    /// Resolving an open incident acknowledges it at the same instant so
    /// `created_at <= acked_at <= resolved_at` always holds. Returns whether
    /// that implicit acknowledgement happened.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let auto_acked = match self.status {
            IncidentStatus::Open => {
                self.status = IncidentStatus::Acknowledged;
                self.acked_at = Some(now);
                true
            }
            IncidentStatus::Acknowledged => false,
            IncidentStatus::Resolved => {
                return Err(self.invalid_transition(IncidentStatus::Resolved))
            }
        };
        self.status = IncidentStatus::Resolved;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(auto_acked)
    }

    /// Change the owner. Returns the previous one.
    pub fn assign(&mut self, assignee: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        if assignee.trim().is_empty() {
            return Err(Error::validation("assignee must not be empty"));
        }
        let previous = self.assignee_id.replace(assignee.to_string());
        self.updated_at = now;
        Ok(previous)
    }

    /// Time from creation to acknowledgement
    pub fn time_to_acknowledge(&self) -> Option<chrono::Duration> {
        self.acked_at.map(|at| at - self.created_at)
    }

    /// Time from creation to resolution
    pub fn time_to_resolve(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|at| at - self.created_at)
    }

    fn invalid_transition(&self, to: IncidentStatus) -> Error {
        Error::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

/// Kind of timeline entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    /// Incident opened
    Created,
    /// An alert was merged into the incident
    AlertGrouped,
    /// Status moved forward
    StatusChange,
    /// Owner changed
    Assignment,
    /// Tag added
    TagAdded,
    /// Tag removed
    TagRemoved,
    /// Free-form comment
    Comment,
}

/// Immutable record of one lifecycle mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Unique identifier
    pub id: Uuid,

    /// Owning incident
    pub incident_id: Uuid,

    /// Entry kind
    pub kind: TimelineKind,

    /// Who did it, when known
    pub actor: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Structured details (`from`/`to` for status changes, `tag`, ...)
    pub details: BTreeMap<String, String>,

    /// When it happened
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    /// Start a new entry
    pub fn new(
        incident_id: Uuid,
        kind: TimelineKind,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            kind,
            actor: None,
            message: message.into(),
            details: BTreeMap::new(),
            created_at,
        }
    }

    /// Set the actor
    #[must_use]
    pub fn by(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.filter(|a| !a.is_empty()).map(str::to_string);
        self
    }

    /// Add a detail
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Status change entry
    pub fn status_change(
        incident_id: Uuid,
        from: IncidentStatus,
        to: IncidentStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            incident_id,
            TimelineKind::StatusChange,
            format!("Status changed from {from} to {to}"),
            at,
        )
        .with("from", from.as_str())
        .with("to", to.as_str())
    }
}

/// Per-item result of a bulk operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFailure {
    /// Target incident
    pub id: Uuid,
    /// Why it failed
    pub reason: String,
}

/// Result of a bulk operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkOutcome {
    /// Items that transitioned successfully
    pub processed: usize,
    /// Items that did not
    pub failures: Vec<BulkFailure>,
}

/// Mean response times over all incidents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetrics {
    /// Mean time to acknowledge, in seconds (0 when no sample)
    pub mtta_seconds: f64,
    /// Mean time to resolve, in seconds (0 when no sample)
    pub mttr_seconds: f64,
    /// Incidents considered
    pub total_incidents: usize,
    /// Incidents with `acked_at` set
    pub acknowledged_count: usize,
    /// Incidents with `resolved_at` set
    pub resolved_count: usize,
}

impl ResponseMetrics {
    /// Compute MTTA/MTTR over a snapshot of incidents
    pub fn compute(incidents: &[Incident]) -> Self {
        let ack: Vec<i64> = incidents
            .iter()
            .filter_map(Incident::time_to_acknowledge)
            .map(|d| d.num_milliseconds())
            .collect();
        let res: Vec<i64> = incidents
            .iter()
            .filter_map(Incident::time_to_resolve)
            .map(|d| d.num_milliseconds())
            .collect();

        Self {
            mtta_seconds: mean_seconds(&ack),
            mttr_seconds: mean_seconds(&res),
            total_incidents: incidents.len(),
            acknowledged_count: ack.len(),
            resolved_count: res.len(),
        }
    }
}

fn mean_seconds(millis: &[i64]) -> f64 {
    if millis.is_empty() {
        return 0.0;
    }
    let total: i64 = millis.iter().sum();
    total as f64 / millis.len() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{fingerprint, AlertStatus};
    use chrono::Duration;

    fn sample_alert() -> Alert {
        let now = Utc::now();
        let labels: LabelSet = [("alertname", "HighCPU"), ("severity", "critical")]
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
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

    #[test]
    fn test_from_alert() {
        let alert = sample_alert();
        let incident = Incident::from_alert(&alert, Utc::now());
        assert_eq!(incident.status, IncidentStatus::Open);
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.alert_ids, vec![alert.id]);
        assert_eq!(incident.title, "HighCPU");
    }

    #[test]
    fn test_attach_alert_is_a_set() {
        let alert = sample_alert();
        let mut incident = Incident::from_alert(&alert, Utc::now());
        let other = Uuid::new_v4();
        assert!(incident.attach_alert(other, Utc::now()));
        assert!(!incident.attach_alert(other, Utc::now()));
        assert!(!incident.attach_alert(alert.id, Utc::now()));
        assert_eq!(incident.alert_ids.len(), 2);
    }

    #[test]
    fn test_forward_only_transitions() {
        let created = Utc::now();
        let mut incident = Incident::from_alert(&sample_alert(), created);

        incident
            .acknowledge("alice", created + Duration::minutes(1))
            .unwrap();
        assert_eq!(incident.status, IncidentStatus::Acknowledged);
        assert_eq!(incident.assignee_id.as_deref(), Some("alice"));

        let err = incident.acknowledge("bob", created + Duration::minutes(2));
        assert!(matches!(err, Err(Error::InvalidTransition { .. })));
        assert_eq!(incident.assignee_id.as_deref(), Some("alice"));

        let auto = incident.resolve(created + Duration::minutes(3)).unwrap();
        assert!(!auto);
        assert!(incident.resolve(created + Duration::minutes(4)).is_err());
        assert!(incident.acknowledge("bob", created).is_err());
        assert_eq!(incident.resolved_at, Some(created + Duration::minutes(3)));
    }

    #[test]
    fn test_resolve_from_open_sets_both_timestamps() {
        let created = Utc::now();
        let mut incident = Incident::from_alert(&sample_alert(), created);
        let at = created + Duration::minutes(5);

        assert!(incident.resolve(at).unwrap());
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert_eq!(incident.acked_at, Some(at));
        assert_eq!(incident.resolved_at, Some(at));
    }

    #[test]
    fn test_response_metrics() {
        let base = Utc::now();
        let mut a = Incident::from_alert(&sample_alert(), base);
        let mut b = Incident::from_alert(&sample_alert(), base);
        let c = Incident::from_alert(&sample_alert(), base);
        a.acknowledge("x", base + Duration::minutes(10)).unwrap();
        b.acknowledge("y", base + Duration::minutes(20)).unwrap();
        b.resolve(base + Duration::minutes(60)).unwrap();

        let metrics = ResponseMetrics::compute(&[a, b, c]);
        assert!((metrics.mtta_seconds - 15.0 * 60.0).abs() < f64::EPSILON);
        assert!((metrics.mttr_seconds - 60.0 * 60.0).abs() < f64::EPSILON);
        assert_eq!(metrics.acknowledged_count, 2);
        assert_eq!(metrics.resolved_count, 1);
        assert_eq!(metrics.total_incidents, 3);
    }

    #[test]
    fn test_response_metrics_empty_is_zero() {
        let metrics = ResponseMetrics::compute(&[]);
        assert_eq!(metrics.mtta_seconds, 0.0);
        assert_eq!(metrics.mttr_seconds, 0.0);

        let open = Incident::from_alert(&sample_alert(), Utc::now());
        let metrics = ResponseMetrics::compute(&[open]);
        assert_eq!(metrics.mtta_seconds, 0.0);
        assert!(!metrics.mtta_seconds.is_nan());
    }
}
