//! Alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Label and annotation maps. Ordered so fingerprints are stable.
pub type LabelSet = BTreeMap<String, String>;

/// Incident/alert severity level. Ordered most severe first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Page-worthy outage
    Critical,
    /// Degradation needing prompt attention
    High,
    /// Default bucket
    #[default]
    Medium,
    /// Informational
    Low,
}

impl Severity {
    /// Map a `severity`/`priority` label value, case-insensitively.
    ///
    /// Unknown values fall back to `Medium`.
    pub fn from_label(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "p0" => Self::Critical,
            "high" | "p1" => Self::High,
            "medium" | "p2" => Self::Medium,
            "low" | "p3" => Self::Low,
            _ => Self::Medium,
        }
    }

    /// Derive severity from an alert's labels (`severity`, then `priority`)
    pub fn from_labels(labels: &LabelSet) -> Self {
        labels
            .get("severity")
            .or_else(|| labels.get("priority"))
            .map_or(Self::Medium, |v| Self::from_label(v))
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an alert as reported by the monitoring pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition is active
    #[default]
    Firing,
    /// Condition cleared
    Resolved,
}

impl AlertStatus {
    /// Parse an Alertmanager status string; anything but "resolved" is firing
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("resolved") {
            Self::Resolved
        } else {
            Self::Firing
        }
    }
}

/// A deduplicated alert record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier
    pub id: Uuid,

    /// Dedup key: stable hash of the label set
    pub fingerprint: String,

    /// Current status
    pub status: AlertStatus,

    /// When the condition started
    pub starts_at: DateTime<Utc>,

    /// When the condition ended (None while firing)
    pub ends_at: Option<DateTime<Utc>>,

    /// Identifying labels
    pub labels: LabelSet,

    /// Descriptive annotations
    pub annotations: LabelSet,

    /// Incident this alert was grouped into
    pub incident_id: Option<Uuid>,

    /// When the first delivery was received
    pub created_at: DateTime<Utc>,

    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Look up a label, treating empty values as absent
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Look up an annotation, treating empty values as absent
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Severity derived from labels
    pub fn severity(&self) -> Severity {
        Severity::from_labels(&self.labels)
    }

    /// Incident title derived from annotations and labels
    pub fn incident_title(&self) -> String {
        if let Some(summary) = self.annotation("summary") {
            return summary.to_string();
        }

        match (self.label("alertname"), self.label("instance")) {
            (Some(name), Some(instance)) => format!("{name} on {instance}"),
            (Some(name), None) => name.to_string(),
            _ => "Unknown alert".to_string(),
        }
    }

    /// Whether this alert is firing and not yet attached to an incident
    pub fn needs_grouping(&self) -> bool {
        self.status == AlertStatus::Firing && self.incident_id.is_none()
    }
}

/// Compute a fingerprint from a label set.
///
/// Used when the upstream payload does not carry one. Produces 16 hex chars,
/// the same width Alertmanager uses.
pub fn fingerprint(labels: &LabelSet) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in labels {
        hasher.update(name.as_bytes());
        hasher.update([0xff]);
        hasher.update(value.as_bytes());
        hasher.update([0xff]);
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn alert_with(labels: LabelSet, annotations: LabelSet) -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            fingerprint: fingerprint(&labels),
            status: AlertStatus::Firing,
            starts_at: now,
            ends_at: None,
            labels,
            annotations,
            incident_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest]
    #[case("critical", Severity::Critical)]
    #[case("P0", Severity::Critical)]
    #[case("High", Severity::High)]
    #[case("p1", Severity::High)]
    #[case("MEDIUM", Severity::Medium)]
    #[case("p2", Severity::Medium)]
    #[case("low", Severity::Low)]
    #[case("p3", Severity::Low)]
    #[case("warning", Severity::Medium)]
    #[case("", Severity::Medium)]
    fn test_severity_from_label(#[case] input: &str, #[case] expected: Severity) {
        assert_eq!(Severity::from_label(input), expected);
    }

    #[test]
    fn test_severity_falls_back_to_priority() {
        assert_eq!(
            Severity::from_labels(&labels(&[("priority", "P1")])),
            Severity::High
        );
        assert_eq!(
            Severity::from_labels(&labels(&[("severity", "low"), ("priority", "p0")])),
            Severity::Low
        );
        assert_eq!(Severity::from_labels(&LabelSet::new()), Severity::Medium);
    }

    #[test]
    fn test_incident_title_precedence() {
        let with_summary = alert_with(
            labels(&[("alertname", "HighCPU"), ("instance", "web-1")]),
            labels(&[("summary", "CPU is melting")]),
        );
        assert_eq!(with_summary.incident_title(), "CPU is melting");

        let with_instance = alert_with(
            labels(&[("alertname", "HighCPU"), ("instance", "web-1")]),
            LabelSet::new(),
        );
        assert_eq!(with_instance.incident_title(), "HighCPU on web-1");

        let name_only = alert_with(labels(&[("alertname", "HighCPU")]), LabelSet::new());
        assert_eq!(name_only.incident_title(), "HighCPU");

        let bare = alert_with(labels(&[("job", "node")]), LabelSet::new());
        assert_eq!(bare.incident_title(), "Unknown alert");
    }

    #[test]
    fn test_fingerprint_is_stable_and_label_sensitive() {
        let a = labels(&[("alertname", "HighCPU"), ("service", "api")]);
        let b = labels(&[("service", "api"), ("alertname", "HighCPU")]);
        let c = labels(&[("alertname", "HighCPU"), ("service", "web")]);

        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
        assert_eq!(fingerprint(&a).len(), 16);
    }
}
