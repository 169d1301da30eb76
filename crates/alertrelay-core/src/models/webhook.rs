//! Alertmanager webhook payload

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::alert::{fingerprint, AlertStatus, LabelSet};

/// Payload posted by Alertmanager's webhook receiver
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookPayload {
    pub version: String,
    pub group_key: String,
    pub receiver: String,
    pub status: String,
    pub alerts: Vec<WebhookAlert>,
    pub group_labels: LabelSet,
    pub common_labels: LabelSet,
    pub common_annotations: LabelSet,
    #[serde(rename = "externalURL")]
    pub external_url: String,
}

/// A single alert inside a webhook payload
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    /// Alertmanager fingerprint; computed from labels when absent
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub status: String,
    #[serde(default)]
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    pub starts_at: DateTime<Utc>,
    /// Alertmanager sends `0001-01-01T00:00:00Z` for firing alerts
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
}

impl WebhookAlert {
    /// Dedup key for this alert
    pub fn fingerprint(&self) -> String {
        self.fingerprint
            .as_deref()
            .filter(|f| !f.is_empty())
            .map_or_else(|| fingerprint(&self.labels), str::to_string)
    }

    /// Parsed status
    pub fn status(&self) -> AlertStatus {
        AlertStatus::parse(&self.status)
    }

    /// End time, with the zero timestamp treated as unset
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at.filter(|t| t.year() > 1)
    }
}
