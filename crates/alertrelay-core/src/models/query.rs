//! Filter types shared between the API and storage layers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::Severity;
use super::incident::{Incident, IncidentStatus};
use super::notification::{NotificationHistory, NotificationStatus};

/// Sort order for incident listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentOrder {
    /// Oldest first
    #[default]
    CreatedAsc,
    /// Newest first
    CreatedDesc,
    /// Most severe first, then newest
    Severity,
}

/// Incident filter. `None` means "no constraint"; for `assignee_id`,
/// `Some("")` selects unassigned incidents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub assignee_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Option<IncidentOrder>,
}

impl IncidentFilter {
    /// Whether an incident passes the field constraints
    pub fn matches(&self, incident: &Incident) -> bool {
        if self.status.is_some_and(|s| s != incident.status) {
            return false;
        }
        if self.severity.is_some_and(|s| s != incident.severity) {
            return false;
        }
        match self.assignee_id.as_deref() {
            None => true,
            Some("") => incident.assignee_id.is_none(),
            Some(id) => incident.assignee_id.as_deref() == Some(id),
        }
    }

    /// Filter, sort and paginate a snapshot
    pub fn apply(&self, incidents: impl IntoIterator<Item = Incident>) -> Vec<Incident> {
        let mut matched: Vec<Incident> = incidents.into_iter().filter(|i| self.matches(i)).collect();

        match self.order_by.unwrap_or_default() {
            IncidentOrder::CreatedAsc => matched.sort_by_key(|i| i.created_at),
            IncidentOrder::CreatedDesc => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            IncidentOrder::Severity => matched.sort_by(|a, b| {
                a.severity
                    .cmp(&b.severity)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }

        paginate(matched, self.offset, self.limit)
    }
}

/// Delivery history filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub incident_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub status: Option<NotificationStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryFilter {
    /// Whether a record passes the field constraints
    pub fn matches(&self, record: &NotificationHistory) -> bool {
        self.incident_id.map_or(true, |id| record.incident_id == id)
            && self.channel_id.map_or(true, |id| record.channel_id == Some(id))
            && self.status.map_or(true, |s| record.status == s)
    }

    /// Filter and paginate a snapshot, newest first
    pub fn apply(&self, records: impl IntoIterator<Item = NotificationHistory>) -> Vec<NotificationHistory> {
        let mut matched: Vec<_> = records.into_iter().filter(|r| self.matches(r)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(matched, self.offset, self.limit)
    }
}

fn paginate<T>(items: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}
