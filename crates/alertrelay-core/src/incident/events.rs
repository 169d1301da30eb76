//! Lifecycle events consumed by the notification service

use crate::models::{Incident, NotificationType};

/// A lifecycle transition, carrying the incident snapshot taken right after it
#[derive(Debug, Clone)]
pub enum IncidentEvent {
    Created(Incident),
    Acknowledged(Incident),
    Resolved(Incident),
    Assigned(Incident),
}

impl IncidentEvent {
    /// Notification kind this event maps to
    pub fn kind(&self) -> NotificationType {
        match self {
            Self::Created(_) => NotificationType::IncidentCreated,
            Self::Acknowledged(_) => NotificationType::IncidentAcknowledged,
            Self::Resolved(_) => NotificationType::IncidentResolved,
            Self::Assigned(_) => NotificationType::IncidentAssigned,
        }
    }

    /// Snapshot reference
    pub fn incident(&self) -> &Incident {
        match self {
            Self::Created(i) | Self::Acknowledged(i) | Self::Resolved(i) | Self::Assigned(i) => i,
        }
    }

    /// Take the snapshot
    pub fn into_incident(self) -> Incident {
        match self {
            Self::Created(i) | Self::Acknowledged(i) | Self::Resolved(i) | Self::Assigned(i) => i,
        }
    }
}
