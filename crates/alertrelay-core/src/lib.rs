//! # AlertRelay
//!
//! Alert correlation, incident lifecycle and notification delivery.
//!
//! AlertRelay receives Alertmanager webhooks, deduplicates alerts by
//! fingerprint, groups them into incidents and notifies chat, email and
//! bot channels about every lifecycle change.
//!
//! ## Architecture
//!
//! - **Alerting**: fingerprint dedup and label-based grouping
//! - **Incident**: state machine, timeline and MTTA/MTTR
//! - **Notify**: templates, adapters, retries, batching and scheduling
//! - **API**: REST API for the webhook and management endpoints
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the server
//! alertrelay serve
//!
//! # Check a template before uploading it
//! alertrelay validate-template created.hbs --kind incident_created --channel chat
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod incident;
pub mod models;
pub mod notify;

pub use crate::config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::AlertCorrelator;
    pub use crate::config::Config;
    pub use crate::db::{MemoryStorage, Storage};
    pub use crate::error::{Error, Result};
    pub use crate::incident::{IncidentEvent, IncidentManager};
    pub use crate::models::*;
    pub use crate::notify::NotificationService;
}
