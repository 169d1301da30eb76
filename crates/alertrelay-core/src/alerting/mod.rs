//! Alert ingestion for AlertRelay
//!
//! Deduplicates webhook alerts by fingerprint and groups firing alerts into
//! incidents.

mod correlator;

pub use correlator::{AlertCorrelator, WebhookOutcome, GROUPING_LABELS};
