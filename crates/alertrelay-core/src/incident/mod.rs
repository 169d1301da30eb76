//! Incident lifecycle
//!
//! [`IncidentManager`] owns the open -> acknowledged -> resolved state
//! machine, the timeline and response metrics. Every transition that
//! matters to humans is published as an [`IncidentEvent`].

mod events;
mod manager;

pub use events::IncidentEvent;
pub use manager::IncidentManager;
