//! Notification pipeline
//!
//! Leaf first: templates and built-in defaults, delivery adapters, the retry
//! executor, the history ledger, the batch aggregator and the scheduler.
//! [`NotificationService`] ties them together.

pub mod channels;
mod batch;
mod defaults;
mod delivery;
mod history;
mod retry;
mod scheduler;
mod service;
mod templates;

pub use batch::{BatchAggregator, BatchEntry};
pub use channels::{AdapterSet, DeliveryAdapter, DeliveryError, OutboundMessage};
pub use defaults::{builtin, BuiltinTemplate};
pub use delivery::{DeliveryReport, Dispatcher};
pub use history::{HistoryDraft, HistoryLedger};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy, Retryable};
pub use scheduler::{Recurrence, Scheduler};
pub use service::{NotificationService, NotifyReport};
pub use templates::{fixture_incident, resolve_template, ResolvedTemplate, TemplateContext, TemplateRenderer};
