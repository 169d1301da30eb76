//! Process wiring
//!
//! Builds the component graph and runs the background tasks next to the
//! HTTP server, all sharing one cancellation token.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::alerting::AlertCorrelator;
use crate::api::{AppState, HttpServer};
use crate::config::{Config, NotificationConfig};
use crate::db::{MemoryStorage, Storage};
use crate::error::Result;
use crate::incident::{IncidentEvent, IncidentManager};
use crate::notify::{AdapterSet, NotificationService};

/// Assemble the components over a storage backend and adapter set.
///
/// The returned receiver carries lifecycle events and must be handed to
/// [`NotificationService::run`].
pub fn build(
    config: &NotificationConfig,
    storage: Arc<dyn Storage>,
    adapters: AdapterSet,
) -> (AppState, mpsc::UnboundedReceiver<IncidentEvent>) {
    let (incidents, events) = IncidentManager::new(storage.clone());
    let incidents = Arc::new(incidents);
    let correlator = Arc::new(AlertCorrelator::new(storage.clone(), incidents.clone()));
    let notifications = Arc::new(NotificationService::new(storage.clone(), adapters, config));

    let state = AppState {
        storage,
        correlator,
        incidents,
        notifications,
    };
    (state, events)
}

/// Spawn the event consumer, the batch sweep, the scheduler sweep and its
/// dispatcher
pub fn spawn_background(
    state: &AppState,
    events: mpsc::UnboundedReceiver<IncidentEvent>,
    shutdown: &CancellationToken,
) -> JoinSet<()> {
    let notifications = &state.notifications;
    let (due_tx, due_rx) = mpsc::unbounded_channel();

    let mut tasks = JoinSet::new();
    tasks.spawn(notifications.clone().run(events, shutdown.clone()));
    tasks.spawn(notifications.batcher().clone().run(shutdown.clone()));
    tasks.spawn(notifications.scheduler().clone().run(due_tx, shutdown.clone()));
    tasks.spawn(notifications.clone().run_scheduled(due_rx, shutdown.clone()));
    tasks
}

/// Run the service until `shutdown` is cancelled
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let adapters = AdapterSet::from_config(&config.notifications)?;
    let (state, events) = build(&config.notifications, storage, adapters);

    let mut tasks = spawn_background(&state, events, &shutdown);

    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    info!(addr = %addr, system = %config.notifications.system_name, "Starting AlertRelay");
    let served = HttpServer::new(state).serve(&addr, shutdown.clone()).await;

    // A server error stops the background tasks too
    shutdown.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Background task failed");
        }
    }

    served
}
