//! API routes

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Alert ingestion
        .route("/api/v1/webhooks/alertmanager", post(handlers::receive_webhook))

        // Incidents
        .route("/api/v1/incidents", get(handlers::list_incidents))
        .route("/api/v1/incidents/metrics", get(handlers::incident_metrics))
        .route("/api/v1/incidents/bulk/acknowledge", post(handlers::bulk_acknowledge))
        .route("/api/v1/incidents/bulk/resolve", post(handlers::bulk_resolve))
        .route("/api/v1/incidents/bulk/assign", post(handlers::bulk_assign))
        .route(
            "/api/v1/incidents/:id",
            get(handlers::get_incident).delete(handlers::delete_incident),
        )
        .route("/api/v1/incidents/:id/acknowledge", post(handlers::acknowledge_incident))
        .route("/api/v1/incidents/:id/resolve", post(handlers::resolve_incident))
        .route("/api/v1/incidents/:id/assign", post(handlers::assign_incident))
        .route("/api/v1/incidents/:id/tags", post(handlers::add_tag))
        .route("/api/v1/incidents/:id/tags/:tag", delete(handlers::remove_tag))
        .route("/api/v1/incidents/:id/comments", post(handlers::add_comment))
        .route("/api/v1/incidents/:id/timeline", get(handlers::get_timeline))

        // Notification channels
        .route(
            "/api/v1/channels",
            get(handlers::list_channels).post(handlers::create_channel),
        )
        .route(
            "/api/v1/channels/:id",
            get(handlers::get_channel)
                .put(handlers::update_channel)
                .delete(handlers::delete_channel),
        )

        // Templates
        .route(
            "/api/v1/templates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route("/api/v1/templates/validate", post(handlers::validate_template))
        .route("/api/v1/templates/preview", post(handlers::preview_template))
        .route(
            "/api/v1/templates/:id",
            get(handlers::get_template)
                .put(handlers::update_template)
                .delete(handlers::delete_template),
        )

        // Scheduled notifications
        .route(
            "/api/v1/scheduled",
            get(handlers::list_scheduled).post(handlers::create_scheduled),
        )
        .route("/api/v1/scheduled/recurring", post(handlers::create_recurring))
        .route(
            "/api/v1/scheduled/:id",
            get(handlers::get_scheduled).delete(handlers::cancel_scheduled),
        )

        // Delivery history
        .route("/api/v1/history", get(handlers::list_history))
        .route("/api/v1/history/:id", get(handlers::get_history))
        .route("/api/v1/history/:id/delivered", post(handlers::confirm_delivery))

        .with_state(state)
}
