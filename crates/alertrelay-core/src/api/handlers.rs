//! API handlers for the HTTP REST API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::error::ApiResult;
use crate::alerting::{AlertCorrelator, WebhookOutcome};
use crate::db::Storage;
use crate::error::Error;
use crate::incident::IncidentManager;
use crate::models::{
    BulkOutcome, ChannelPreferences, ChannelType, HistoryFilter, Incident, IncidentFilter,
    NotificationChannel, NotificationHistory, NotificationTemplate, NotificationType,
    RenderedMessage, ResponseMetrics, ScheduledNotification, TemplateInput, TimelineEntry,
    WebhookPayload,
};
use crate::notify::{NotificationService, Recurrence};

/// Config keys holding provider endpoints
const URL_KEYS: [&str; 1] = ["api_url"];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub correlator: Arc<AlertCorrelator>,
    pub incidents: Arc<IncidentManager>,
    pub notifications: Arc<NotificationService>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: &'static str,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.storage.storage_type(),
    })
}

// === Webhook ===

/// Webhook acknowledgement
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

/// Alertmanager webhook receiver
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<Json<WebhookResponse>> {
    let outcome = state.correlator.process_webhook(&payload).await?;
    Ok(Json(WebhookResponse {
        status: "ok",
        outcome,
    }))
}

// === Incidents ===

/// List incidents
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(filter): Query<IncidentFilter>,
) -> ApiResult<Json<Vec<Incident>>> {
    Ok(Json(state.incidents.list(&filter).await?))
}

/// Get a single incident
pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.get(id).await?))
}

/// Administrative hard delete
pub async fn delete_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.incidents.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub assignee: String,
}

pub async fn acknowledge_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcknowledgeRequest>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.acknowledge(id, &req.assignee).await?))
}

/// Optional acting user
#[derive(Debug, Default, Deserialize)]
pub struct ActorRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn resolve_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ActorRequest>>,
) -> ApiResult<Json<Incident>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(state.incidents.resolve(id, req.actor.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assignee: String,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn assign_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(
        state
            .incidents
            .assign(id, &req.assignee, req.actor.as_deref())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub tag: String,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn add_tag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TagRequest>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(
        state
            .incidents
            .add_tag(id, &req.tag, req.actor.as_deref())
            .await?,
    ))
}

pub async fn remove_tag(
    State(state): State<AppState>,
    Path((id, tag)): Path<(Uuid, String)>,
    Query(query): Query<ActorRequest>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(
        state
            .incidents
            .remove_tag(id, &tag, query.actor.as_deref())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<TimelineEntry>)> {
    let entry = state
        .incidents
        .add_comment(id, req.author.as_deref(), &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Timeline in creation order
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<TimelineEntry>>> {
    Ok(Json(state.incidents.timeline(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BulkAcknowledgeRequest {
    pub ids: Vec<Uuid>,
    pub assignee: String,
}

pub async fn bulk_acknowledge(
    State(state): State<AppState>,
    Json(req): Json<BulkAcknowledgeRequest>,
) -> Json<BulkOutcome> {
    Json(state.incidents.bulk_acknowledge(&req.ids, &req.assignee).await)
}

#[derive(Debug, Deserialize)]
pub struct BulkResolveRequest {
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn bulk_resolve(
    State(state): State<AppState>,
    Json(req): Json<BulkResolveRequest>,
) -> Json<BulkOutcome> {
    Json(state.incidents.bulk_resolve(&req.ids, req.actor.as_deref()).await)
}

#[derive(Debug, Deserialize)]
pub struct BulkAssignRequest {
    pub ids: Vec<Uuid>,
    pub assignee: String,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn bulk_assign(
    State(state): State<AppState>,
    Json(req): Json<BulkAssignRequest>,
) -> Json<BulkOutcome> {
    Json(
        state
            .incidents
            .bulk_assign(&req.ids, &req.assignee, req.actor.as_deref())
            .await,
    )
}

/// MTTA / MTTR over all incidents
pub async fn incident_metrics(State(state): State<AppState>) -> ApiResult<Json<ResponseMetrics>> {
    Ok(Json(state.incidents.response_metrics().await?))
}

// === Channels ===

/// Channel create/replace request
#[derive(Debug, Deserialize)]
pub struct ChannelInput {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub preferences: Option<ChannelPreferences>,
    #[serde(default)]
    pub templates: HashMap<NotificationType, String>,
}

fn enabled_by_default() -> bool {
    true
}

/// Reject a channel whose overrides or endpoints would fail at send time
fn validate_channel(state: &AppState, input: &ChannelInput) -> crate::Result<()> {
    if input.name.trim().is_empty() {
        return Err(Error::validation("channel name is required"));
    }

    for key in URL_KEYS {
        if let Some(raw) = input.config.get(key).filter(|v| !v.trim().is_empty()) {
            url::Url::parse(raw)
                .map_err(|e| Error::validation(format!("invalid {key} '{raw}': {e}")))?;
        }
    }

    let renderer = state.notifications.renderer();
    for (kind, body) in &input.templates {
        renderer.validate(&TemplateInput {
            name: input.name.clone(),
            kind: *kind,
            channel: input.channel_type,
            subject: None,
            body: body.clone(),
            is_default: false,
        })?;
    }
    Ok(())
}

pub async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<Vec<NotificationChannel>>> {
    Ok(Json(state.storage.list_channels().await?))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(input): Json<ChannelInput>,
) -> ApiResult<(StatusCode, Json<NotificationChannel>)> {
    validate_channel(&state, &input)?;

    let mut channel = NotificationChannel::new(input.name, input.channel_type);
    channel.enabled = input.enabled;
    channel.config = input.config;
    channel.preferences = input.preferences;
    channel.templates = input.templates;
    state.storage.create_channel(&channel).await?;

    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NotificationChannel>> {
    let channel = state
        .storage
        .get_channel(id)
        .await?
        .ok_or_else(|| Error::not_found("Channel", id))?;
    Ok(Json(channel))
}

pub async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ChannelInput>,
) -> ApiResult<Json<NotificationChannel>> {
    validate_channel(&state, &input)?;

    let mut channel = state
        .storage
        .get_channel(id)
        .await?
        .ok_or_else(|| Error::not_found("Channel", id))?;
    channel.name = input.name;
    channel.channel_type = input.channel_type;
    channel.enabled = input.enabled;
    channel.config = input.config;
    channel.preferences = input.preferences;
    channel.templates = input.templates;
    channel.updated_at = Utc::now();
    state.storage.update_channel(&channel).await?;

    Ok(Json(channel))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.storage.delete_channel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// === Templates ===

pub async fn list_templates(State(state): State<AppState>) -> ApiResult<Json<Vec<NotificationTemplate>>> {
    Ok(Json(state.storage.list_templates().await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(input): Json<TemplateInput>,
) -> ApiResult<(StatusCode, Json<NotificationTemplate>)> {
    state.notifications.renderer().validate(&input)?;

    let template = input.into_template();
    state.storage.create_template(&template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NotificationTemplate>> {
    Ok(Json(stored_template(&state, id).await?))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<TemplateInput>,
) -> ApiResult<Json<NotificationTemplate>> {
    state.notifications.renderer().validate(&input)?;

    let existing = stored_template(&state, id).await?;
    let template = NotificationTemplate {
        id: existing.id,
        created_at: existing.created_at,
        updated_at: Utc::now(),
        ..input.into_template()
    };
    state.storage.update_template(&template).await?;
    Ok(Json(template))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.storage.delete_template(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
}

/// Validate without storing
pub async fn validate_template(
    State(state): State<AppState>,
    Json(input): Json<TemplateInput>,
) -> ApiResult<Json<ValidationResponse>> {
    state.notifications.renderer().validate(&input)?;
    Ok(Json(ValidationResponse { valid: true }))
}

/// Preview request: a stored template (`template_id`) or an inline one
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub template: Option<TemplateInput>,
    /// Render against this incident instead of the fixture
    #[serde(default)]
    pub incident_id: Option<Uuid>,
    #[serde(default)]
    pub channel_name: Option<String>,
}

pub async fn preview_template(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<Json<RenderedMessage>> {
    let input = match (req.template_id, req.template) {
        (Some(id), _) => {
            let stored = stored_template(&state, id).await?;
            TemplateInput {
                name: stored.name,
                kind: stored.kind,
                channel: stored.channel,
                subject: stored.subject,
                body: stored.body,
                is_default: stored.is_default,
            }
        }
        (None, Some(input)) => input,
        (None, None) => return Err(Error::validation("template_id or template is required").into()),
    };

    let incident = match req.incident_id {
        Some(id) => Some(state.incidents.get(id).await?),
        None => None,
    };
    let channel_name = req.channel_name.as_deref().unwrap_or("preview");

    let rendered = state
        .notifications
        .renderer()
        .preview(&input, incident.as_ref(), channel_name)?;
    Ok(Json(rendered))
}

async fn stored_template(state: &AppState, id: Uuid) -> crate::Result<NotificationTemplate> {
    state
        .storage
        .get_template(id)
        .await?
        .ok_or_else(|| Error::not_found("Template", id))
}

// === Scheduled notifications ===

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub incident_id: Uuid,
    pub channel_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RecurringRequest {
    pub incident_id: Uuid,
    pub channel_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub async fn list_scheduled(State(state): State<AppState>) -> Json<Vec<ScheduledNotification>> {
    Json(state.notifications.scheduler().list())
}

pub async fn get_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ScheduledNotification>> {
    Ok(Json(state.notifications.scheduler().get(id)?))
}

pub async fn create_scheduled(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<ScheduledNotification>)> {
    let entry = state
        .notifications
        .schedule_notification(req.incident_id, req.channel_id, req.kind, req.scheduled_at, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn create_recurring(
    State(state): State<AppState>,
    Json(req): Json<RecurringRequest>,
) -> ApiResult<(StatusCode, Json<Vec<ScheduledNotification>>)> {
    let entries = state
        .notifications
        .schedule_recurring(req.incident_id, req.channel_id, req.kind, &req.recurrence, req.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

/// Cancel a pending entry; dispatched or unknown entries are 404
pub async fn cancel_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ScheduledNotification>> {
    Ok(Json(state.notifications.scheduler().cancel(id)?))
}

// === History ===

pub async fn list_history(
    State(state): State<AppState>,
    Query(filter): Query<HistoryFilter>,
) -> ApiResult<Json<Vec<NotificationHistory>>> {
    Ok(Json(state.notifications.history().list(&filter).await?))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NotificationHistory>> {
    Ok(Json(state.notifications.history().get(id).await?))
}

/// Delivery receipt from a provider callback: sent -> delivered
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NotificationHistory>> {
    Ok(Json(state.notifications.history().mark_delivered(id).await?))
}
