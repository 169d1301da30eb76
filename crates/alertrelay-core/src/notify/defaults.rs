//! Built-in templates for every (notification type, channel type) pair

use crate::models::{ChannelType, NotificationType};

/// A built-in subject/body pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinTemplate {
    pub subject: &'static str,
    pub body: &'static str,
}

/// Built-in template for a pair. Every pair has one.
pub fn builtin(kind: NotificationType, channel: ChannelType) -> BuiltinTemplate {
    use ChannelType::{Bot, Chat, Email};
    use NotificationType::{
        IncidentAcknowledged, IncidentAssigned, IncidentCreated, IncidentResolved,
    };

    let subject = match kind {
        IncidentCreated => "[{{upper severity}}] Incident opened: {{incident.title}}",
        IncidentAcknowledged => "[{{upper severity}}] Incident acknowledged: {{incident.title}}",
        IncidentResolved => "[RESOLVED] {{incident.title}}",
        IncidentAssigned => "[{{upper severity}}] Incident assigned: {{incident.title}}",
    };

    let body = match (kind, channel) {
        (IncidentCreated, Chat) => concat!(
            ":rotating_light: *{{incident.title}}*\n",
            "Severity: *{{upper severity}}* | Status: {{status}}\n",
            "Opened: {{formatTime incident.created_at \"%Y-%m-%d %H:%M:%S UTC\"}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentAcknowledged, Chat) => concat!(
            ":eyes: *{{incident.title}}* acknowledged",
            "{{#if incident.assignee_id}} by {{incident.assignee_id}}{{/if}}\n",
            "Time to acknowledge: {{duration incident.created_at incident.acked_at}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentResolved, Chat) => concat!(
            ":white_check_mark: *{{incident.title}}* resolved\n",
            "Open for {{duration incident.created_at incident.resolved_at}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentAssigned, Chat) => concat!(
            ":bust_in_silhouette: *{{incident.title}}* assigned to {{incident.assignee_id}}\n",
            "Severity: *{{upper severity}}* | Status: {{status}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentCreated, Email) => concat!(
            "A new {{lower severity}} incident was opened in {{system_name}}.\n\n",
            "Title:    {{incident.title}}\n",
            "Severity: {{upper severity}}\n",
            "Status:   {{status}}\n",
            "Opened:   {{formatTime incident.created_at \"%Y-%m-%d %H:%M:%S UTC\"}}\n",
            "{{#if incident.description}}\n{{incident.description}}\n{{/if}}\n",
            "Details: {{system_url}}/incidents/{{incident.id}}\n"
        ),
        (IncidentAcknowledged, Email) => concat!(
            "Incident \"{{incident.title}}\" was acknowledged",
            "{{#if incident.assignee_id}} by {{incident.assignee_id}}{{/if}}.\n\n",
            "Acknowledged: {{formatTime incident.acked_at \"%Y-%m-%d %H:%M:%S UTC\"}}\n",
            "Time to acknowledge: {{duration incident.created_at incident.acked_at}}\n\n",
            "Details: {{system_url}}/incidents/{{incident.id}}\n"
        ),
        (IncidentResolved, Email) => concat!(
            "Incident \"{{incident.title}}\" was resolved.\n\n",
            "Resolved: {{formatTime incident.resolved_at \"%Y-%m-%d %H:%M:%S UTC\"}}\n",
            "Time to resolve: {{duration incident.created_at incident.resolved_at}}\n\n",
            "Details: {{system_url}}/incidents/{{incident.id}}\n"
        ),
        (IncidentAssigned, Email) => concat!(
            "Incident \"{{incident.title}}\" is now assigned to {{incident.assignee_id}}.\n\n",
            "Severity: {{upper severity}}\n",
            "Status:   {{status}}\n\n",
            "Details: {{system_url}}/incidents/{{incident.id}}\n"
        ),
        (IncidentCreated, Bot) => concat!(
            "🚨 [{{upper severity}}] {{incident.title}}\n",
            "Status: {{status}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentAcknowledged, Bot) => concat!(
            "👀 Acknowledged: {{incident.title}}",
            "{{#if incident.assignee_id}} ({{incident.assignee_id}}){{/if}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentResolved, Bot) => concat!(
            "✅ Resolved: {{incident.title}} after {{duration incident.created_at incident.resolved_at}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
        (IncidentAssigned, Bot) => concat!(
            "👤 {{incident.title}} assigned to {{incident.assignee_id}}\n",
            "{{system_url}}/incidents/{{incident.id}}"
        ),
    };

    BuiltinTemplate { subject, body }
}
