//! Notification template rendering using Handlebars
//!
//! Templates see a fixed variable set ([`TemplateContext`]) and four
//! helpers:
//! - `{{upper x}}` / `{{lower x}}` for case folding
//! - `{{formatTime t "%H:%M"}}` for RFC 3339 timestamps
//! - `{{duration from to}}` for the human-readable span between two
//!   timestamps (`to` defaults to now when null)
//!
//! Rendering is strict: an unknown variable or helper is an error.

use chrono::{DateTime, Duration, Utc};
use handlebars::{
    Context as HbsContext, Handlebars, Helper, HelperResult, Output, RenderContext,
    RenderErrorReason,
};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use super::defaults;
use crate::error::{Error, Result};
use crate::models::{
    Incident, IncidentStatus, LabelSet, NotificationChannel, NotificationTemplate,
    NotificationType, RenderedMessage, Severity, TemplateInput,
};

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Variables available to every template
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    pub incident: &'a Incident,
    pub timestamp: DateTime<Utc>,
    pub system_name: &'a str,
    pub system_url: &'a str,
    pub channel_name: &'a str,
    pub severity: Severity,
    pub status: IncidentStatus,
}

/// Subject and body sources picked for one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    /// Stored template in use, if any
    pub template_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
}

/// Pick the template for a channel and notification kind.
///
/// Body: the channel's per-type override, else the stored default, else the
/// built-in. Subject: the stored default's subject, else the built-in.
pub fn resolve_template(
    channel: &NotificationChannel,
    kind: NotificationType,
    stored_default: Option<&NotificationTemplate>,
) -> ResolvedTemplate {
    let builtin = defaults::builtin(kind, channel.channel_type);

    let subject = stored_default
        .and_then(|t| t.subject.clone())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| builtin.subject.to_string());

    let base_body = stored_default.map_or(builtin.body, |t| t.body.as_str());
    let body = channel
        .templates
        .get(&kind)
        .filter(|b| !b.trim().is_empty())
        .map_or(base_body, String::as_str)
        .to_string();

    ResolvedTemplate {
        template_id: stored_default.map(|t| t.id),
        subject,
        body,
    }
}

/// Compiles and evaluates notification templates
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    system_name: String,
    system_url: String,
}

impl TemplateRenderer {
    /// Create a renderer with the helper set registered
    pub fn new(system_name: impl Into<String>, system_url: impl Into<String>) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));
        handlebars.register_helper("formatTime", Box::new(format_time_helper));
        handlebars.register_helper("duration", Box::new(duration_helper));

        Self {
            handlebars,
            system_name: system_name.into(),
            system_url: system_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the variable set for an incident
    pub fn context<'a>(&'a self, incident: &'a Incident, channel_name: &'a str) -> TemplateContext<'a> {
        TemplateContext {
            incident,
            timestamp: Utc::now(),
            system_name: &self.system_name,
            system_url: &self.system_url,
            channel_name,
            severity: incident.severity,
            status: incident.status,
        }
    }

    /// Render one template string
    pub fn render_str(&self, template: &str, context: &TemplateContext<'_>) -> Result<String> {
        Ok(self.handlebars.render_template(template, context)?)
    }

    /// Render subject and body
    pub fn render(
        &self,
        subject: &str,
        body: &str,
        context: &TemplateContext<'_>,
    ) -> Result<RenderedMessage> {
        Ok(RenderedMessage {
            subject: self.render_str(subject, context)?.trim().to_string(),
            content: self.render_str(body, context)?,
        })
    }

    /// Render a resolved template for an incident on a channel
    pub fn render_for(
        &self,
        template: &ResolvedTemplate,
        incident: &Incident,
        channel_name: &str,
    ) -> Result<RenderedMessage> {
        let context = self.context(incident, channel_name);
        self.render(&template.subject, &template.body, &context)
    }

    /// Reject a template before it is stored.
    ///
    /// Checks required fields, then renders subject and body against a
    /// fully populated fixture so every expression and helper resolves.
    pub fn validate(&self, input: &TemplateInput) -> Result<()> {
        if input.name.trim().is_empty() {
            return Err(Error::validation("template name is required"));
        }
        if input.body.trim().is_empty() {
            return Err(Error::validation("template body is required"));
        }

        let fixture = fixture_incident();
        let context = self.context(&fixture, "validation");
        self.render_str(&input.body, &context)
            .map_err(|e| Error::validation(format!("invalid body: {e}")))?;
        if let Some(subject) = &input.subject {
            self.render_str(subject, &context)
                .map_err(|e| Error::validation(format!("invalid subject: {e}")))?;
        }
        Ok(())
    }

    /// Validate, then render against `incident` (or the fixture)
    pub fn preview(
        &self,
        input: &TemplateInput,
        incident: Option<&Incident>,
        channel_name: &str,
    ) -> Result<RenderedMessage> {
        self.validate(input)?;

        let fixture;
        let incident = match incident {
            Some(i) => i,
            None => {
                fixture = fixture_incident();
                &fixture
            }
        };

        let subject = input
            .subject
            .as_deref()
            .unwrap_or(defaults::builtin(input.kind, input.channel).subject);
        let context = self.context(incident, channel_name);
        self.render(subject, &input.body, &context)
    }
}

/// A synthetic incident with every optional field populated
pub fn fixture_incident() -> Incident {
    let created_at = Utc::now() - Duration::minutes(42);
    let acked_at = created_at + Duration::minutes(5);
    let resolved_at = created_at + Duration::minutes(40);

    let labels: LabelSet = [
        ("alertname", "HighCPU"),
        ("instance", "web-1"),
        ("service", "api"),
        ("severity", "critical"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Incident {
        id: Uuid::nil(),
        title: "HighCPU on web-1".to_string(),
        description: "CPU usage above 90% for 5 minutes".to_string(),
        status: IncidentStatus::Resolved,
        severity: Severity::Critical,
        created_at,
        updated_at: resolved_at,
        acked_at: Some(acked_at),
        resolved_at: Some(resolved_at),
        assignee_id: Some("on-call".to_string()),
        alert_ids: vec![Uuid::nil()],
        labels,
        tags: BTreeSet::from(["fixture".to_string()]),
        version: 0,
    }
}

fn string_param<'a>(h: &'a Helper, index: usize, helper: &str) -> std::result::Result<&'a str, RenderErrorReason> {
    h.param(index)
        .and_then(|p| p.value().as_str())
        .ok_or_else(|| RenderErrorReason::Other(format!("{helper} expects a string parameter")))
}

fn parse_time(raw: &str, helper: &str) -> std::result::Result<DateTime<Utc>, RenderErrorReason> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RenderErrorReason::Other(format!("{helper}: invalid timestamp '{raw}': {e}")))
}

fn upper_helper(
    h: &Helper,
    _: &Handlebars,
    _: &HbsContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&string_param(h, 0, "upper")?.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &Helper,
    _: &Handlebars,
    _: &HbsContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&string_param(h, 0, "lower")?.to_lowercase())?;
    Ok(())
}

/// `{{formatTime time "fmt"}}`; null renders as an empty string
fn format_time_helper(
    h: &Helper,
    _: &Handlebars,
    _: &HbsContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let param = h
        .param(0)
        .ok_or_else(|| RenderErrorReason::Other("formatTime expects a timestamp".to_string()))?;
    if param.value().is_null() {
        return Ok(());
    }

    let time = parse_time(string_param(h, 0, "formatTime")?, "formatTime")?;
    let format = h
        .param(1)
        .and_then(|p| p.value().as_str())
        .unwrap_or(DEFAULT_TIME_FORMAT);

    out.write(&time.format(format).to_string())?;
    Ok(())
}

/// `{{duration from to}}`; a null `to` means now
fn duration_helper(
    h: &Helper,
    _: &Handlebars,
    _: &HbsContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let from = parse_time(string_param(h, 0, "duration")?, "duration")?;
    let to = match h.param(1).map(|p| p.value()) {
        Some(value) if !value.is_null() => parse_time(
            value
                .as_str()
                .ok_or_else(|| RenderErrorReason::Other("duration expects timestamps".to_string()))?,
            "duration",
        )?,
        _ => Utc::now(),
    };

    let seconds = (to - from).num_seconds().max(0);
    let span = std::time::Duration::from_secs(seconds.unsigned_abs());
    out.write(&humantime::format_duration(span).to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelType;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new("AlertRelay", "https://relay.example.com/")
    }

    fn input(body: &str) -> TemplateInput {
        TemplateInput {
            name: "custom".to_string(),
            kind: NotificationType::IncidentCreated,
            channel: ChannelType::Chat,
            subject: None,
            body: body.to_string(),
            is_default: false,
        }
    }

    fn incident() -> Incident {
        let mut incident = fixture_incident();
        incident.created_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        incident.acked_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap());
        incident.resolved_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 30, 0).unwrap());
        incident
    }

    #[test]
    fn test_helpers() {
        let r = renderer();
        let incident = incident();
        let ctx = r.context(&incident, "ops");

        assert_eq!(r.render_str("{{upper severity}}", &ctx).unwrap(), "CRITICAL");
        assert_eq!(r.render_str("{{lower \"MiXeD\"}}", &ctx).unwrap(), "mixed");
        assert_eq!(
            r.render_str("{{formatTime incident.created_at \"%H:%M\"}}", &ctx).unwrap(),
            "10:00"
        );
        assert_eq!(
            r.render_str("{{duration incident.created_at incident.acked_at}}", &ctx).unwrap(),
            "15m"
        );
        assert_eq!(
            r.render_str("{{duration incident.created_at incident.resolved_at}}", &ctx).unwrap(),
            "1h 30m"
        );
        assert_eq!(
            r.render_str("{{system_url}} {{channel_name}}", &ctx).unwrap(),
            "https://relay.example.com ops"
        );
    }

    #[test]
    fn test_no_html_escaping() {
        let r = renderer();
        let mut incident = incident();
        incident.title = "<b>p99 > 2s</b> & rising".to_string();
        let ctx = r.context(&incident, "ops");
        assert_eq!(
            r.render_str("{{incident.title}}", &ctx).unwrap(),
            "<b>p99 > 2s</b> & rising"
        );
    }

    #[test]
    fn test_validate_fails_closed() {
        let r = renderer();
        assert!(r.validate(&input("{{incident.title}} is {{status}}")).is_ok());

        for bad in [
            "{{incident.nope}}",
            "{{shout incident.title}}",
            "{{#if status}}unterminated",
            "   ",
        ] {
            assert!(
                matches!(r.validate(&input(bad)), Err(Error::Validation(_))),
                "{bad:?} should be rejected"
            );
        }

        let mut unnamed = input("{{status}}");
        unnamed.name = String::new();
        assert!(r.validate(&unnamed).is_err());

        let mut bad_subject = input("{{status}}");
        bad_subject.subject = Some("{{missing}}".to_string());
        assert!(r.validate(&bad_subject).is_err());
    }

    #[test]
    fn test_every_builtin_renders() {
        let r = renderer();
        let incident = incident();
        for kind in NotificationType::ALL {
            for channel in ChannelType::ALL {
                let builtin = defaults::builtin(kind, channel);
                let ctx = r.context(&incident, "ops");
                let message = r.render(builtin.subject, builtin.body, &ctx).unwrap();
                assert!(message.content.contains(&incident.title), "{kind}/{channel}");
                assert!(!message.subject.is_empty());
            }
        }
    }

    #[test]
    fn test_override_replaces_only_the_body() {
        let mut channel = NotificationChannel::new("ops", ChannelType::Chat);
        let kind = NotificationType::IncidentCreated;

        let plain = resolve_template(&channel, kind, None);
        assert_eq!(plain.body, defaults::builtin(kind, ChannelType::Chat).body);
        assert_eq!(plain.template_id, None);

        let mut stored = input("stored {{incident.title}}").into_template();
        stored.subject = Some("stored subject".to_string());
        stored.is_default = true;

        let from_store = resolve_template(&channel, kind, Some(&stored));
        assert_eq!(from_store.body, "stored {{incident.title}}");
        assert_eq!(from_store.subject, "stored subject");
        assert_eq!(from_store.template_id, Some(stored.id));

        channel
            .templates
            .insert(kind, "override {{incident.title}}".to_string());
        let overridden = resolve_template(&channel, kind, Some(&stored));
        assert_eq!(overridden.body, "override {{incident.title}}");
        assert_eq!(overridden.subject, "stored subject");

        // Overrides for other kinds do not leak
        let other = resolve_template(&channel, NotificationType::IncidentResolved, None);
        assert_eq!(
            other.body,
            defaults::builtin(NotificationType::IncidentResolved, ChannelType::Chat).body
        );
    }

    #[test]
    fn test_preview_uses_builtin_subject_when_missing() {
        let r = renderer();
        let incident = incident();
        let message = r
            .preview(&input("Body for {{incident.title}}"), Some(&incident), "ops")
            .unwrap();
        assert_eq!(message.content, "Body for HighCPU on web-1");
        assert_eq!(message.subject, "[CRITICAL] Incident opened: HighCPU on web-1");
    }
}
