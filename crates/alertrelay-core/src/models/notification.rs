//! Notification channel, template, history and scheduling models

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::alert::Severity;
use super::incident::Incident;

/// Delivery channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Chat workspace (Slack-compatible `chat.postMessage`)
    #[serde(alias = "slack")]
    Chat,
    /// SMTP email
    Email,
    /// Bot messaging (Telegram-compatible `sendMessage`)
    #[serde(alias = "telegram")]
    Bot,
}

impl ChannelType {
    /// All channel types
    pub const ALL: [Self; 3] = [Self::Chat, Self::Email, Self::Bot];

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Email => "email",
            Self::Bot => "bot",
        }
    }

    /// Config key holding the recipient for this channel type
    pub fn recipient_key(self) -> &'static str {
        match self {
            Self::Chat => "channel",
            Self::Email => "to",
            Self::Bot => "chat_id",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of notification emitted for a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A new incident was opened
    IncidentCreated,
    /// An incident was acknowledged
    IncidentAcknowledged,
    /// An incident was resolved
    IncidentResolved,
    /// An incident changed owner
    IncidentAssigned,
}

impl NotificationType {
    /// All notification types
    pub const ALL: [Self; 4] = [
        Self::IncidentCreated,
        Self::IncidentAcknowledged,
        Self::IncidentResolved,
        Self::IncidentAssigned,
    ];

    /// Snake case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncidentCreated => "incident_created",
            Self::IncidentAcknowledged => "incident_acknowledged",
            Self::IncidentResolved => "incident_resolved",
            Self::IncidentAssigned => "incident_assigned",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured delivery target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    /// Unique identifier
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Channel type
    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Whether deliveries are attempted at all
    pub enabled: bool,

    /// Credentials and target. Missing fields fall back to global defaults.
    #[serde(default)]
    pub config: HashMap<String, String>,

    /// Delivery preferences
    #[serde(default)]
    pub preferences: Option<ChannelPreferences>,

    /// Per-type body overrides
    #[serde(default)]
    pub templates: HashMap<NotificationType, String>,

    /// When the channel was created
    pub created_at: DateTime<Utc>,

    /// When the channel was last updated
    pub updated_at: DateTime<Utc>,
}

impl NotificationChannel {
    /// Create an enabled channel with no preferences
    pub fn new(name: impl Into<String>, channel_type: ChannelType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            channel_type,
            enabled: true,
            config: HashMap::new(),
            preferences: None,
            templates: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective preferences (defaults when unset)
    pub fn preferences(&self) -> ChannelPreferences {
        self.preferences.clone().unwrap_or_default()
    }

    /// Decide whether this channel sits out an incident of `severity` at
    /// `now`. A disabled channel wins over any preference.
    pub fn skip_reason(&self, severity: Severity, now: DateTime<Utc>) -> Option<SkipReason> {
        if !self.enabled {
            return Some(SkipReason::Disabled);
        }
        self.preferences().skip_reason(severity, now)
    }
}

/// Per-channel delivery preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPreferences {
    /// Channel receives anything at all
    pub opt_in: bool,

    /// Only these severities are delivered (empty = all)
    pub severity_filter: Vec<Severity>,

    /// Suppression window
    pub quiet_hours: Option<QuietHours>,

    /// Hand notifications to the batch aggregator instead of sending
    pub batching_enabled: bool,

    /// Flush threshold (0 = use the global default)
    pub max_batch_size: usize,

    /// Flush age (None = use the global default)
    #[serde(with = "humantime_serde")]
    pub batching_interval: Option<Duration>,
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        Self {
            opt_in: true,
            severity_filter: Vec::new(),
            quiet_hours: None,
            batching_enabled: false,
            max_batch_size: 0,
            batching_interval: None,
        }
    }
}

/// Why a channel was skipped for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Channel disabled
    Disabled,
    /// Preferences opt out
    OptedOut,
    /// Severity not in filter
    SeverityFiltered,
    /// Inside quiet hours
    QuietHours,
}

impl ChannelPreferences {
    /// Decide whether an incident of `severity` is suppressed at `now`
    pub fn skip_reason(&self, severity: Severity, now: DateTime<Utc>) -> Option<SkipReason> {
        if !self.opt_in {
            return Some(SkipReason::OptedOut);
        }
        if !self.severity_filter.is_empty() && !self.severity_filter.contains(&severity) {
            return Some(SkipReason::SeverityFiltered);
        }
        if self.quiet_hours.as_ref().is_some_and(|q| q.is_active(now)) {
            return Some(SkipReason::QuietHours);
        }
        None
    }
}

/// A daily suppression window, evaluated in UTC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Window is honoured
    pub enabled: bool,

    /// Start of the window ("HH:MM")
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,

    /// End of the window ("HH:MM"), exclusive
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,

    /// Days the window applies to (empty = every day)
    #[serde(default)]
    pub days: Vec<Weekday>,
}

impl QuietHours {
    /// Whether `now` falls inside the window.
    ///
    /// The weekday is checked first, then the time of day. `start > end`
    /// wraps past midnight.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.days.is_empty() && !self.days.contains(&now.weekday()) {
            return false;
        }

        let time = now.time();

        if self.start_time <= self.end_time {
            time >= self.start_time && time < self.end_time
        } else {
            time >= self.start_time || time < self.end_time
        }
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{raw}': {e}")))
    }
}

/// A stored notification template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    /// Unique identifier
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Notification kind this template renders
    #[serde(rename = "type")]
    pub kind: NotificationType,

    /// Channel type this template targets
    pub channel: ChannelType,

    /// Subject template (email subject, chat headline)
    pub subject: Option<String>,

    /// Body template
    pub body: String,

    /// Used for every channel of this type unless overridden
    pub is_default: bool,

    /// When the template was created
    pub created_at: DateTime<Utc>,

    /// When the template was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub channel: ChannelType,
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub is_default: bool,
}

impl TemplateInput {
    /// Materialize into a template with a fresh id
    pub fn into_template(self) -> NotificationTemplate {
        let now = Utc::now();
        NotificationTemplate {
            id: Uuid::new_v4(),
            name: self.name,
            kind: self.kind,
            channel: self.channel,
            subject: self.subject,
            body: self.body,
            is_default: self.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rendered subject and content ready for an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub content: String,
}

/// Delivery status of a history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Recorded, no attempt finished yet
    Pending,
    /// Provider accepted the message
    Sent,
    /// Provider confirmed delivery
    Delivered,
    /// Gave up
    Failed,
    /// A retryable attempt failed, another is coming
    Retrying,
}

impl NotificationStatus {
    /// Allowed forward transitions
    pub fn can_transition_to(self, next: Self) -> bool {
        use NotificationStatus::{Delivered, Failed, Pending, Retrying, Sent};
        matches!(
            (self, next),
            (Pending, Sent | Failed | Retrying)
                | (Retrying, Retrying | Sent | Failed)
                | (Sent, Delivered)
        )
    }
}

/// One delivery attempt context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationHistory {
    /// Unique identifier
    pub id: Uuid,

    /// Incident the notification is about
    pub incident_id: Uuid,

    /// Channel (None for the credentials-only legacy broadcast)
    pub channel_id: Option<Uuid>,

    /// Stored template used, if any
    pub template_id: Option<Uuid>,

    /// Notification kind
    #[serde(rename = "type")]
    pub kind: NotificationType,

    /// Channel type
    pub channel: ChannelType,

    /// Target (chat channel, email address, chat id)
    pub recipient: String,

    /// Rendered subject
    pub subject: String,

    /// Rendered content
    pub content: String,

    /// Delivery status
    pub status: NotificationStatus,

    /// Last error text
    pub error_msg: Option<String>,

    /// Delivery attempts made
    pub attempts: u32,

    /// Batch this record was delivered in
    pub batch_id: Option<Uuid>,

    /// When the provider accepted it
    pub sent_at: Option<DateTime<Utc>>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a batch record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Accepting items
    Open,
    /// Digest delivered
    Processed,
    /// Digest delivery failed
    Failed,
}

/// A digest of same-channel same-type notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBatch {
    /// Unique identifier
    pub id: Uuid,

    /// Target channel
    pub channel_id: Uuid,

    /// Notification kind
    #[serde(rename = "type")]
    pub kind: NotificationType,

    /// Number of items
    pub count: usize,

    /// History record ids, in arrival order
    pub notifications: Vec<Uuid>,

    /// Status
    pub status: BatchStatus,

    /// When the bucket was opened
    pub created_at: DateTime<Utc>,

    /// When the bucket was flushed
    pub processed_at: Option<DateTime<Utc>>,
}

/// Status of a scheduled notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledStatus {
    /// Waiting for `scheduled_at`
    Pending,
    /// Released to the dispatcher
    Dispatched,
}

/// A notification deferred to a future time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    /// Unique identifier
    pub id: Uuid,

    /// Incident snapshot taken at scheduling time
    pub incident: Incident,

    /// Target channel
    pub channel_id: Uuid,

    /// Type of the target channel when it was scheduled
    pub channel: ChannelType,

    /// Notification kind
    #[serde(rename = "type")]
    pub kind: NotificationType,

    /// Release time
    pub scheduled_at: DateTime<Utc>,

    /// Status
    pub status: ScheduledStatus,

    /// Caller supplied metadata (recurrence index, reason, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// When it was scheduled
    pub created_at: DateTime<Utc>,
}
