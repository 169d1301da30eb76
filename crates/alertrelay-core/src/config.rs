//! Configuration management for AlertRelay

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Environment variable prefix for overrides (`ALERTRELAY_SERVER__HTTP_PORT=9000`)
pub const ENV_PREFIX: &str = "ALERTRELAY";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Notification pipeline configuration
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file, and the environment.
    ///
    /// Later sources win: environment variables override the file, which
    /// overrides the built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// HTTP API port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Notification pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Name used in templates and digests
    pub system_name: String,
    /// Link back to the dashboard
    pub system_url: String,
    /// Timeout applied to every outbound HTTP/SMTP call
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Delivery retry policy
    pub retry: RetryConfig,
    /// Batch aggregator defaults
    pub batching: BatchingConfig,
    /// Scheduler settings
    pub scheduler: SchedulerConfig,
    /// Global chat credentials
    pub slack: SlackDefaults,
    /// Global SMTP credentials
    pub email: EmailDefaults,
    /// Global bot credentials
    pub telegram: TelegramDefaults,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            system_name: "AlertRelay".to_string(),
            system_url: "http://localhost:8080".to_string(),
            http_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            batching: BatchingConfig::default(),
            scheduler: SchedulerConfig::default(),
            slack: SlackDefaults::default(),
            email: EmailDefaults::default(),
            telegram: TelegramDefaults::default(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for a single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Batch aggregator defaults, used when a channel leaves them unset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Items that trigger a synchronous flush
    pub max_batch_size: usize,
    /// Age after which the sweep flushes a bucket
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Duration,
    /// How often the sweep runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            batch_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often due notifications are released
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Hard ceiling on recurring expansion
    pub max_occurrences: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            max_occurrences: 100,
        }
    }
}

/// Global chat (Slack-compatible) credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackDefaults {
    /// Bot token sent as a bearer credential
    pub token: Option<String>,
    /// Default target channel
    pub channel: Option<String>,
    /// `chat.postMessage` endpoint override
    pub api_url: Option<String>,
}

/// Global SMTP settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailDefaults {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    /// Comma separated recipient list
    pub to: Option<String>,
    /// Use STARTTLS (defaults to true)
    pub starttls: Option<bool>,
}

/// Global bot (Telegram-compatible) credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramDefaults {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let config = Config::default();
        assert_eq!(config.notifications.retry.max_attempts, 3);
        assert_eq!(config.notifications.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.notifications.retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.notifications.batching.max_batch_size, 10);
        assert_eq!(
            config.notifications.batching.batch_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(config.notifications.scheduler.max_occurrences, 100);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(
            config.notifications.scheduler.sweep_interval,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_durations_parse_from_humantime() {
        let json = r#"{"notifications": {"batching": {"batch_timeout": "90s"}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.notifications.batching.batch_timeout,
            Duration::from_secs(90)
        );
        assert_eq!(config.notifications.batching.max_batch_size, 10);
    }
}
