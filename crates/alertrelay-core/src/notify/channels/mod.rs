//! Delivery adapters, one per channel type
//!
//! Adapters only perform the outbound call. Rendering, retries and history
//! bookkeeping happen in the layers above.

mod bot;
mod chat;
mod email;

pub use bot::BotAdapter;
pub use chat::ChatAdapter;
pub use email::EmailAdapter;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::models::{ChannelType, RenderedMessage};

/// Outcome classes of a failed delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network failure, timeout, rate limit or provider 5xx
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Missing or malformed credentials/target
    #[error("channel misconfigured: {0}")]
    Config(String),

    /// Provider refused the message
    #[error("provider rejected message: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

/// What an adapter sends
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub subject: String,
    pub content: String,
    /// Per-channel settings; missing keys fall back to global defaults
    pub config: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(message: &RenderedMessage, config: &HashMap<String, String>) -> Self {
        Self {
            subject: message.subject.clone(),
            content: message.content.clone(),
            config: config.clone(),
        }
    }

    /// Non-empty per-channel setting, else the global one
    pub(crate) fn setting<'a>(&'a self, key: &str, fallback: Option<&'a String>) -> Option<&'a str> {
        let present = |v: &'a String| Some(v.trim()).filter(|v| !v.is_empty());
        self.config
            .get(key)
            .and_then(present)
            .or_else(|| fallback.and_then(present))
    }

    pub(crate) fn require<'a>(
        &'a self,
        key: &str,
        fallback: Option<&'a String>,
        channel: ChannelType,
    ) -> std::result::Result<&'a str, DeliveryError> {
        self.setting(key, fallback).ok_or_else(|| {
            DeliveryError::Config(format!(
                "{channel} channel has no '{key}' and no global default"
            ))
        })
    }
}

/// Sends rendered messages for one channel type
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Target the message will reach, for history records
    fn recipient(&self, config: &HashMap<String, String>) -> String;

    /// Perform the outbound call
    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), DeliveryError>;
}

/// The closed set of adapters
#[derive(Clone)]
pub struct AdapterSet {
    chat: Arc<dyn DeliveryAdapter>,
    email: Arc<dyn DeliveryAdapter>,
    bot: Arc<dyn DeliveryAdapter>,
}

impl AdapterSet {
    /// Assemble from explicit adapters
    pub fn new(
        chat: Arc<dyn DeliveryAdapter>,
        email: Arc<dyn DeliveryAdapter>,
        bot: Arc<dyn DeliveryAdapter>,
    ) -> Self {
        Self { chat, email, bot }
    }

    /// Build the real adapters sharing one HTTP client
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("alertrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::new(
            Arc::new(ChatAdapter::new(client.clone(), config.slack.clone())),
            Arc::new(EmailAdapter::new(config.email.clone(), config.http_timeout)),
            Arc::new(BotAdapter::new(client, config.telegram.clone())),
        ))
    }

    /// Adapter for a channel type
    pub fn get(&self, channel_type: ChannelType) -> &dyn DeliveryAdapter {
        match channel_type {
            ChannelType::Chat => self.chat.as_ref(),
            ChannelType::Email => self.email.as_ref(),
            ChannelType::Bot => self.bot.as_ref(),
        }
    }
}

/// Map a provider HTTP status to a delivery outcome
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    body: &str,
) -> std::result::Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }

    let detail = format!("{provider} returned {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(DeliveryError::Transient(detail))
    } else {
        Err(DeliveryError::Rejected(detail))
    }
}
