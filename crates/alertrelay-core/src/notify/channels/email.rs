//! SMTP email adapter

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{DeliveryAdapter, DeliveryError, OutboundMessage};
use crate::config::EmailDefaults;
use crate::models::ChannelType;

const DEFAULT_STARTTLS_PORT: u16 = 587;
const DEFAULT_PLAIN_PORT: u16 = 25;

/// Sends plain-text email through an SMTP relay
pub struct EmailAdapter {
    defaults: EmailDefaults,
    timeout: Duration,
}

impl EmailAdapter {
    pub fn new(defaults: EmailDefaults, timeout: Duration) -> Self {
        Self { defaults, timeout }
    }

    fn build_message(&self, message: &OutboundMessage) -> Result<Message, DeliveryError> {
        let from: Mailbox = message
            .require("from", self.defaults.from.as_ref(), ChannelType::Email)?
            .parse()
            .map_err(|e| DeliveryError::Config(format!("invalid from address: {e}")))?;

        let recipients = parse_recipients(message.require("to", self.defaults.to.as_ref(), ChannelType::Email)?)?;

        let mut builder = Message::builder()
            .from(from)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for to in recipients {
            builder = builder.to(to);
        }

        builder
            .body(message.content.clone())
            .map_err(|e| DeliveryError::Config(format!("failed to build email: {e}")))
    }

    fn build_transport(
        &self,
        message: &OutboundMessage,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let host = message.require("smtp_host", self.defaults.smtp_host.as_ref(), ChannelType::Email)?;

        let starttls = match message.config.get("starttls").map(|v| v.trim()) {
            Some(v) if !v.is_empty() => v.parse::<bool>().map_err(|_| {
                DeliveryError::Config(format!("starttls must be true or false, got '{v}'"))
            })?,
            _ => self.defaults.starttls.unwrap_or(true),
        };

        let port = match message.config.get("smtp_port").map(|v| v.trim()) {
            Some(v) if !v.is_empty() => v
                .parse::<u16>()
                .map_err(|_| DeliveryError::Config(format!("invalid smtp_port '{v}'")))?,
            _ => self.defaults.smtp_port.unwrap_or(if starttls {
                DEFAULT_STARTTLS_PORT
            } else {
                DEFAULT_PLAIN_PORT
            }),
        };

        let mut builder = if starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| DeliveryError::Config(format!("invalid SMTP relay '{host}': {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        builder = builder.port(port).timeout(Some(self.timeout));

        let username = message.setting("username", self.defaults.username.as_ref());
        let password = message.setting("password", self.defaults.password.as_ref());
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                password.to_string(),
            ));
        }

        Ok(builder.build())
    }
}

fn parse_recipients(raw: &str) -> Result<Vec<Mailbox>, DeliveryError> {
    let recipients = raw
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| {
            r.parse::<Mailbox>()
                .map_err(|e| DeliveryError::Config(format!("invalid recipient '{r}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if recipients.is_empty() {
        return Err(DeliveryError::Config("email channel has no recipients".to_string()));
    }
    Ok(recipients)
}

#[async_trait]
impl DeliveryAdapter for EmailAdapter {
    fn recipient(&self, config: &HashMap<String, String>) -> String {
        config
            .get("to")
            .filter(|c| !c.trim().is_empty())
            .or(self.defaults.to.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let email = self.build_message(message)?;
        let mailer = self.build_transport(message)?;

        mailer.send(email).await.map_err(|e| {
            if e.is_permanent() {
                DeliveryError::Rejected(e.to_string())
            } else {
                DeliveryError::Transient(e.to_string())
            }
        })?;

        debug!(subject = %message.subject, "Email sent");
        Ok(())
    }
}
