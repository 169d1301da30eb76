//! Telegram-compatible bot adapter (`/bot<token>/sendMessage`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{classify_status, DeliveryAdapter, DeliveryError, OutboundMessage};
use crate::config::TelegramDefaults;
use crate::models::ChannelType;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Sends messages through a bot API
pub struct BotAdapter {
    client: reqwest::Client,
    defaults: TelegramDefaults,
}

impl BotAdapter {
    pub fn new(client: reqwest::Client, defaults: TelegramDefaults) -> Self {
        Self { client, defaults }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl DeliveryAdapter for BotAdapter {
    fn recipient(&self, config: &HashMap<String, String>) -> String {
        config
            .get("chat_id")
            .filter(|c| !c.trim().is_empty())
            .or(self.defaults.chat_id.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let token = message.require("bot_token", self.defaults.bot_token.as_ref(), ChannelType::Bot)?;
        let chat_id = message.require("chat_id", self.defaults.chat_id.as_ref(), ChannelType::Bot)?;
        let base = message
            .setting("api_url", self.defaults.api_url.as_ref())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/');

        let response = self
            .client
            .post(format!("{base}/bot{token}/sendMessage"))
            .json(&SendMessage {
                chat_id,
                text: &message.content,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status("bot provider", status, &body)?;

        let parsed: SendMessageResponse = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::Rejected(format!("unexpected bot response: {e}")))?;
        if !parsed.ok {
            return Err(DeliveryError::Rejected(
                parsed.description.unwrap_or_else(|| "request refused".to_string()),
            ));
        }

        debug!(chat_id = %chat_id, "Bot message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(server: &MockServer) -> OutboundMessage {
        OutboundMessage {
            subject: String::new(),
            content: "Resolved: HighCPU".to_string(),
            config: HashMap::from([
                ("bot_token".to_string(), "123:abc".to_string()),
                ("api_url".to_string(), server.uri()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_sends_to_token_path_with_global_chat_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(serde_json::json!({
                "chat_id": "-1001",
                "text": "Resolved: HighCPU"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BotAdapter::new(
            reqwest::Client::new(),
            TelegramDefaults {
                chat_id: Some("-1001".to_string()),
                ..Default::default()
            },
        );
        adapter.send(&message(&server)).await.unwrap();
        assert_eq!(adapter.recipient(&HashMap::new()), "-1001");
    }

    #[tokio::test]
    async fn test_client_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let adapter = BotAdapter::new(
            reqwest::Client::new(),
            TelegramDefaults {
                chat_id: Some("42".to_string()),
                ..Default::default()
            },
        );
        let err = adapter.send(&message(&server)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_missing_chat_id_fails_fast() {
        let server = MockServer::start().await;
        let adapter = BotAdapter::new(reqwest::Client::new(), TelegramDefaults::default());
        let err = adapter.send(&message(&server)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Config(_)));
    }
}
