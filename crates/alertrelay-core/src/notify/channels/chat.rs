//! Slack-compatible chat adapter (`chat.postMessage`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{classify_status, DeliveryAdapter, DeliveryError, OutboundMessage};
use crate::config::SlackDefaults;
use crate::models::ChannelType;

const DEFAULT_API_URL: &str = "https://slack.com/api/chat.postMessage";

/// Accepted in channel config in place of `channel`
const TARGET_ALIAS: &str = "target";

/// Provider error codes that clear up on their own
const TRANSIENT_ERRORS: [&str; 4] = [
    "ratelimited",
    "internal_error",
    "fatal_error",
    "service_unavailable",
];

/// Posts messages to a chat workspace with a bearer token
pub struct ChatAdapter {
    client: reqwest::Client,
    defaults: SlackDefaults,
}

impl ChatAdapter {
    pub fn new(client: reqwest::Client, defaults: SlackDefaults) -> Self {
        Self { client, defaults }
    }

    /// Per-channel `channel` (or its alias `target`), else the global channel
    fn target<'a>(&'a self, message: &'a OutboundMessage) -> Result<&'a str, DeliveryError> {
        match message.setting("channel", None) {
            Some(channel) => Ok(channel),
            None => message
                .setting(TARGET_ALIAS, self.defaults.channel.as_ref())
                .ok_or_else(|| {
                    DeliveryError::Config(
                        "chat channel has no 'channel' and no global default".to_string(),
                    )
                }),
        }
    }
}

/// `chat.postMessage` body. The message target goes out as `channel`.
#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl DeliveryAdapter for ChatAdapter {
    fn recipient(&self, config: &HashMap<String, String>) -> String {
        let present = |key: &str| config.get(key).filter(|c| !c.trim().is_empty());
        present("channel")
            .or_else(|| present(TARGET_ALIAS))
            .or(self.defaults.channel.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let token = message.require("token", self.defaults.token.as_ref(), ChannelType::Chat)?;
        let channel = self.target(message)?;
        let url = message
            .setting("api_url", self.defaults.api_url.as_ref())
            .unwrap_or(DEFAULT_API_URL);

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&PostMessage {
                channel,
                text: &message.content,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status("chat provider", status, &body)?;

        // The provider answers 200 with `ok: false` for most failures
        let parsed: PostMessageResponse = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::Rejected(format!("unexpected chat response: {e}")))?;
        if !parsed.ok {
            let code = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(if TRANSIENT_ERRORS.contains(&code.as_str()) {
                DeliveryError::Transient(code)
            } else {
                DeliveryError::Rejected(code)
            });
        }

        debug!(channel = %channel, "Chat message posted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> ChatAdapter {
        ChatAdapter::new(
            reqwest::Client::new(),
            SlackDefaults {
                token: Some("xoxb-global".to_string()),
                channel: Some("#alerts".to_string()),
                api_url: None,
            },
        )
    }

    fn message(server: &MockServer, extra: &[(&str, &str)]) -> OutboundMessage {
        let mut config: HashMap<String, String> = extra
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config.insert(
            "api_url".to_string(),
            format!("{}/api/chat.postMessage", server.uri()),
        );
        OutboundMessage {
            subject: "subject".to_string(),
            content: "HighCPU on web-1".to_string(),
            config,
        }
    }

    #[tokio::test]
    async fn test_posts_with_bearer_and_channel_override() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-global"))
            .and(body_json(serde_json::json!({
                "channel": "#ops",
                "text": "HighCPU on web-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        adapter()
            .send(&message(&server, &[("channel", "#ops")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_target_key_is_a_channel_alias() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "channel": "#sre",
                "text": "HighCPU on web-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter();
        let message = message(&server, &[("target", "#sre")]);
        assert_eq!(adapter.recipient(&message.config), "#sre");
        adapter.send(&message).await.unwrap();

        // `channel` wins when both are set
        let both = HashMap::from([
            ("channel".to_string(), "#ops".to_string()),
            ("target".to_string(), "#sre".to_string()),
        ]);
        assert_eq!(adapter.recipient(&both), "#ops");
    }

    #[tokio::test]
    async fn test_ok_false_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": false, "error": "channel_not_found"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": false, "error": "ratelimited"})),
            )
            .mount(&server)
            .await;

        let adapter = adapter();
        let first = adapter.send(&message(&server, &[])).await.unwrap_err();
        assert_eq!(first, DeliveryError::Rejected("channel_not_found".to_string()));

        let second = adapter.send(&message(&server, &[])).await.unwrap_err();
        assert!(second.is_retryable());
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = adapter().send(&message(&server, &[])).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_token_fails_fast() {
        let adapter = ChatAdapter::new(reqwest::Client::new(), SlackDefaults::default());
        let message = OutboundMessage {
            subject: String::new(),
            content: "x".to_string(),
            config: HashMap::from([("channel".to_string(), "#ops".to_string())]),
        };

        let err = adapter.send(&message).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Config(_)));
        assert!(!err.is_retryable());
    }
}
