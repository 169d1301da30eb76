//! Webhook to chat message, through the whole pipeline

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use alertrelay::app;
use alertrelay::config::{NotificationConfig, RetryConfig, SlackDefaults};
use alertrelay::db::{MemoryStorage, Storage};
use alertrelay::models::{
    ChannelType, HistoryFilter, IncidentStatus, NotificationChannel, NotificationStatus, Severity,
    WebhookPayload,
};
use alertrelay::notify::AdapterSet;

fn high_cpu() -> WebhookPayload {
    serde_json::from_value(json!({
        "version": "4",
        "groupKey": "{}:{alertname=\"HighCPU\"}",
        "receiver": "ops",
        "status": "firing",
        "alerts": [{
            "status": "firing",
            "labels": {"alertname": "HighCPU", "service": "api", "severity": "critical"},
            "annotations": {"description": "CPU above 90%"},
            "startsAt": "2026-03-01T12:00:00Z",
            "endsAt": "0001-01-01T00:00:00Z"
        }],
        "groupLabels": {"alertname": "HighCPU"},
        "commonLabels": {"alertname": "HighCPU"},
        "commonAnnotations": {},
        "externalURL": "http://alertmanager:9093"
    }))
    .unwrap()
}

#[tokio::test]
async fn test_high_cpu_incident_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat.postMessage"))
        .and(header("authorization", "Bearer xoxb-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let config = NotificationConfig {
        system_url: "http://relay.local".to_string(),
        retry: RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..Default::default()
        },
        slack: SlackDefaults {
            token: Some("xoxb-test".to_string()),
            channel: Some("#ops".to_string()),
            api_url: Some(format!("{}/api/chat.postMessage", server.uri())),
        },
        ..Default::default()
    };

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    storage
        .create_channel(&NotificationChannel::new("ops", ChannelType::Chat))
        .await
        .unwrap();

    let adapters = AdapterSet::from_config(&config).unwrap();
    let (state, events) = app::build(&config, storage.clone(), adapters);
    let shutdown = CancellationToken::new();
    let mut tasks = app::spawn_background(&state, events, &shutdown);

    // One firing alert opens one incident
    let outcome = state.correlator.process_webhook(&high_cpu()).await.unwrap();
    assert_eq!(outcome.incidents_created.len(), 1);
    let id = outcome.incidents_created[0];

    let incident = state.incidents.get(id).await.unwrap();
    assert_eq!(incident.severity, Severity::Critical);
    assert_eq!(incident.status, IncidentStatus::Open);
    assert_eq!(incident.alert_ids.len(), 1);

    // Re-delivery only updates the existing alert
    let again = state.correlator.process_webhook(&high_cpu()).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.updated, 1);
    assert!(again.incidents_created.is_empty());
    assert_eq!(storage.list_alerts().await.unwrap().len(), 1);

    let acked = state.incidents.acknowledge(id, "alice").await.unwrap();
    assert_eq!(acked.status, IncidentStatus::Acknowledged);
    assert_eq!(acked.assignee_id.as_deref(), Some("alice"));
    let acked_at = acked.acked_at.expect("acked_at set");

    let resolved = state.incidents.resolve(id, None).await.unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved);
    assert!(resolved.resolved_at.expect("resolved_at set") >= acked_at);

    // Created, acknowledged and resolved notifications all reach the provider
    let filter = HistoryFilter {
        incident_id: Some(id),
        ..Default::default()
    };
    let mut sent = 0;
    for _ in 0..200 {
        let history = state.notifications.history().list(&filter).await.unwrap();
        sent = history
            .iter()
            .filter(|r| r.status == NotificationStatus::Sent)
            .count();
        if sent == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sent, 3);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let first: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["channel"], "#ops");
    assert!(first["text"].as_str().unwrap().contains("HighCPU"));

    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
}
