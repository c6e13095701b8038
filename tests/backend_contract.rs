//! Backend Contract Tests
//!
//! These tests verify the REST paths, headers and bodies the desk sends, the
//! mapping of backend failures, and endpoint route selection.

use std::sync::Arc;
use std::time::Duration;

use livedesk::backend::resolver::ROUTE_KEY;
use livedesk::backend::{
    BackendError, ConversationApi, ConversationKind, DateRange, EndpointResolver,
    HttpConversationApi, KeyValueStore, MemoryKeyValueStore, Route, fetch_active,
};
use livedesk::config::DeskConfig;
use livedesk::live::{CreateTime, Sentiment, TranscriptEntry};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn desk_config(server: &MockServer) -> DeskConfig {
    DeskConfig::default()
        .with_single_endpoint(format!("{}/api/", server.uri()), "ws://127.0.0.1:1/api")
        .with_access_token("tok")
}

fn client_for(config: &DeskConfig) -> (HttpConversationApi, Arc<MemoryKeyValueStore>) {
    let store = Arc::new(MemoryKeyValueStore::new());
    let resolver = EndpointResolver::new(&config.endpoints, store.clone())
        .map(Arc::new)
        .expect("resolver");
    let api = HttpConversationApi::new(config, resolver).expect("client");
    (api, store)
}

// ────────────────────────────────────────────────────────────────────────────
// Request Format
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_active_list_queries_both_statuses() {
    let server = MockServer::start().await;

    for (status, id, recording) in [
        ("in_progress", "c-1", json!({"file_path": "c-1.wav"})),
        ("takeover", "c-2", json!(null)),
    ] {
        Mock::given(method("GET"))
            .and(path("/api/conversations/"))
            .and(query_param("conversation_status", status))
            .and(query_param("skip", "0"))
            .and(query_param("limit", "50"))
            .and(query_param("minimum_hostility_score", "10"))
            .and(query_param("from_date", "2024-01-01"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": id, "status": status, "recording": recording, "in_progress_hostility_score": 12},
                {"id": "done", "status": "finalized"}
            ])))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    let range = DateRange {
        from_date: Some("2024-01-01".to_string()),
        to_date: None,
    };
    let list = fetch_active(&api, &config.poller, &range)
        .await
        .expect("active list");

    assert_eq!(list.total, 2);
    assert_eq!(list.conversations[0].id, "c-1");
    assert_eq!(list.conversations[0].kind, ConversationKind::Call);
    assert_eq!(list.conversations[1].id, "c-2");
    assert_eq!(list.conversations[1].kind, ConversationKind::Chat);
}

#[tokio::test]
async fn test_fetch_conversation_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/conversations/c-7"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c-7",
            "status": "in_progress",
            "transcription": "[{\"speaker\":\"customer\",\"text\":\"my bill\",\"start_time\":0,\"create_time\":1700000000000}]",
            "duration": 300,
            "word_count": 42,
            "analysis": {"topic": "billing", "positive_sentiment": 0.6, "neutral_sentiment": 0.3, "negative_sentiment": 0.1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    let snapshot = api.fetch_conversation("c-7").await.expect("record").snapshot();

    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(
        snapshot.entries[0].create_time,
        Some(CreateTime::from_millis(1_700_000_000_000))
    );
    assert_eq!(snapshot.statistics.duration, Some(300.0));
    assert_eq!(snapshot.statistics.word_count, Some(42));
    assert_eq!(snapshot.statistics.sentiment, Some(Sentiment::Positive));
}

#[tokio::test]
async fn test_append_messages_body() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/conversations/in-progress/update/c-3"))
        .and(body_partial_json(json!({
            "llm_analyst_id": "analyst-9",
            "messages": [{"speaker": "agent", "text": "on it"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    let entry = TranscriptEntry::utterance("agent", "on it", CreateTime::from_millis(5));
    let result = api
        .append_messages("c-3", std::slice::from_ref(&entry), "analyst-9")
        .await;

    assert!(result.is_ok(), "update should succeed: {result:?}");
}

#[tokio::test]
async fn test_finalize_body() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/conversations/in-progress/finalize/c-3"))
        .and(body_partial_json(json!({"llm_analyst_id": "analyst-9"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    assert!(api.finalize("c-3", "analyst-9").await.is_ok());
}

// ────────────────────────────────────────────────────────────────────────────
// Error Mapping
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_takeover_reports_success_as_bool() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/conversations/in-progress/takeover-super/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "takeover"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/conversations/in-progress/takeover-super/busy"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "already taken"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    assert!(api.takeover("ok").await);
    assert!(!api.takeover("busy").await);
}

#[tokio::test]
async fn test_forbidden_maps_to_dedicated_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/conversations/secret"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    let result = api.fetch_conversation("secret").await;
    assert!(matches!(result, Err(BackendError::Forbidden(_))));
}

#[tokio::test]
async fn test_status_error_carries_backend_message() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/conversations/in-progress/update/c-4"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "conversation closed"})),
        )
        .mount(&server)
        .await;

    let config = desk_config(&server);
    let (api, _store) = client_for(&config);
    let result = api.append_messages("c-4", &[], "analyst").await;

    match result {
        Err(BackendError::Status { status, message }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "conversation closed");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Endpoint Resolution
// ────────────────────────────────────────────────────────────────────────────

fn split_config(private: &MockServer, public: &MockServer) -> DeskConfig {
    let mut config = DeskConfig::default();
    config.endpoints.private_api_url = format!("{}/api/", private.uri());
    config.endpoints.public_api_url = format!("{}/api/", public.uri());
    config.endpoints.private_ws_url = "ws://private.internal/api".to_string();
    config.endpoints.public_ws_url = "wss://public.example.com/api".to_string();
    config.endpoints.probe_timeout = Duration::from_millis(500);
    config
}

#[tokio::test]
async fn test_private_denial_still_selects_private() {
    let private = MockServer::start().await;
    let public = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&private)
        .await;

    let config = split_config(&private, &public);
    let store = Arc::new(MemoryKeyValueStore::new());
    let resolver = EndpointResolver::new(&config.endpoints, store.clone()).expect("resolver");

    let first = resolver.resolve().await.expect("resolve");
    let second = resolver.resolve().await.expect("cached resolve");
    assert_eq!(first.route, Route::Private);
    assert_eq!(first.ws_base, "ws://private.internal/api");
    assert_eq!(second, first);
    assert_eq!(
        store.get(ROUTE_KEY).await.expect("store").as_deref(),
        Some("private")
    );
}

#[tokio::test]
async fn test_private_server_error_selects_public() {
    let private = MockServer::start().await;
    let public = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&private)
        .await;

    let config = split_config(&private, &public);
    let resolver = EndpointResolver::new(&config.endpoints, Arc::new(MemoryKeyValueStore::new()))
        .expect("resolver");

    let endpoints = resolver.resolve().await.expect("resolve");
    assert_eq!(endpoints.route, Route::Public);
    assert_eq!(endpoints.ws_base, "wss://public.example.com/api");
}

#[tokio::test]
async fn test_slow_private_endpoint_times_out_to_public() {
    let private = MockServer::start().await;
    let public = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&private)
        .await;

    let config = split_config(&private, &public);
    let resolver = EndpointResolver::new(&config.endpoints, Arc::new(MemoryKeyValueStore::new()))
        .expect("resolver");

    let endpoints = resolver.resolve().await.expect("resolve");
    assert_eq!(endpoints.route, Route::Public);
}

#[tokio::test]
async fn test_transport_failure_invalidates_route() {
    let mut config = DeskConfig::default().with_access_token("tok");
    config.endpoints.private_api_url = "http://127.0.0.1:1/api/".to_string();
    config.endpoints.request_timeout = Duration::from_secs(2);

    let store = Arc::new(MemoryKeyValueStore::new());
    store.set(ROUTE_KEY, "private").await.expect("seed route");
    let resolver = EndpointResolver::new(&config.endpoints, store.clone())
        .map(Arc::new)
        .expect("resolver");
    let api = HttpConversationApi::new(&config, resolver).expect("client");

    let result = api.fetch_conversation("c-1").await;
    assert!(matches!(result, Err(ref err) if err.is_transport()));
    assert_eq!(store.get(ROUTE_KEY).await.expect("store"), None);
}
