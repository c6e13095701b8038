//! HTTP route handlers for the supervisor desk API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::backend::error::BackendError;
use crate::backend::records::ActiveConversations;
use crate::live::channel::LiveChannel;
use crate::live::entry::TranscriptEntry;
use crate::live::error::LiveError;
use crate::live::session::{LiveSession, SessionView};

use super::state::{AppState, OpenConversation};

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/refresh", post(refresh_conversations))
        .route("/api/conversations/{id}/open", post(open_conversation))
        .route("/api/live", get(live_view).delete(close_live))
        .route("/api/live/takeover", post(take_over))
        .route("/api/live/messages", post(send_message))
        .route("/api/live/finalize", post(finalize))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "livedesk",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Latest active conversation list.
async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<ActiveConversations> {
    Json(state.conversations.borrow().clone())
}

/// Ask the poller for an immediate refresh.
async fn refresh_conversations(State(state): State<Arc<AppState>>) -> StatusCode {
    state.refresh.notify_one();
    StatusCode::ACCEPTED
}

/// Open a conversation on the desk, replacing any other one.
async fn open_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let token = state.config.auth.access_token.as_deref();
    let mut desk = state.desk.lock().await;

    if let Some(open) = desk.as_mut().filter(|open| open.conversation_id() == id) {
        open.connect(token).await;
        let view = open.session.lock().await.view();
        return Ok(Json(view));
    }
    *desk = None;

    let record = state
        .api
        .fetch_conversation(&id)
        .await
        .map_err(backend_error)?;
    let endpoints = state.resolver.resolve().await.map_err(backend_error)?;

    let session = LiveSession::new(
        record.snapshot(),
        Arc::clone(&state.api),
        state.config.live.analyst_id.clone(),
    );
    let view = session.view();
    let channel = LiveChannel::new(endpoints.ws_base, state.config.live.lang.clone())
        .with_connect_timeout(state.config.endpoints.request_timeout);
    let mut open = OpenConversation::new(session, channel);
    open.connect(token).await;
    *desk = Some(open);

    Ok(Json(view))
}

/// Current view of the open conversation.
async fn live_view(State(state): State<Arc<AppState>>) -> Result<Json<SessionView>, ApiError> {
    let session = open_session(&state).await?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

/// Takeover response.
#[derive(Debug, Serialize)]
pub struct TakeoverResponse {
    /// Whether the backend accepted the takeover.
    pub success: bool,
}

/// Request a supervisor takeover of the open conversation.
async fn take_over(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TakeoverResponse>, ApiError> {
    let session = open_session(&state).await?;
    let success = session.lock().await.request_takeover().await;
    if success {
        state.refresh.notify_one();
    }
    Ok(Json(TakeoverResponse { success }))
}

/// Supervisor message request.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Message text.
    pub text: String,
}

/// Send a supervisor message on the open conversation.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<TranscriptEntry>, ApiError> {
    let session = open_session(&state).await?;
    let entry = session
        .lock()
        .await
        .send_message(&request.text)
        .await
        .map_err(live_error)?;
    state.refresh.notify_one();
    Ok(Json(entry))
}

/// Finalize response.
#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    /// The session ended.
    pub finalized: bool,
    /// The backend confirmed the finalize.
    pub confirmed: bool,
}

/// Finalize the open conversation and close the desk.
async fn finalize(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let session = open_session(&state).await?;
    let result = session.lock().await.finalize().await;
    match result {
        Err(err @ (LiveError::NotTakenOver | LiveError::Finalized)) => Err(live_error(err)),
        other => {
            state.close_desk_for(&session).await;
            Ok(Json(FinalizeResponse {
                finalized: true,
                confirmed: other.is_ok(),
            }))
        }
    }
}

/// Close the open conversation.
async fn close_live(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.close_desk().await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn open_session(
    state: &AppState,
) -> Result<Arc<tokio::sync::Mutex<LiveSession>>, ApiError> {
    state
        .desk
        .lock()
        .await
        .as_ref()
        .map(|open| Arc::clone(&open.session))
        .ok_or_else(|| (StatusCode::NOT_FOUND, "no conversation is open".to_string()))
}

fn backend_error(err: BackendError) -> ApiError {
    let status = match &err {
        BackendError::Forbidden(_) => StatusCode::FORBIDDEN,
        BackendError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
        BackendError::InvalidConfig(_) | BackendError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}

fn live_error(err: LiveError) -> ApiError {
    match err {
        LiveError::NotTakenOver | LiveError::Finalized => (StatusCode::CONFLICT, err.to_string()),
        LiveError::EmptyMessage => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        LiveError::Backend(inner) => backend_error(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::client::{ApiFuture, ConversationApi, ConversationQuery};
    use crate::backend::error::BackendResult;
    use crate::backend::kv_store::{KeyValueStore, MemoryKeyValueStore};
    use crate::backend::poller::ActiveConversationPoller;
    use crate::backend::records::ConversationRecord;
    use crate::backend::resolver::{EndpointResolver, ROUTE_KEY};
    use crate::config::DeskConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct DeskApi;

    impl ConversationApi for DeskApi {
        fn list_conversations<'a>(
            &'a self,
            _query: &'a ConversationQuery,
        ) -> ApiFuture<'a, BackendResult<Vec<ConversationRecord>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn fetch_conversation<'a>(
            &'a self,
            id: &'a str,
        ) -> ApiFuture<'a, BackendResult<ConversationRecord>> {
            Box::pin(async move {
                if id == "missing" {
                    return Err(BackendError::Status {
                        status: 404,
                        message: "not found".to_string(),
                    });
                }
                Ok(serde_json::from_value(json!({
                    "id": id,
                    "status": "in_progress",
                    "transcription": [{"speaker": "customer", "text": "hello", "create_time": 1}]
                }))?)
            })
        }

        fn takeover<'a>(&'a self, _id: &'a str) -> ApiFuture<'a, bool> {
            Box::pin(async { true })
        }

        fn append_messages<'a>(
            &'a self,
            _id: &'a str,
            _messages: &'a [TranscriptEntry],
            _analyst_id: &'a str,
        ) -> ApiFuture<'a, BackendResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn finalize<'a>(
            &'a self,
            _id: &'a str,
            _analyst_id: &'a str,
        ) -> ApiFuture<'a, BackendResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    async fn test_state() -> Arc<AppState> {
        let config = DeskConfig::default()
            .with_single_endpoint("http://127.0.0.1:1/api/", "ws://127.0.0.1:1/api");
        let store = Arc::new(MemoryKeyValueStore::new());
        let _ = store.set(ROUTE_KEY, "public").await;
        let resolver = EndpointResolver::new(&config.endpoints, store).map(Arc::new);
        let Ok(resolver) = resolver else {
            panic!("resolver should build");
        };
        let api: Arc<dyn ConversationApi> = Arc::new(DeskApi);
        let poller = ActiveConversationPoller::new(Arc::clone(&api), config.poller.clone());
        AppState::new(config, api, resolver, &poller)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |body| Body::from(body.to_string())))
            .unwrap_or_default();
        let Ok(response) = app.clone().oneshot(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state().await);
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "livedesk");
    }

    #[tokio::test]
    async fn test_live_routes_require_open_conversation() {
        let app = create_router(test_state().await);
        let (status, _) = call(&app, "GET", "/api/live", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/live/takeover", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", "/api/live", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_open_takeover_send_finalize() {
        let app = create_router(test_state().await);

        let (status, body) = call(&app, "POST", "/api/conversations/c-9/open", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_id"], "c-9");
        assert_eq!(body["transcript"][0]["text"], "hello");
        assert_eq!(body["takeover"], "not_taken_over");
        assert_eq!(body["agent_composing"], true);

        let (status, _) = call(&app, "POST", "/api/live/messages", Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, "POST", "/api/live/takeover", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = call(&app, "POST", "/api/live/messages", Some(json!({"text": " "}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = call(&app, "POST", "/api/live/messages", Some(json!({"text": "on it"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["speaker"], "agent");

        let (_, body) = call(&app, "GET", "/api/live", None).await;
        assert_eq!(body["takeover"], "taken_over");
        assert_eq!(body["agent_composing"], false);
        assert_eq!(body["transcript"].as_array().map(Vec::len), Some(3));

        let (status, body) = call(&app, "POST", "/api/live/finalize", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["finalized"], true);
        assert_eq!(body["confirmed"], true);

        let (status, _) = call(&app, "GET", "/api/live", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_late_finalize_leaves_newer_conversation_open() {
        let state = test_state().await;
        let app = create_router(Arc::clone(&state));

        let (status, _) = call(&app, "POST", "/api/conversations/c-1/open", None).await;
        assert_eq!(status, StatusCode::OK);
        let Ok(first) = open_session(&state).await else {
            panic!("c-1 should be open");
        };

        let (status, _) = call(&app, "POST", "/api/conversations/c-2/open", None).await;
        assert_eq!(status, StatusCode::OK);

        assert!(!state.close_desk_for(&first).await);
        let (status, body) = call(&app, "GET", "/api/live", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_id"], "c-2");

        let Ok(second) = open_session(&state).await else {
            panic!("c-2 should be open");
        };
        assert!(state.close_desk_for(&second).await);
        let (status, _) = call(&app, "GET", "/api/live", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_open_missing_conversation() {
        let app = create_router(test_state().await);
        let (status, _) = call(&app, "POST", "/api/conversations/missing/open", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_conversation_list_and_refresh() {
        let app = create_router(test_state().await);
        let (status, body) = call(&app, "GET", "/api/conversations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
        let (status, _) = call(&app, "POST", "/api/conversations/refresh", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
