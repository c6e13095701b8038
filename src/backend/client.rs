//! REST collaborators of the live desk.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::records::ConversationRecord;
use crate::backend::resolver::EndpointResolver;
use crate::config::DeskConfig;
use crate::live::entry::TranscriptEntry;

/// Boxed future type for API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Filter of a conversation list request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationQuery {
    /// Records to skip.
    pub skip: u32,
    /// Page size.
    pub limit: u32,
    /// Status filter.
    pub conversation_status: String,
    /// Minimum hostility score.
    pub minimum_hostility_score: u32,
    /// Lower creation bound, ISO-8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    /// Upper creation bound, ISO-8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,
}

impl ConversationQuery {
    /// First page of conversations with `status`.
    #[must_use]
    pub fn status(status: impl Into<String>, limit: u32, minimum_hostility_score: u32) -> Self {
        Self {
            skip: 0,
            limit,
            conversation_status: status.into(),
            minimum_hostility_score,
            from_date: None,
            to_date: None,
        }
    }
}

/// Conversation operations the desk needs from the backend.
pub trait ConversationApi: Send + Sync {
    /// List raw conversation records.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is not a record list.
    fn list_conversations<'a>(
        &'a self,
        query: &'a ConversationQuery,
    ) -> ApiFuture<'a, BackendResult<Vec<ConversationRecord>>>;

    /// Fetch one conversation record.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is not a record.
    fn fetch_conversation<'a>(&'a self, id: &'a str)
    -> ApiFuture<'a, BackendResult<ConversationRecord>>;

    /// Ask the backend to hand the conversation to the supervisor.
    ///
    /// Resolves to `false` on any failure.
    fn takeover<'a>(&'a self, id: &'a str) -> ApiFuture<'a, bool>;

    /// Submit supervisor messages.
    ///
    /// # Errors
    /// Returns an error if the backend does not accept the messages.
    fn append_messages<'a>(
        &'a self,
        id: &'a str,
        messages: &'a [TranscriptEntry],
        analyst_id: &'a str,
    ) -> ApiFuture<'a, BackendResult<()>>;

    /// End the live lifecycle of a conversation.
    ///
    /// # Errors
    /// Returns an error if the backend does not confirm.
    fn finalize<'a>(&'a self, id: &'a str, analyst_id: &'a str)
    -> ApiFuture<'a, BackendResult<()>>;
}

/// HTTP implementation backed by `reqwest`.
pub struct HttpConversationApi {
    client: Client,
    resolver: Arc<EndpointResolver>,
    authorization: Option<String>,
}

impl HttpConversationApi {
    /// Create a client that resolves its base through `resolver`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &DeskConfig, resolver: Arc<EndpointResolver>) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.endpoints.request_timeout)
            .build()?;
        Ok(Self {
            client,
            resolver,
            authorization: config.auth.authorization(),
        })
    }

    async fn request<Q: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&Value>,
    ) -> BackendResult<Response> {
        let endpoints = self.resolver.resolve().await?;
        let url = endpoints.api_base.join(path)?;
        debug!(%method, %url, "Backend request");

        let mut builder = self.client.request(method, url);
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = BackendError::from(err);
                if err.is_transport() {
                    self.resolver.invalidate().await;
                }
                return Err(err);
            }
        };

        check_status(path, response).await
    }

    async fn request_json<T, Q>(&self, method: Method, path: &str, query: Option<&Q>) -> BackendResult<T>
    where
        T: serde::de::DeserializeOwned,
        Q: Serialize + Sync,
    {
        let response = self.request(method, path, query, None).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(path: &str, response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::FORBIDDEN {
        return Err(BackendError::Forbidden(path.to_string()));
    }

    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| {
            body.get("message")
                .or_else(|| body.get("detail"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("request to {path} failed"));

    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

impl ConversationApi for HttpConversationApi {
    fn list_conversations<'a>(
        &'a self,
        query: &'a ConversationQuery,
    ) -> ApiFuture<'a, BackendResult<Vec<ConversationRecord>>> {
        Box::pin(self.request_json(Method::GET, "conversations/", Some(query)))
    }

    fn fetch_conversation<'a>(
        &'a self,
        id: &'a str,
    ) -> ApiFuture<'a, BackendResult<ConversationRecord>> {
        Box::pin(async move {
            self.request_json::<ConversationRecord, ()>(
                Method::GET,
                &format!("conversations/{id}"),
                None,
            )
            .await
        })
    }

    fn takeover<'a>(&'a self, id: &'a str) -> ApiFuture<'a, bool> {
        Box::pin(async move {
            let path = format!("conversations/in-progress/takeover-super/{id}");
            match self.request::<()>(Method::PATCH, &path, None, None).await {
                Ok(_) => true,
                Err(err) => {
                    warn!(conversation_id = id, ?err, "Takeover request failed");
                    false
                }
            }
        })
    }

    fn append_messages<'a>(
        &'a self,
        id: &'a str,
        messages: &'a [TranscriptEntry],
        analyst_id: &'a str,
    ) -> ApiFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let body = json!({ "messages": messages, "llm_analyst_id": analyst_id });
            let path = format!("conversations/in-progress/update/{id}");
            self.request::<()>(Method::PATCH, &path, None, Some(&body))
                .await?;
            Ok(())
        })
    }

    fn finalize<'a>(
        &'a self,
        id: &'a str,
        analyst_id: &'a str,
    ) -> ApiFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let body = json!({ "llm_analyst_id": analyst_id });
            let path = format!("conversations/in-progress/finalize/{id}");
            self.request::<()>(Method::PATCH, &path, None, Some(&body))
                .await?;
            Ok(())
        })
    }
}
