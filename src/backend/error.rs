//! Error types for the backend collaborators (REST, endpoint resolution, storage).

use thiserror::Error;

/// Backend subsystem error type.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// HTTP transport error.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend answered 403.
    #[error("access denied for {0}")]
    Forbidden(String),
    /// Backend answered with an unexpected status.
    #[error("backend returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Backend-provided message, or a generic one.
        message: String,
    },
    /// URL parse error.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
}

impl BackendError {
    /// Whether the failure happened below HTTP (connect, timeout, body read).
    ///
    /// Such failures invalidate the resolved endpoint.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            _ => false,
        }
    }
}

/// Convenience result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
