//! Configuration for the supervisor desk.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::error::{BackendError, BackendResult};

/// Top-level desk configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeskConfig {
    /// Backend endpoints.
    pub endpoints: EndpointConfig,
    /// Credentials forwarded to the backend.
    pub auth: AuthConfig,
    /// Live session settings.
    pub live: LiveConfig,
    /// Active conversation polling.
    pub poller: PollerConfig,
    /// Local persistence.
    pub storage: StorageConfig,
    /// Desk HTTP server.
    pub server: ServerConfig,
}

impl DeskConfig {
    /// Build a config from defaults overridden by `LIVEDESK_*` variables.
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_env() -> BackendResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overridden by a variable lookup.
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> BackendResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("LIVEDESK_API_PRIVATE_URL") {
            config.endpoints.private_api_url = value;
        }
        if let Some(value) = lookup("LIVEDESK_API_PUBLIC_URL") {
            config.endpoints.public_api_url = value;
        }
        if let Some(value) = lookup("LIVEDESK_WS_PRIVATE_URL") {
            config.endpoints.private_ws_url = value;
        }
        if let Some(value) = lookup("LIVEDESK_WS_PUBLIC_URL") {
            config.endpoints.public_ws_url = value;
        }
        if let Some(value) = lookup("LIVEDESK_PROBE_TIMEOUT_MS") {
            config.endpoints.probe_timeout = Duration::from_millis(parse_var(
                "LIVEDESK_PROBE_TIMEOUT_MS",
                &value,
            )?);
        }
        if let Some(value) = lookup("LIVEDESK_ACCESS_TOKEN") {
            config.auth.access_token = Some(value);
        }
        if let Some(value) = lookup("LIVEDESK_TOKEN_TYPE") {
            config.auth.token_type = value;
        }
        if let Some(value) = lookup("LIVEDESK_ANALYST_ID") {
            config.live.analyst_id = value;
        }
        if let Some(value) = lookup("LIVEDESK_POLL_INTERVAL_MS") {
            config.poller.interval =
                Duration::from_millis(parse_var("LIVEDESK_POLL_INTERVAL_MS", &value)?);
        }
        if let Some(value) = lookup("LIVEDESK_SQLITE_PATH") {
            config.storage.sqlite_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("LIVEDESK_PORT") {
            config.server.port = parse_var("LIVEDESK_PORT", &value)?;
        }

        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> BackendResult<()> {
        for url in [
            &self.endpoints.private_api_url,
            &self.endpoints.public_api_url,
            &self.endpoints.private_ws_url,
            &self.endpoints.public_ws_url,
        ] {
            Url::parse(url)?;
        }

        if self.endpoints.probe_timeout.is_zero() {
            return Err(BackendError::InvalidConfig(
                "endpoints.probe_timeout must be > 0".to_string(),
            ));
        }

        if self.poller.interval.is_zero() {
            return Err(BackendError::InvalidConfig(
                "poller.interval must be > 0".to_string(),
            ));
        }

        if self.poller.page_size == 0 {
            return Err(BackendError::InvalidConfig(
                "poller.page_size must be > 0".to_string(),
            ));
        }

        if self.live.analyst_id.trim().is_empty() {
            return Err(BackendError::InvalidConfig(
                "live.analyst_id must not be empty".to_string(),
            ));
        }

        if self.storage.kv_table.is_empty()
            || !self
                .storage
                .kv_table
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(BackendError::InvalidConfig(
                "storage.kv_table must be a plain identifier".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.auth.access_token = Some(token.into());
        self
    }

    /// Point both routes at the same API and WebSocket bases.
    #[must_use]
    pub fn with_single_endpoint(mut self, api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        let ws_url = ws_url.into();
        self.endpoints.private_api_url.clone_from(&api_url);
        self.endpoints.public_api_url = api_url;
        self.endpoints.private_ws_url.clone_from(&ws_url);
        self.endpoints.public_ws_url = ws_url;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller.interval = interval;
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> BackendResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BackendError::InvalidConfig(format!("{key} has an invalid value: {value}")))
}

/// Private/public endpoint pairs and timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// API base reachable only from the internal network.
    pub private_api_url: String,
    /// Public API base used as fallback.
    pub public_api_url: String,
    /// WebSocket base paired with the private API.
    pub private_ws_url: String,
    /// WebSocket base paired with the public API.
    pub public_ws_url: String,
    /// Timeout of the private reachability probe.
    #[serde(with = "duration_ms_serde")]
    pub probe_timeout: Duration,
    /// Timeout of ordinary REST requests.
    #[serde(with = "duration_ms_serde")]
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            private_api_url: "http://127.0.0.1:8000/api/".to_string(),
            public_api_url: "http://127.0.0.1:8000/api/".to_string(),
            private_ws_url: "ws://127.0.0.1:8000/api".to_string(),
            public_ws_url: "ws://127.0.0.1:8000/api".to_string(),
            probe_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Credentials forwarded to the backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer access token.
    pub access_token: Option<String>,
    /// Token scheme, normally `Bearer`.
    pub token_type: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            token_type: "Bearer".to_string(),
        }
    }
}

impl AuthConfig {
    /// `Authorization` header value, when a token is configured.
    #[must_use]
    pub fn authorization(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("{} {token}", self.token_type))
    }
}

/// Live session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Analyst identifier attached to update and finalize calls.
    pub analyst_id: String,
    /// Language requested on the live channel.
    pub lang: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            analyst_id: "00000196-02d3-6026-4000-000000000001".to_string(),
            lang: "en".to_string(),
        }
    }
}

/// Active conversation polling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Whether the poller runs at all.
    pub enabled: bool,
    /// Time between two refreshes.
    #[serde(with = "duration_ms_serde")]
    pub interval: Duration,
    /// Page size per status query.
    pub page_size: u32,
    /// Minimum hostility score of listed conversations.
    pub minimum_hostility_score: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            page_size: 50,
            minimum_hostility_score: 10,
        }
    }
}

/// Local persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Key-value table name.
    pub kv_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("livedesk.sqlite"),
            kv_table: "desk_kv".to_string(),
        }
    }
}

/// Desk HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Serde module for Duration serialization as milliseconds.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
