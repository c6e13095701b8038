//! Private/public endpoint selection with a persisted route cache.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::kv_store::KeyValueStore;
use crate::config::EndpointConfig;

/// Store key of the selected route.
pub const ROUTE_KEY: &str = "livedesk.api_route";

/// Which endpoint pair is in use.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Internal network endpoints.
    Private,
    /// Public fallback endpoints.
    Public,
}

impl Route {
    /// Stable string form, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(BackendError::InvalidConfig(format!("unknown route: {other}"))),
        }
    }
}

/// Bases to use for REST and live traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    /// REST base, always ending with `/`.
    pub api_base: Url,
    /// WebSocket base, without trailing `/`.
    pub ws_base: String,
    /// Route the bases belong to.
    pub route: Route,
}

/// Resolves and caches the reachable endpoint pair.
pub struct EndpointResolver {
    client: Client,
    config: EndpointConfig,
    store: Arc<dyn KeyValueStore>,
    cached: Mutex<Option<Route>>,
}

impl EndpointResolver {
    /// Create a resolver backed by `store`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &EndpointConfig, store: Arc<dyn KeyValueStore>) -> BackendResult<Self> {
        let client = Client::builder().timeout(config.probe_timeout).build()?;
        Ok(Self {
            client,
            config: config.clone(),
            store,
            cached: Mutex::new(None),
        })
    }

    /// Return the endpoints of the cached route, probing when nothing is cached.
    ///
    /// # Errors
    /// Returns an error if the configured base URLs are invalid.
    pub async fn resolve(&self) -> BackendResult<ResolvedEndpoints> {
        let mut cached = self.cached.lock().await;
        if let Some(route) = *cached {
            return self.endpoints_for(route);
        }

        let route = match self.stored_route().await {
            Some(route) => route,
            None => {
                let route = self.probe().await;
                if let Err(err) = self.store.set(ROUTE_KEY, route.as_str()).await {
                    warn!(?err, "Failed to persist resolved route");
                }
                route
            }
        };

        *cached = Some(route);
        self.endpoints_for(route)
    }

    /// Forget the selected route; the next `resolve` probes again.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            debug!("Endpoint route invalidated");
        }
        if let Err(err) = self.store.remove(ROUTE_KEY).await {
            warn!(?err, "Failed to clear persisted route");
        }
    }

    async fn stored_route(&self) -> Option<Route> {
        match self.store.get(ROUTE_KEY).await {
            Ok(Some(value)) => value.parse().ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(?err, "Failed to read persisted route");
                None
            }
        }
    }

    async fn probe(&self) -> Route {
        let route = match self.client.get(&self.config.private_api_url).send().await {
            Ok(response) if accepts_private(response.status()) => Route::Private,
            Ok(response) => {
                debug!(status = %response.status(), "Private endpoint rejected probe");
                Route::Public
            }
            Err(err) => {
                debug!(%err, "Private endpoint unreachable");
                Route::Public
            }
        };
        info!(%route, "Resolved backend route");
        route
    }

    fn endpoints_for(&self, route: Route) -> BackendResult<ResolvedEndpoints> {
        let (api, ws) = match route {
            Route::Private => (&self.config.private_api_url, &self.config.private_ws_url),
            Route::Public => (&self.config.public_api_url, &self.config.public_ws_url),
        };
        let api_base = if api.ends_with('/') {
            Url::parse(api)?
        } else {
            Url::parse(&format!("{api}/"))?
        };
        Ok(ResolvedEndpoints {
            api_base,
            ws_base: ws.trim_end_matches('/').to_string(),
            route,
        })
    }
}

/// A denial still proves the private endpoint exists.
fn accepts_private(status: StatusCode) -> bool {
    status.is_success()
        || matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        )
}
