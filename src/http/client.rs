//! The shared, connection-pooled outbound client.
//!
//! # Responsibilities
//! - Own one connection pool per route (direct, or one per proxy)
//! - Plan each request's route from the ambient job policy
//! - Enforce pool bounds and the acquisition, connect and response timeouts
//!
//! # Design Decisions
//! - One `SharedClient` per process, shared by every job behind `Arc`
//! - A pooled connection is keyed by its route, so a connection opened
//!   through one proxy is never reused for a direct request or another proxy
//! - Redirects are not followed: a redirect target would bypass route planning
//! - A direct request connects to the addresses its plan approved; the pool
//!   does not look the host up a second time
//! - Timeouts are read once at construction; non-positive values disable them

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::config::schema::ClientConfig;
use crate::error::{FetchError, TransportCause};
use crate::http::dns::{with_pinned_addresses, EgressResolver};
use crate::http::pool::ConnectionLimiter;
use crate::http::response::FetchResponse;
use crate::http::user_agent::{build_version, user_agent};
use crate::observability::metrics;
use crate::routing::info::MatchInfo;
use crate::routing::planner::{Plan, Route, RoutePlanner};

pub const ENV_CONNECTION_REQUEST_TIMEOUT: &str = "PRINT_HTTP_CONNECTION_REQUEST_TIMEOUT";
pub const ENV_CONNECT_TIMEOUT: &str = "PRINT_HTTP_CONNECT_TIMEOUT";
pub const ENV_SOCKET_TIMEOUT: &str = "PRINT_HTTP_SOCKET_TIMEOUT";

/// Settings fixed at client construction.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_connections_total: usize,
    pub max_connections_per_route: usize,
    pub connection_request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub randomize_dns: bool,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_values(&ClientConfig::default())
    }
}

impl ClientSettings {
    /// Settings from configuration, with timeout environment overrides applied.
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut config = config.clone();
        config.connection_request_timeout_ms = env_millis(
            ENV_CONNECTION_REQUEST_TIMEOUT,
            config.connection_request_timeout_ms,
        );
        config.connect_timeout_ms = env_millis(ENV_CONNECT_TIMEOUT, config.connect_timeout_ms);
        config.response_timeout_ms = env_millis(ENV_SOCKET_TIMEOUT, config.response_timeout_ms);
        Self::from_values(&config)
    }

    /// Settings from configuration only.
    pub fn from_values(config: &ClientConfig) -> Self {
        let version = config.product_version.as_deref().or(build_version());
        Self {
            max_connections_total: config.max_connections_total.max(1),
            max_connections_per_route: config.max_connections_per_route.max(1),
            connection_request_timeout: timeout_from_millis(config.connection_request_timeout_ms),
            connect_timeout: timeout_from_millis(config.connect_timeout_ms),
            response_timeout: timeout_from_millis(config.response_timeout_ms),
            randomize_dns: config.randomize_dns,
            user_agent: user_agent(version),
        }
    }
}

/// `None` (no timeout) for non-positive values.
pub fn timeout_from_millis(millis: i64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis as u64))
}

fn env_millis(name: &str, fallback: i64) -> i64 {
    parse_millis(name, std::env::var(name).ok().as_deref(), fallback)
}

fn parse_millis(name: &str, raw: Option<&str>, fallback: i64) -> i64 {
    match raw.map(str::trim) {
        Some(value) => match value.parse::<i64>() {
            Ok(millis) => millis,
            Err(e) => {
                tracing::warn!(variable = name, value = %value, error = %e, "Ignoring invalid timeout override");
                fallback
            }
        },
        None => fallback,
    }
}

/// One fully built request handed to the shared client.
#[derive(Debug)]
pub struct Dispatch {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub basic_auth: Option<(String, String)>,
}

#[derive(Debug)]
pub struct SharedClient {
    settings: ClientSettings,
    planner: RoutePlanner,
    limiter: ConnectionLimiter,
    clients: DashMap<Route, reqwest::Client>,
}

impl SharedClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_planner(settings, RoutePlanner::default())
    }

    pub fn with_planner(settings: ClientSettings, planner: RoutePlanner) -> Self {
        tracing::info!(
            max_total = settings.max_connections_total,
            max_per_route = settings.max_connections_per_route,
            connection_request_timeout = ?settings.connection_request_timeout,
            connect_timeout = ?settings.connect_timeout,
            response_timeout = ?settings.response_timeout,
            randomize_dns = settings.randomize_dns,
            user_agent = %settings.user_agent,
            "Shared HTTP client created"
        );
        let limiter = ConnectionLimiter::new(
            settings.max_connections_total,
            settings.max_connections_per_route,
            settings.connection_request_timeout,
        );
        Self {
            settings,
            planner,
            limiter,
            clients: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn planner(&self) -> &RoutePlanner {
        &self.planner
    }

    pub fn limiter(&self) -> &ConnectionLimiter {
        &self.limiter
    }

    /// Number of per-route pools created so far.
    pub fn pool_count(&self) -> usize {
        self.clients.len()
    }

    /// Route the request would take under the ambient job policy.
    pub async fn plan_route(&self, url: &Url, method: &Method) -> Result<Route, FetchError> {
        self.plan(url, method).await.map(|plan| plan.route)
    }

    async fn plan(&self, url: &Url, method: &Method) -> Result<Plan, FetchError> {
        let info = MatchInfo::from_url(url, method)?;
        self.planner
            .plan(info)
            .await
            .map_err(|e| FetchError::from_route(url.as_str(), e))
    }

    /// Execute one request. Route planning reads the ambient job policy of
    /// the calling task.
    pub async fn execute(&self, dispatch: Dispatch) -> Result<FetchResponse, FetchError> {
        let start = Instant::now();
        let url = dispatch.url.to_string();

        let Plan { route, addresses } = match self.plan(&dispatch.url, &dispatch.method).await {
            Ok(plan) => plan,
            Err(e) => {
                metrics::record_failure(e.kind());
                tracing::warn!(url = %url, error = %e, "Route planning failed");
                return Err(e);
            }
        };

        let destination = format!("{}|{}", route, authority(&dispatch.url));
        let lease = self.limiter.acquire(&destination).await.ok_or_else(|| {
            metrics::record_failure("pool_timeout");
            FetchError::transport(
                &url,
                TransportCause::PoolTimeout(self.limiter.acquire_timeout().unwrap_or_default()),
            )
        })?;

        let client = self
            .client_for(&route)
            .map_err(|e| FetchError::transport(&url, e))?;

        let method = dispatch.method.to_string();
        tracing::debug!(
            method = %method,
            url = %url,
            route = %route,
            headers = ?dispatch.headers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            body_len = dispatch.body.len(),
            "Preparing request"
        );

        let host = dispatch.url.host_str().unwrap_or_default().to_string();
        let mut request = client
            .request(dispatch.method, dispatch.url)
            .headers(dispatch.headers)
            .body(dispatch.body);
        if let Some((username, password)) = dispatch.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        let pending = with_pinned_addresses(&host, addresses, request.send());
        let result = match self.settings.response_timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(result) => result.map_err(|e| FetchError::transport(&url, e)),
                Err(_) => Err(FetchError::transport(&url, TransportCause::ResponseTimeout(limit))),
            },
            None => pending.await.map_err(|e| FetchError::transport(&url, e)),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_failure(e.kind());
                tracing::warn!(method = %method, url = %url, route = %route, error = %e, "Request failed");
                return Err(e);
            }
        };

        let status = response.status();
        metrics::record_request(&method, status.as_u16(), route.label(), start);
        tracing::debug!(status = status.as_u16(), url = %url, route = %route, "Response received");
        Ok(FetchResponse::new(response, lease))
    }

    fn client_for(&self, route: &Route) -> Result<reqwest::Client, reqwest::Error> {
        if let Some(client) = self.clients.get(route) {
            return Ok(client.clone());
        }
        let built = self.build_client(route)?;
        Ok(self.clients.entry(route.clone()).or_insert(built).clone())
    }

    fn build_client(&self, route: &Route) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(self.settings.max_connections_per_route);
        if let Some(timeout) = self.settings.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder = builder.dns_resolver(Arc::new(EgressResolver::new(self.settings.randomize_dns)));
        builder = match route {
            Route::Direct => builder.no_proxy(),
            Route::Proxy(target) => {
                let mut proxy = reqwest::Proxy::all(target.url())?;
                if let (Some(username), Some(password)) = (&target.username, &target.password) {
                    proxy = proxy.basic_auth(username, password);
                }
                builder.proxy(proxy)
            }
        };
        tracing::debug!(route = %route, "Creating connection pool");
        builder.build()
    }
}

fn authority(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::policy::ProxyTarget;

    #[test]
    fn non_positive_timeouts_are_disabled() {
        assert_eq!(timeout_from_millis(-1), None);
        assert_eq!(timeout_from_millis(0), None);
        assert_eq!(timeout_from_millis(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn timeout_overrides_parse_or_fall_back() {
        assert_eq!(parse_millis("X", Some(" 250 "), 10), 250);
        assert_eq!(parse_millis("X", Some("-1"), 10), -1);
        assert_eq!(parse_millis("X", Some("soon"), 10), 10);
        assert_eq!(parse_millis("X", None, 10), 10);
    }

    #[test]
    fn settings_from_config_values() {
        let config = ClientConfig {
            max_connections_total: 4,
            max_connections_per_route: 2,
            connection_request_timeout_ms: 0,
            connect_timeout_ms: 100,
            response_timeout_ms: -5,
            randomize_dns: true,
            product_version: Some("9.9.9".into()),
        };
        let settings = ClientSettings::from_values(&config);
        assert_eq!(settings.max_connections_total, 4);
        assert_eq!(settings.connection_request_timeout, None);
        assert_eq!(settings.connect_timeout, Some(Duration::from_millis(100)));
        assert_eq!(settings.response_timeout, None);
        assert!(settings.randomize_dns);
        assert!(settings.user_agent.starts_with("MapPrint/9.9.9 "));
    }

    #[test]
    fn missing_product_version_uses_the_crate_version() {
        let settings = ClientSettings::from_values(&ClientConfig::default());
        assert!(settings
            .user_agent
            .starts_with(&format!("MapPrint/{} ", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn pools_are_partitioned_by_route() {
        let client = SharedClient::new(ClientSettings::default());
        let proxy = Route::Proxy(ProxyTarget::new("127.0.0.1", 3128, "http"));

        client.client_for(&Route::Direct).unwrap();
        client.client_for(&Route::Direct).unwrap();
        assert_eq!(client.pool_count(), 1);

        client.client_for(&proxy).unwrap();
        assert_eq!(client.pool_count(), 2);
    }

    #[test]
    fn authority_uses_default_port() {
        let url = Url::parse("https://tiles.example.com/a.png").unwrap();
        assert_eq!(authority(&url), "tiles.example.com:443");
    }
}
