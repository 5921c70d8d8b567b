//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! with no egress policies. Matcher and proxy fields are kept as raw text
//! here and checked by `validation` / compiled by `compile`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration of the print service's egress layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Shared outbound client settings.
    pub client: ClientConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Egress policy per app id.
    pub apps: BTreeMap<String, AppConfig>,
}

/// Settings of the shared outbound client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on concurrently leased connections.
    pub max_connections_total: usize,

    /// Upper bound per destination (route + target authority).
    pub max_connections_per_route: usize,

    /// Wait for a pooled connection. Non-positive disables the limit.
    pub connection_request_timeout_ms: i64,

    /// TCP/TLS connect timeout. Non-positive disables the limit.
    pub connect_timeout_ms: i64,

    /// Wait for response headers. Non-positive disables the limit.
    pub response_timeout_ms: i64,

    /// Shuffle resolved addresses before connecting.
    pub randomize_dns: bool,

    /// Version reported in the User-Agent; defaults to the crate version.
    pub product_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 200,
            max_connections_per_route: 20,
            connection_request_timeout_ms: -1,
            connect_timeout_ms: 10_000,
            response_timeout_ms: 30_000,
            randomize_dns: false,
            product_version: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Egress rules of one app. Each list is evaluated in order.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub proxies: Vec<ProxyRuleConfig>,
    pub access: Vec<AccessRuleConfig>,
    pub credentials: Vec<CredentialRuleConfig>,
}

/// Host matcher. Ports `<= 0` or absent mean any port.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MatcherConfig {
    Address {
        ip: String,
        #[serde(default)]
        mask: Option<String>,
        #[serde(default)]
        port: Option<i64>,
        #[serde(default)]
        path_pattern: Option<String>,
    },
    Local {
        #[serde(default)]
        port: Option<i64>,
        #[serde(default)]
        path_pattern: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyRuleConfig {
    pub matcher: MatcherConfig,
    pub proxy: ProxyTargetConfig,
}

/// Forward proxy endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyTargetConfig {
    pub host: String,

    /// Defaults to 80 for http and 443 for https.
    #[serde(default)]
    pub port: Option<i64>,

    #[serde(default = "default_proxy_scheme")]
    pub scheme: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_proxy_scheme() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessRuleConfig {
    pub matcher: MatcherConfig,

    /// Deny instead of allow when the matcher matches.
    #[serde(default)]
    pub reject: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialRuleConfig {
    pub matcher: MatcherConfig,
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.client.max_connections_total, 200);
        assert_eq!(config.client.connection_request_timeout_ms, -1);
        assert!(!config.client.randomize_dns);
        assert!(!config.observability.metrics_enabled);
        assert!(config.apps.is_empty());
    }

    #[test]
    fn parses_tagged_matchers() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [[apps.default.proxies]]
            matcher = { kind = "local", port = 8080, path_pattern = "/print/.+" }
            proxy = { host = "proxy.internal", port = 3128 }

            [[apps.default.access]]
            matcher = { kind = "address", ip = "10.0.0.0", mask = "255.0.0.0" }
            "#,
        )
        .unwrap();
        let app = &config.apps["default"];
        assert_eq!(
            app.proxies[0].matcher,
            MatcherConfig::Local {
                port: Some(8080),
                path_pattern: Some("/print/.+".into())
            }
        );
        assert_eq!(app.proxies[0].proxy.scheme, "http");
        assert!(!app.access[0].reject);
        assert!(app.credentials.is_empty());
    }

    #[test]
    fn unknown_matcher_kind_is_rejected() {
        let result: Result<ServiceConfig, _> = toml::from_str(
            r#"
            [[apps.a.access]]
            matcher = { kind = "dns", name = "x" }
            "#,
        );
        assert!(result.is_err());
    }
}
