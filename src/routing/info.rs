//! Normalized request descriptor used as matcher input.
//!
//! # Responsibilities
//! - Derive scheme, host, port, path and method from a full URL
//! - Derive a partial descriptor (host, port, scheme) during auth negotiation
//!
//! # Design Decisions
//! - Absent fields are wildcards: a matcher never fails on data it cannot see
//! - Port 0 from an auth scope means "any" and is stored as absent
//! - Implicit ports are resolved to the scheme default (80, 443, ...)

use std::fmt;

use reqwest::Method;
use url::{Host, Url};

use crate::error::FetchError;

/// Immutable description of an outbound request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    method: Option<Method>,
}

impl MatchInfo {
    /// Build a complete descriptor from a parsed URL and HTTP method.
    pub fn from_url(url: &Url, method: &Method) -> Result<Self, FetchError> {
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(FetchError::malformed(url.as_str(), "missing host")),
        };
        let port = url.port_or_known_default().ok_or_else(|| {
            FetchError::malformed(
                url.as_str(),
                format!("no port given and no default for scheme '{}'", url.scheme()),
            )
        })?;

        Ok(Self {
            scheme: Some(url.scheme().to_string()),
            host: Some(host),
            port: Some(port),
            path: Some(url.path().to_string()),
            method: Some(method.clone()),
        })
    }

    /// Parse a URL string and build a complete descriptor.
    pub fn parse(url: &str, method: &Method) -> Result<Self, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::malformed(url, e))?;
        Self::from_url(&parsed, method)
    }

    /// Build a partial descriptor from an authentication scope.
    pub fn from_auth_scope(host: Option<&str>, port: u16, scheme: Option<&str>) -> Self {
        Self {
            scheme: scheme.map(str::to_ascii_lowercase),
            host: host
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase()),
            port: (port != 0).then_some(port),
            path: None,
            method: None,
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }
}

impl fmt::Display for MatchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(method) = &self.method {
            write!(f, "{} ", method)?;
        }
        write!(
            f,
            "{}://{}",
            self.scheme.as_deref().unwrap_or("*"),
            self.host.as_deref().unwrap_or("*")
        )?;
        match self.port {
            Some(port) => write!(f, ":{}", port)?,
            None => write!(f, ":*")?,
        }
        if let Some(path) = &self.path {
            write!(f, "{}", path)?;
        }
        Ok(())
    }
}
