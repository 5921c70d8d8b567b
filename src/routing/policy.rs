//! Per-job egress policy.
//!
//! An `EgressPolicy` is compiled once when a job configuration is loaded and
//! is shared read-only (behind `Arc`) by every request of every job using it.

use std::fmt;

use crate::error::MatchError;
use crate::routing::info::MatchInfo;
use crate::routing::matcher::Matcher;
use crate::routing::resolver::HostResolver;

/// A forward proxy.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyTarget {
    pub fn new(host: impl Into<String>, port: u16, scheme: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: scheme.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Proxy URL without credentials.
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl fmt::Debug for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTarget")
            .field("url", &self.url())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Send requests matching `matcher` through `target`.
#[derive(Debug, Clone)]
pub struct ProxyRule {
    pub matcher: Matcher,
    pub target: ProxyTarget,
}

/// Accept or reject requests matching `matcher`.
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub matcher: Matcher,
    pub reject: bool,
}

/// Credentials offered when a matching server asks for authentication.
#[derive(Clone)]
pub struct CredentialRule {
    pub matcher: Matcher,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for CredentialRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRule")
            .field("matcher", &self.matcher)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Ordered routing rules of one job. First match wins everywhere.
#[derive(Debug, Clone, Default)]
pub struct EgressPolicy {
    proxies: Vec<ProxyRule>,
    access: Vec<AccessRule>,
    credentials: Vec<CredentialRule>,
}

impl EgressPolicy {
    pub fn new(proxies: Vec<ProxyRule>) -> Self {
        Self {
            proxies,
            ..Self::default()
        }
    }

    pub fn with_access(mut self, access: Vec<AccessRule>) -> Self {
        self.access = access;
        self
    }

    pub fn with_credentials(mut self, credentials: Vec<CredentialRule>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn proxies(&self) -> &[ProxyRule] {
        &self.proxies
    }

    /// Proxy of the first matching rule, or `None` for a direct connection.
    pub fn select_proxy(
        &self,
        info: &MatchInfo,
        resolver: &dyn HostResolver,
    ) -> Result<Option<&ProxyTarget>, MatchError> {
        for rule in &self.proxies {
            if rule.matcher.matches(info, resolver)? {
                return Ok(Some(&rule.target));
            }
        }
        Ok(None)
    }

    /// An empty access list allows everything; otherwise the first matching
    /// rule decides and an unmatched request is rejected.
    pub fn is_allowed(&self, info: &MatchInfo, resolver: &dyn HostResolver) -> Result<bool, MatchError> {
        if self.access.is_empty() {
            return Ok(true);
        }
        for rule in &self.access {
            if rule.matcher.matches(info, resolver)? {
                return Ok(!rule.reject);
            }
        }
        Ok(false)
    }

    pub fn credentials_for(
        &self,
        info: &MatchInfo,
        resolver: &dyn HostResolver,
    ) -> Result<Option<&CredentialRule>, MatchError> {
        for rule in &self.credentials {
            if rule.matcher.matches(info, resolver)? {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}
