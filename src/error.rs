//! Error taxonomy for outbound fetches.
//!
//! # Design Decisions
//! - Resolution failures are errors, never a silent "no match"
//! - Routing failures surface to callers as `FetchError::Transport`; the
//!   underlying cause is kept for logging only
//! - Policy configuration errors live in `config::validation` and are raised
//!   at load time, never here

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure while evaluating a matcher against a request descriptor.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("unable to resolve host '{host}': {source}")]
    UnresolvableHost {
        host: String,
        #[source]
        source: io::Error,
    },
}

/// Failure while planning the route of one outbound request.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Resolution(#[from] MatchError),

    #[error("{0} is rejected by the egress policy")]
    Denied(String),

    #[error("route planning interrupted: {0}")]
    Interrupted(String),
}

/// Why a request did not complete at the transport level.
#[derive(Debug, Error)]
pub enum TransportCause {
    #[error("routing failed: {0}")]
    Route(#[source] RouteError),

    #[error("no pooled connection available within {0:?}")]
    PoolTimeout(Duration),

    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Error returned to callers of the request executor.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("malformed target '{url}': {reason}")]
    MalformedTarget { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportCause,
    },

    #[error("request to {url} denied by egress policy")]
    Denied { url: String },
}

impl FetchError {
    pub fn malformed(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedTarget {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(url: impl Into<String>, source: impl Into<TransportCause>) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Maps a routing failure onto the caller-facing taxonomy.
    pub fn from_route(url: impl Into<String>, err: RouteError) -> Self {
        match err {
            RouteError::Denied(_) => Self::Denied { url: url.into() },
            other => Self::transport(url, TransportCause::Route(other)),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedTarget { .. } => "malformed",
            Self::Transport { .. } => "transport",
            Self::Denied { .. } => "denied",
        }
    }
}
