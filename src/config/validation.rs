//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool sizes, addresses, ports)
//! - Check every egress rule compiles (ip, mask, path pattern, proxy)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::compile::compile_policies;
use crate::config::schema::ServiceConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{location}: {reason}")]
pub struct ValidationError {
    /// Dotted path of the offending entry, e.g. `apps.default.proxies[0]`.
    pub location: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.client.max_connections_total == 0 {
        errors.push(ValidationError::new("client.max_connections_total", "must be at least 1"));
    }
    if config.client.max_connections_per_route == 0 {
        errors.push(ValidationError::new("client.max_connections_per_route", "must be at least 1"));
    }
    if config.client.max_connections_per_route > config.client.max_connections_total {
        errors.push(ValidationError::new(
            "client.max_connections_per_route",
            "must not exceed max_connections_total",
        ));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if let Err(mut rule_errors) = compile_policies(config) {
        errors.append(&mut rule_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
