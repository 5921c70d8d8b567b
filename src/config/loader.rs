//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::compile::{compile_policies, PolicySet};
use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Load a file and compile its policies.
pub fn load_policies(path: &Path) -> Result<(ServiceConfig, PolicySet), ConfigError> {
    let config = load_config(path)?;
    let policies = compile_policies(&config).map_err(ConfigError::Validation)?;
    tracing::info!(path = ?path, apps = policies.len(), "Configuration loaded");
    Ok((config, policies))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/print-egress.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/print-egress.toml"));
    }

    #[test]
    fn syntax_error_is_parse_error() {
        assert!(matches!(parse_config("[client"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validation_errors_are_listed() {
        let err = parse_config(
            r#"
            [[apps.a.proxies]]
            matcher = { kind = "local", port = 70000 }
            proxy = { host = "proxy", scheme = "ftp" }
            "#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("validation failed: "));
        assert!(message.contains("invalid port 70000"));
        assert!(message.contains("unsupported proxy scheme 'ftp'"));
    }
}
