//! User-Agent header for outbound requests.

pub const AGENT_NAME: &str = "MapPrint";

/// Identifies the transport stack.
pub const TRANSPORT: &str = "reqwest/0.12 (Rust)";

const FALLBACK_VERSION: &str = "0.0.0";

/// `"MapPrint/<version> <transport>"`.
///
/// A missing or blank version falls back to a placeholder; it never fails.
pub fn user_agent(version: Option<&str>) -> String {
    let version = match version.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => {
            tracing::error!("Product version unavailable, using {}", FALLBACK_VERSION);
            FALLBACK_VERSION
        }
    };
    format!("{}/{} {}", AGENT_NAME, version, TRANSPORT)
}

/// Version embedded at build time.
pub fn build_version() -> Option<&'static str> {
    option_env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_version_and_transport() {
        assert_eq!(user_agent(Some("3.31.0")), "MapPrint/3.31.0 reqwest/0.12 (Rust)");
    }

    #[test]
    fn falls_back_when_version_missing() {
        assert_eq!(user_agent(None), "MapPrint/0.0.0 reqwest/0.12 (Rust)");
        assert_eq!(user_agent(Some("  ")), "MapPrint/0.0.0 reqwest/0.12 (Rust)");
    }

    #[test]
    fn build_version_is_crate_version() {
        assert_eq!(build_version(), Some(env!("CARGO_PKG_VERSION")));
    }
}
