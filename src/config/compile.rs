//! Compilation of app configurations into immutable egress policies.
//!
//! # Design Decisions
//! - Every rule is compiled even after a failure, so one load reports every
//!   bad ip, mask, pattern, port and proxy at once
//! - A compiled policy is shared behind `Arc` and never mutated; a reload
//!   builds a new `PolicySet`

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::schema::{AppConfig, MatcherConfig, ProxyTargetConfig, ServiceConfig};
use crate::config::validation::ValidationError;
use crate::routing::matcher::{AddressMatcher, LocalMatcher, Matcher, PathPattern};
use crate::routing::policy::{AccessRule, CredentialRule, EgressPolicy, ProxyRule, ProxyTarget};

/// Compiled policies keyed by app id.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    apps: BTreeMap<String, Arc<EgressPolicy>>,
}

impl PolicySet {
    /// Policy of `app`, if the app is configured.
    pub fn get(&self, app: &str) -> Option<Arc<EgressPolicy>> {
        self.apps.get(app).cloned()
    }

    pub fn app_ids(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

/// Compile the policy of every configured app.
pub fn compile_policies(config: &ServiceConfig) -> Result<PolicySet, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut apps = BTreeMap::new();
    for (id, app) in &config.apps {
        match compile_app(id, app) {
            Ok(policy) => {
                apps.insert(id.clone(), Arc::new(policy));
            }
            Err(mut app_errors) => errors.append(&mut app_errors),
        }
    }
    if errors.is_empty() {
        Ok(PolicySet { apps })
    } else {
        Err(errors)
    }
}

/// Compile one app's rule lists, preserving their order.
pub fn compile_app(id: &str, app: &AppConfig) -> Result<EgressPolicy, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut report = |section: &str, index: usize, reason: String| {
        errors.push(ValidationError::new(format!("apps.{}.{}[{}]", id, section, index), reason));
    };

    let mut proxies = Vec::with_capacity(app.proxies.len());
    for (i, rule) in app.proxies.iter().enumerate() {
        match (compile_matcher(&rule.matcher), compile_proxy(&rule.proxy)) {
            (Ok(matcher), Ok(target)) => proxies.push(ProxyRule { matcher, target }),
            (matcher, target) => {
                for reason in [matcher.err(), target.err()].into_iter().flatten() {
                    report("proxies", i, reason);
                }
            }
        }
    }

    let mut access = Vec::with_capacity(app.access.len());
    for (i, rule) in app.access.iter().enumerate() {
        match compile_matcher(&rule.matcher) {
            Ok(matcher) => access.push(AccessRule {
                matcher,
                reject: rule.reject,
            }),
            Err(reason) => report("access", i, reason),
        }
    }

    let mut credentials = Vec::with_capacity(app.credentials.len());
    for (i, rule) in app.credentials.iter().enumerate() {
        match compile_matcher(&rule.matcher) {
            Ok(matcher) => credentials.push(CredentialRule {
                matcher,
                username: rule.username.clone(),
                password: rule.password.clone(),
            }),
            Err(reason) => report("credentials", i, reason),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    tracing::debug!(
        app = %id,
        proxies = proxies.len(),
        access = access.len(),
        credentials = credentials.len(),
        "Compiled egress policy"
    );
    Ok(EgressPolicy::new(proxies)
        .with_access(access)
        .with_credentials(credentials))
}

pub fn compile_matcher(config: &MatcherConfig) -> Result<Matcher, String> {
    match config {
        MatcherConfig::Address {
            ip,
            mask,
            port,
            path_pattern,
        } => {
            let ip: Ipv4Addr = ip.trim().parse().map_err(|_| format!("invalid ip '{}'", ip))?;
            let mut matcher = AddressMatcher::new(ip)
                .with_port(compile_port(*port)?)
                .with_path_pattern(compile_pattern(path_pattern.as_deref())?);
            if let Some(mask) = mask {
                let parsed: Ipv4Addr = mask.trim().parse().map_err(|_| format!("invalid mask '{}'", mask))?;
                matcher = matcher.with_mask(parsed);
            }
            Ok(matcher.into())
        }
        MatcherConfig::Local { port, path_pattern } => Ok(LocalMatcher::new()
            .with_port(compile_port(*port)?)
            .with_path_pattern(compile_pattern(path_pattern.as_deref())?)
            .into()),
    }
}

pub fn compile_proxy(config: &ProxyTargetConfig) -> Result<ProxyTarget, String> {
    let host = config.host.trim();
    if host.is_empty() {
        return Err("proxy host is empty".to_string());
    }
    let scheme = config.scheme.trim().to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => 80,
        "https" => 443,
        other => return Err(format!("unsupported proxy scheme '{}'", other)),
    };
    let port = match config.port {
        None => default_port,
        Some(p) if (1..=65535).contains(&p) => p as u16,
        Some(p) => return Err(format!("invalid proxy port {}", p)),
    };
    let target = ProxyTarget::new(host, port, scheme);
    match (&config.username, &config.password) {
        (Some(username), Some(password)) => Ok(target.with_credentials(username, password)),
        (None, None) => Ok(target),
        _ => Err("proxy username and password must be set together".to_string()),
    }
}

/// `None` (any port) for absent or non-positive values.
fn compile_port(port: Option<i64>) -> Result<Option<u16>, String> {
    match port {
        None => Ok(None),
        Some(p) if p <= 0 => Ok(None),
        Some(p) => u16::try_from(p)
            .map(Some)
            .map_err(|_| format!("invalid port {}", p)),
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<PathPattern>, String> {
    pattern
        .map(|p| PathPattern::new(p).map_err(|e| format!("invalid path pattern '{}': {}", p, e)))
        .transpose()
}
