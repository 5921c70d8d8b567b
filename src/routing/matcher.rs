//! Request matchers used by egress policies.
//!
//! # Responsibilities
//! - Match the target address against a configured network (ip + mask)
//! - Match the target against the identity of the running host (loopback, "localhost")
//! - Refine either with an optional port and an anchored path pattern
//!
//! # Design Decisions
//! - Closed set of variants behind one `Matcher::matches`
//! - A field the `MatchInfo` cannot supply is a wildcard, never a mismatch
//! - Host resolution failure is an error, never a false match
//! - A host matches when any of its resolved addresses matches

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use regex::Regex;

use crate::error::MatchError;
use crate::routing::info::MatchInfo;
use crate::routing::resolver::HostResolver;

/// Regular expression that must match the whole request path.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

/// A predicate over `MatchInfo`.
#[derive(Debug, Clone)]
pub enum Matcher {
    Address(AddressMatcher),
    Local(LocalMatcher),
}

impl Matcher {
    pub fn matches(&self, info: &MatchInfo, resolver: &dyn HostResolver) -> Result<bool, MatchError> {
        match self {
            Matcher::Address(m) => m.matches(info, resolver),
            Matcher::Local(m) => m.matches(info, resolver),
        }
    }
}

impl From<AddressMatcher> for Matcher {
    fn from(m: AddressMatcher) -> Self {
        Matcher::Address(m)
    }
}

impl From<LocalMatcher> for Matcher {
    fn from(m: LocalMatcher) -> Self {
        Matcher::Local(m)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Address(m) => write!(f, "address {}/{}", m.ip, m.mask)?,
            Matcher::Local(_) => write!(f, "local")?,
        }
        let (port, path) = match self {
            Matcher::Address(m) => (m.port, m.path.as_ref()),
            Matcher::Local(m) => (m.port, m.path.as_ref()),
        };
        if let Some(port) = port {
            write!(f, " port={}", port)?;
        }
        if let Some(path) = path {
            write!(f, " path={}", path.as_str())?;
        }
        Ok(())
    }
}

/// Matches targets inside a configured IPv4 network.
#[derive(Debug, Clone)]
pub struct AddressMatcher {
    ip: Ipv4Addr,
    mask: Ipv4Addr,
    port: Option<u16>,
    path: Option<PathPattern>,
}

impl AddressMatcher {
    /// Matches exactly `ip` until a mask is set.
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            mask: Ipv4Addr::BROADCAST,
            port: None,
            path: None,
        }
    }

    pub fn with_mask(mut self, mask: Ipv4Addr) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_path_pattern(mut self, path: Option<PathPattern>) -> Self {
        self.path = path;
        self
    }

    pub fn matches(&self, info: &MatchInfo, resolver: &dyn HostResolver) -> Result<bool, MatchError> {
        if let Some(host) = info.host() {
            let expected = network_of(self.ip, self.mask);
            let in_network = resolve(resolver, host)?
                .into_iter()
                .filter_map(as_ipv4)
                .any(|addr| network_of(addr, self.mask) == expected);
            if !in_network {
                return Ok(false);
            }
        }
        Ok(port_matches(self.port, info) && path_matches(self.path.as_ref(), info))
    }
}

/// Matches targets that are the running host itself.
#[derive(Debug, Clone, Default)]
pub struct LocalMatcher {
    port: Option<u16>,
    path: Option<PathPattern>,
}

impl LocalMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_path_pattern(mut self, path: Option<PathPattern>) -> Self {
        self.path = path;
        self
    }

    pub fn matches(&self, info: &MatchInfo, resolver: &dyn HostResolver) -> Result<bool, MatchError> {
        if let Some(host) = info.host() {
            let targets = resolve(resolver, host)?;
            let is_local = if targets.iter().any(|ip| is_local_address(*ip)) {
                true
            } else {
                let localhost = resolve(resolver, "localhost")?;
                targets
                    .iter()
                    .any(|ip| localhost.iter().any(|l| l.to_canonical() == ip.to_canonical()))
            };
            if !is_local {
                return Ok(false);
            }
        }
        Ok(port_matches(self.port, info) && path_matches(self.path.as_ref(), info))
    }
}

fn resolve(resolver: &dyn HostResolver, host: &str) -> Result<Vec<IpAddr>, MatchError> {
    resolver
        .resolve(host)
        .map_err(|source| MatchError::UnresolvableHost {
            host: host.to_string(),
            source,
        })
}

fn network_of(ip: Ipv4Addr, mask: Ipv4Addr) -> u32 {
    u32::from(ip) & u32::from(mask)
}

fn as_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip.to_canonical() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    }
}

/// Loopback range, plus the unspecified address which connects locally.
fn is_local_address(ip: IpAddr) -> bool {
    let ip = ip.to_canonical();
    ip.is_loopback() || ip.is_unspecified()
}

fn port_matches(expected: Option<u16>, info: &MatchInfo) -> bool {
    match (expected, info.port()) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => true,
    }
}

fn path_matches(pattern: Option<&PathPattern>, info: &MatchInfo) -> bool {
    match (pattern, info.path()) {
        (Some(pattern), Some(path)) => pattern.is_match(path),
        _ => true,
    }
}
