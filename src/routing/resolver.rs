//! Host name resolution used by matchers.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Mutex;

/// Resolves a host name to the addresses it currently points at.
///
/// Implementations are synchronous; callers on an async runtime run policy
/// evaluation on the blocking pool.
pub trait HostResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (getaddrinfo).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let addrs: Vec<IpAddr> = (host, 0).to_socket_addrs()?.map(|a| a.ip()).collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            ));
        }
        Ok(addrs)
    }
}

/// Resolver answering from a fixed table. IP literals pass through.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.entries
            .insert(host.to_ascii_lowercase(), addrs.into_iter().collect());
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        self.entries
            .get(&host.to_ascii_lowercase())
            .filter(|addrs| !addrs.is_empty())
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host))
            })
    }
}

/// Answers each host once and remembers the result, so every rule of one
/// planning pass sees the same addresses and the connection can be pinned
/// to them afterwards.
#[derive(Debug)]
pub(crate) struct MemoResolver<'a> {
    inner: &'a dyn HostResolver,
    seen: Mutex<HashMap<String, Vec<IpAddr>>>,
}

impl<'a> MemoResolver<'a> {
    pub(crate) fn new(inner: &'a dyn HostResolver) -> Self {
        Self {
            inner,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Addresses answered for `host`, if it was looked up.
    pub(crate) fn addresses(&self, host: &str) -> Option<Vec<IpAddr>> {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.get(&host.to_ascii_lowercase()).cloned()
    }
}

impl HostResolver for MemoResolver<'_> {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let key = host.to_ascii_lowercase();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(addrs) = seen.get(&key) {
            return Ok(addrs.clone());
        }
        let addrs = self.inner.resolve(host)?;
        seen.insert(key, addrs.clone());
        Ok(addrs)
    }
}
