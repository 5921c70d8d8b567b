//! Route planning for outbound requests.
//!
//! # Responsibilities
//! - Read the ambient job policy at dispatch time
//! - Reject targets the policy's access list forbids
//! - Pick the proxy of the first matching rule, or a direct connection
//!
//! # Design Decisions
//! - No ambient policy means direct; evaluation is skipped entirely
//! - Resolution errors abort planning; they are never "no match"
//! - Matching may block on DNS, so async callers evaluate on the blocking pool
//!   after capturing the ambient policy on their own task
//! - Each host is resolved once per pass; a direct plan carries the addresses
//!   the policy was checked against so the connection goes to those and not
//!   to a later lookup

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::RouteError;
use crate::observability::metrics;
use crate::routing::ambient::AmbientJobContext;
use crate::routing::info::MatchInfo;
use crate::routing::policy::{EgressPolicy, ProxyTarget};
use crate::routing::resolver::{HostResolver, MemoResolver, SystemResolver};

/// How one request leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Direct,
    Proxy(ProxyTarget),
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::Direct => "direct",
            Route::Proxy(_) => "proxy",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => f.write_str("direct"),
            Route::Proxy(target) => write!(f, "proxy {}", target),
        }
    }
}

/// A route together with the target addresses the policy approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub route: Route,
    /// Empty when no rule looked the target up, or the route is a proxy.
    pub addresses: Vec<IpAddr>,
}

impl Plan {
    fn unchecked(route: Route) -> Self {
        Self {
            route,
            addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutePlanner {
    resolver: Arc<dyn HostResolver>,
}

impl Default for RoutePlanner {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl RoutePlanner {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &dyn HostResolver {
        self.resolver.as_ref()
    }

    /// Evaluate `policy` for `info`.
    pub fn route(&self, info: &MatchInfo, policy: Option<&EgressPolicy>) -> Result<Route, RouteError> {
        self.evaluate(info, policy).map(|plan| plan.route)
    }

    /// Evaluate `policy` for `info`, keeping the addresses it was checked against.
    pub fn evaluate(&self, info: &MatchInfo, policy: Option<&EgressPolicy>) -> Result<Plan, RouteError> {
        let Some(policy) = policy else {
            return Ok(Plan::unchecked(Route::Direct));
        };
        let resolver = MemoResolver::new(self.resolver());
        if !policy.is_allowed(info, &resolver)? {
            metrics::record_denied();
            return Err(RouteError::Denied(info.to_string()));
        }
        let plan = match policy.select_proxy(info, &resolver)? {
            Some(target) => Plan::unchecked(Route::Proxy(target.clone())),
            None => Plan {
                route: Route::Direct,
                addresses: info
                    .host()
                    .and_then(|host| resolver.addresses(host))
                    .unwrap_or_default(),
            },
        };
        metrics::record_route(plan.route.label());
        tracing::debug!(target = %info, route = %plan.route, addresses = ?plan.addresses, "Route planned");
        Ok(plan)
    }

    /// Plan with the ambient job policy.
    pub async fn plan(&self, info: MatchInfo) -> Result<Plan, RouteError> {
        let Some(policy) = AmbientJobContext::current() else {
            return Ok(Plan::unchecked(Route::Direct));
        };
        let planner = self.clone();
        tokio::task::spawn_blocking(move || planner.evaluate(&info, Some(&policy)))
            .await
            .map_err(|e| RouteError::Interrupted(e.to_string()))?
    }
}
