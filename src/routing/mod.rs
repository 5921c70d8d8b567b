//! Egress routing subsystem.
//!
//! # Data Flow
//! ```text
//! Job configuration load:
//!     config::compile → matcher.rs (Matcher) → policy.rs (EgressPolicy, immutable)
//!
//! Outbound request:
//!     ambient.rs (job policy bound to the dispatching future)
//!     → info.rs (MatchInfo from URL + method)
//!     → planner.rs (access check, first matching proxy rule)
//!     → Return: Plan { Route::Direct + approved addresses | Route::Proxy(target) } | RouteError
//! ```
//!
//! # Design Decisions
//! - Policies compiled at load time, read-only afterwards (no locking)
//! - Deterministic: first match wins, rule order is significant
//! - Unresolvable hosts fail the request instead of falling through

pub mod ambient;
pub mod info;
pub mod matcher;
pub mod planner;
pub mod policy;
pub mod resolver;

pub use ambient::AmbientJobContext;
pub use info::MatchInfo;
pub use matcher::{AddressMatcher, LocalMatcher, Matcher, PathPattern};
pub use planner::{Plan, Route, RoutePlanner};
pub use policy::{AccessRule, CredentialRule, EgressPolicy, ProxyRule, ProxyTarget};
pub use resolver::{HostResolver, StaticResolver, SystemResolver};
