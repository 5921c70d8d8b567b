//! Outbound HTTP egress for print jobs.
//!
//! Every job carries an ordered egress policy deciding, per request, whether
//! to connect direct or through a forward proxy. All jobs share one pooled
//! client; the policy of the job issuing a request is bound to that request's
//! task, so concurrent jobs never see each other's rules.

pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod observability;
pub mod routing;

pub use config::schema::ServiceConfig;
pub use error::{FetchError, MatchError, RouteError};
pub use http::{FetchResponse, RequestExecutor, SharedClient};
pub use routing::{AmbientJobContext, EgressPolicy, Route, RoutePlanner};
