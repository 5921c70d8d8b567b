//! Outbound HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! job task
//!     → request.rs (build, strip framing headers, bind job policy)
//!     → client.rs (plan route from the ambient policy)
//!     → pool.rs (lease a connection slot, bounded wait)
//!     → per-route reqwest pool (direct, or one per proxy)
//!     → response.rs (status/headers, lazy body, release on close)
//!     → back to the job
//! ```

pub mod client;
pub mod dns;
pub mod pool;
pub mod request;
pub mod response;
pub mod user_agent;

pub use client::{ClientSettings, Dispatch, SharedClient};
pub use pool::{ConnectionLease, ConnectionLimiter};
pub use request::{OutboundRequest, RequestExecutor};
pub use response::{BodyStream, FetchResponse};
