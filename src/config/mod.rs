//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors collected)
//!     → compile.rs (Arc<EgressPolicy> per app)
//!     → registry.rs (ConfigHandle, read by job launchers)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → compile.rs builds a new PolicySet
//!     → atomic swap inside ConfigHandle
//!     → jobs started afterwards see the new policies
//! ```
//!
//! # Design Decisions
//! - Policies are immutable once compiled; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Bad matcher or proxy definitions fail the load, never a request
//! - Client settings are read once; a reload only swaps policies

pub mod compile;
pub mod loader;
pub mod registry;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use compile::{compile_policies, PolicySet};
pub use loader::{load_config, load_policies, ConfigError};
pub use registry::ConfigHandle;
pub use schema::{AppConfig, ClientConfig, MatcherConfig, ObservabilityConfig, ServiceConfig};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
