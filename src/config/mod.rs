//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults → TOML file → environment → command line
//!     → sources.rs (normalize keys, last layer wins)
//!     → loader.rs (resolve typed settings)
//!     → validation.rs (presence and shape checks)
//!     → ServiceConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is resolved once at startup and never reloaded
//! - Optional settings have defaults; required ones fail fast with the
//!   setting's name in the error
//! - A missing section and an empty value are distinguishable

pub mod loader;
pub mod schema;
pub mod sources;
pub mod validation;

pub use loader::{layered_sources, load_config, load_telemetry, ConfigError};
pub use schema::{
    AuthConfig, Environment, ListenerConfig, RedisConfig, ServiceConfig, ServiceSection,
    TelemetryConfig,
};
pub use sources::ConfigSources;
