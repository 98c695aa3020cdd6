//! Service bootstrap with OpenTelemetry observability.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::ServiceConfig;
pub use error::StartupError;
pub use http::HttpServer;
pub use lifecycle::{Orchestrator, Shutdown, StartupReport};
