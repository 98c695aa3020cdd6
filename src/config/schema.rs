//! Configuration schema definitions.
//!
//! This module defines the resolved, typed configuration for the service and
//! the names of the settings it is resolved from.

use std::fmt;
use std::time::Duration;

use crate::observability::{SamplingPolicy, TelemetryEndpoint};

/// Setting keys, in their conventional spelling.
pub mod keys {
    pub const OTLP_ENDPOINT_URL: &str = "OTLP_ENDPOINT_URL";
    pub const OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
    pub const TRACES_SAMPLER_ARG: &str = "OTEL_TRACES_SAMPLER_ARG";
    pub const EXPORT_TIMEOUT_SECS: &str = "Telemetry:ExportTimeoutSecs";
    pub const METRICS_EXPORT_INTERVAL_SECS: &str = "Telemetry:MetricsExportIntervalSecs";
    pub const METRICS_PATH: &str = "Telemetry:MetricsPath";

    pub const SERVICE_NAME: &str = "Service:Name";
    pub const SERVICE_VERSION: &str = "Service:Version";
    pub const SERVICE_ENVIRONMENT: &str = "Service:Environment";

    pub const BIND_ADDRESS: &str = "Listener:BindAddress";

    pub const REDIS_SECTION: &str = "Redis";
    pub const REDIS_CONNECTION_STRING: &str = "Redis:ConnectionString";
    pub const REDIS_VERBOSE_STATEMENTS: &str = "Redis:VerboseStatements";
    pub const REDIS_CONNECT_TIMEOUT_SECS: &str = "Redis:ConnectTimeoutSecs";

    pub const AUTH_SIGNING_KEY: &str = "Auth:SigningKey";
}

pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317/";

/// Built-in defaults layer. Required settings deliberately have no default.
pub fn default_settings() -> Vec<(&'static str, String)> {
    vec![
        (keys::OTLP_ENDPOINT_URL, DEFAULT_OTLP_ENDPOINT.to_string()),
        (keys::OTLP_PROTOCOL, "grpc".to_string()),
        (keys::TRACES_SAMPLER_ARG, "1.0".to_string()),
        (keys::EXPORT_TIMEOUT_SECS, "10".to_string()),
        (keys::METRICS_EXPORT_INTERVAL_SECS, "60".to_string()),
        (keys::METRICS_PATH, "/metrics".to_string()),
        (keys::SERVICE_NAME, env!("CARGO_PKG_NAME").to_string()),
        (keys::SERVICE_VERSION, env!("CARGO_PKG_VERSION").to_string()),
        (keys::SERVICE_ENVIRONMENT, "production".to_string()),
        (keys::BIND_ADDRESS, "0.0.0.0:8080".to_string()),
    ]
}

/// Root configuration for the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub listener: ListenerConfig,
    pub telemetry: TelemetryConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
}

/// Identity and hosting environment of the process.
#[derive(Debug, Clone)]
pub struct ServiceSection {
    pub name: String,
    pub version: String,
    pub environment: Environment,
}

/// Hosting environment. Only `Development` exposes the documentation endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse an environment name; anything unrecognized is production.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "staging" => Environment::Staging,
            _ => Environment::Production,
        }
    }

    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Telemetry export configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub endpoint: TelemetryEndpoint,
    pub sampling: SamplingPolicy,
    pub metrics_export_interval: Duration,
    pub metrics_path: String,
}

/// Cache store connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection string, either `host:port[,options]` or a `redis://` URL.
    pub connection_string: String,

    /// Record full statement text on cache spans.
    ///
    /// Off by default: statements may carry user data and inflate span size.
    pub verbose_statements: bool,

    /// Upper bound for the startup connection attempt.
    pub connect_timeout: Duration,
}

/// Authentication primitives.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Raw signing key material, validated when the key is constructed.
    pub signing_key: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("Development"), Environment::Development);
        assert_eq!(Environment::parse(" dev "), Environment::Development);
        assert_eq!(Environment::parse("staging"), Environment::Staging);
        assert_eq!(Environment::parse("whatever"), Environment::Production);
    }

    #[test]
    fn test_defaults_have_no_required_settings() {
        let defaults = default_settings();
        assert!(defaults.iter().all(|(k, _)| !k.starts_with("Redis")));
        assert!(defaults.iter().all(|(k, _)| *k != keys::AUTH_SIGNING_KEY));
    }

    #[test]
    fn test_auth_config_debug_redacts_key() {
        let auth = AuthConfig {
            signing_key: Some("super-secret".into()),
        };
        let rendered = format!("{:?}", auth);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("redacted"));
    }
}
