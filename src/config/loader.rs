//! Configuration loading from layered sources.

use std::path::Path;

use thiserror::Error;

use crate::config::schema::{
    keys, AuthConfig, Environment, ListenerConfig, RedisConfig, ServiceConfig, ServiceSection,
    TelemetryConfig, DEFAULT_OTLP_ENDPOINT,
};
use crate::config::sources::ConfigSources;
use crate::config::validation;

/// Environment variable naming an optional configuration file.
pub const CONFIG_FILE_ENV: &str = "OTEL_DEMO_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{section} configuration is missing")]
    MissingSection { section: &'static str },

    #[error("{key} is not configured")]
    MissingValue { key: &'static str },

    #[error("{key} is configured but empty")]
    EmptyValue { key: &'static str },

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid override {0:?}, expected KEY=VALUE")]
    Override(String),
}

impl ConfigError {
    /// Name of the setting or section the error is about, when there is one.
    pub fn setting(&self) -> Option<&'static str> {
        match self {
            ConfigError::MissingSection { section } => Some(*section),
            ConfigError::MissingValue { key }
            | ConfigError::EmptyValue { key }
            | ConfigError::Invalid { key, .. } => Some(*key),
            _ => None,
        }
    }
}

/// Build the standard source stack: defaults, optional file, environment,
/// then command-line overrides.
pub fn layered_sources(file: Option<&Path>, overrides: &[String]) -> Result<ConfigSources, ConfigError> {
    let mut sources = ConfigSources::new().with_defaults();

    let env_file = std::env::var(CONFIG_FILE_ENV).ok().filter(|p| !p.trim().is_empty());
    if let Some(path) = file.map(Path::to_path_buf).or_else(|| env_file.map(Into::into)) {
        sources = sources.with_toml_file(&path)?;
    }

    sources = sources.with_environment();

    let pairs = overrides
        .iter()
        .map(|raw| {
            raw.split_once('=')
                .filter(|(k, _)| !k.trim().is_empty())
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| ConfigError::Override(raw.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !pairs.is_empty() {
        sources = sources.with_layer("command line", pairs);
    }

    Ok(sources)
}

/// Resolve and validate the full service configuration.
pub fn load_config(sources: &ConfigSources) -> Result<ServiceConfig, ConfigError> {
    let telemetry = load_telemetry(sources)?;

    let name = validation::require_non_empty(sources, keys::SERVICE_NAME)?;
    let version = sources
        .get(keys::SERVICE_VERSION)
        .map(str::trim)
        .unwrap_or(env!("CARGO_PKG_VERSION"))
        .to_string();
    let environment = Environment::parse(sources.get(keys::SERVICE_ENVIRONMENT).unwrap_or_default());

    let listener = match sources.get(keys::BIND_ADDRESS) {
        Some(raw) => ListenerConfig {
            bind_address: validation::parse_bind_address(keys::BIND_ADDRESS, raw)?,
        },
        None => ListenerConfig::default(),
    };

    validation::require_section(sources, keys::REDIS_SECTION)?;
    let redis = RedisConfig {
        connection_string: validation::require_non_empty(sources, keys::REDIS_CONNECTION_STRING)?,
        verbose_statements: validation::parse_flag(
            keys::REDIS_VERBOSE_STATEMENTS,
            sources.get(keys::REDIS_VERBOSE_STATEMENTS),
            false,
        )?,
        connect_timeout: validation::parse_secs(
            keys::REDIS_CONNECT_TIMEOUT_SECS,
            sources.get(keys::REDIS_CONNECT_TIMEOUT_SECS),
            5,
        )?,
    };

    let auth = AuthConfig {
        signing_key: sources.get(keys::AUTH_SIGNING_KEY).map(str::to_string),
    };

    tracing::debug!(
        layers = sources.layer_count(),
        endpoint_origin = sources.origin(keys::OTLP_ENDPOINT_URL).unwrap_or("none"),
        redis_origin = sources.origin(keys::REDIS_CONNECTION_STRING).unwrap_or("none"),
        "Configuration resolved"
    );

    Ok(ServiceConfig {
        service: ServiceSection {
            name,
            version,
            environment,
        },
        listener,
        telemetry,
        redis,
        auth,
    })
}

/// Resolve only the telemetry settings.
pub fn load_telemetry(sources: &ConfigSources) -> Result<TelemetryConfig, ConfigError> {
    let protocol = validation::parse_protocol(
        keys::OTLP_PROTOCOL,
        sources.get(keys::OTLP_PROTOCOL).unwrap_or("grpc"),
    )?;
    let endpoint = validation::parse_endpoint(
        keys::OTLP_ENDPOINT_URL,
        sources.get(keys::OTLP_ENDPOINT_URL).unwrap_or(DEFAULT_OTLP_ENDPOINT),
        protocol,
    )?
    .with_timeout(validation::parse_secs(
        keys::EXPORT_TIMEOUT_SECS,
        sources.get(keys::EXPORT_TIMEOUT_SECS),
        10,
    )?);

    let (sampling, note) = validation::parse_sampling_ratio(sources.get(keys::TRACES_SAMPLER_ARG));
    if let Some(note) = note {
        tracing::warn!(setting = keys::TRACES_SAMPLER_ARG, "{}", note);
    }

    Ok(TelemetryConfig {
        endpoint,
        sampling,
        metrics_export_interval: validation::parse_secs(
            keys::METRICS_EXPORT_INTERVAL_SECS,
            sources.get(keys::METRICS_EXPORT_INTERVAL_SECS),
            60,
        )?,
        metrics_path: validation::parse_path(
            keys::METRICS_PATH,
            sources.get(keys::METRICS_PATH).unwrap_or("/metrics"),
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigSources {
        ConfigSources::new().with_defaults()
    }

    #[test]
    fn test_missing_redis_section() {
        let err = load_config(&base()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { section: "Redis" }));
        assert_eq!(err.to_string(), "Redis configuration is missing");
    }

    #[test]
    fn test_empty_connection_string_is_distinct() {
        let sources = base().with_layer("env", [("Redis__ConnectionString", "   ")]);
        let err = load_config(&sources).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue { .. }));
        assert_eq!(err.setting(), Some(keys::REDIS_CONNECTION_STRING));
    }

    #[test]
    fn test_section_without_connection_string() {
        let sources = base().with_layer("env", [("Redis__VerboseStatements", "true")]);
        let err = load_config(&sources).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue { .. }));
    }

    #[test]
    fn test_full_configuration_resolves() {
        let sources = base().with_layer(
            "env",
            [
                ("Redis__ConnectionString", "localhost:6379"),
                ("Redis__VerboseStatements", "true"),
                ("OTEL_TRACES_SAMPLER_ARG", "0.1"),
                ("OTLP_ENDPOINT_URL", "http://collector:4317/"),
                ("Service__Environment", "Development"),
                ("Auth__SigningKey", "0123456789abcdef0123456789abcdef"),
            ],
        );

        let config = load_config(&sources).unwrap();
        assert_eq!(config.redis.connection_string, "localhost:6379");
        assert!(config.redis.verbose_statements);
        assert_eq!(config.telemetry.sampling.ratio(), 0.1);
        assert_eq!(config.telemetry.endpoint.url().host_str(), Some("collector"));
        assert!(config.service.environment.is_development());
        assert_eq!(config.service.name, env!("CARGO_PKG_NAME"));
        assert_eq!(config.telemetry.metrics_path, "/metrics");
        assert!(config.auth.signing_key.is_some());
    }

    #[test]
    fn test_invalid_endpoint_surfaces_value() {
        let sources = base().with_layer(
            "env",
            [
                ("OTLP_ENDPOINT_URL", "not a url"),
                ("Redis__ConnectionString", "localhost:6379"),
            ],
        );
        let err = load_config(&sources).unwrap_err();
        assert_eq!(err.setting(), Some(keys::OTLP_ENDPOINT_URL));
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_endpoint_defaults_when_unset() {
        let telemetry = load_telemetry(&ConfigSources::new()).unwrap();
        assert_eq!(telemetry.endpoint.url().as_str(), DEFAULT_OTLP_ENDPOINT);
        assert_eq!(telemetry.sampling.ratio(), 1.0);
    }

    #[test]
    fn test_override_requires_key_value() {
        assert!(matches!(
            layered_sources(None, &["novalue".to_string()]),
            Err(ConfigError::Override(_))
        ));
        let sources = layered_sources(None, &["Redis__ConnectionString=cache:6379".to_string()]).unwrap();
        assert_eq!(sources.get(keys::REDIS_CONNECTION_STRING), Some("cache:6379"));
        assert_eq!(sources.origin(keys::REDIS_CONNECTION_STRING), Some("command line"));
    }
}
