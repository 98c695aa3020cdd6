//! Startup failure taxonomy.

use std::error::Error as StdError;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::{schema::keys, ConfigError};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why the process could not start or keep running.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A required setting is absent, empty or malformed.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A dependency could not be constructed.
    #[error("failed to construct {dependency}: {source}")]
    DependencyConstruction {
        dependency: &'static str,
        #[source]
        source: BoxError,
    },

    /// Anything raised after the dependencies were built.
    #[error("unhandled runtime error: {0}")]
    UnhandledRuntime(#[source] BoxError),
}

impl StartupError {
    pub fn dependency(dependency: &'static str, source: impl Into<BoxError>) -> Self {
        StartupError::DependencyConstruction {
            dependency,
            source: source.into(),
        }
    }

    pub fn runtime(source: impl Into<BoxError>) -> Self {
        StartupError::UnhandledRuntime(source.into())
    }

    /// Short, stable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            StartupError::Configuration(_) => "configuration",
            StartupError::DependencyConstruction { .. } => "dependency_construction",
            StartupError::UnhandledRuntime(_) => "unhandled_runtime",
        }
    }
}

impl From<CacheError> for StartupError {
    /// A malformed connection string is a configuration problem; anything
    /// else means the store could not be reached.
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::InvalidConnectionString { reason } => {
                StartupError::Configuration(ConfigError::Invalid {
                    key: keys::REDIS_CONNECTION_STRING,
                    value: "<redacted>".to_string(),
                    reason,
                })
            }
            other => StartupError::dependency("cache connection", other),
        }
    }
}
