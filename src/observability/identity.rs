//! Resource identity of the running process.

use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

use crate::observability::TelemetryError;

/// Immutable name/version pair attached to every log, metric and span.
///
/// Constructed once at startup and passed by reference into every provider
/// builder. There is no process-wide copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    version: String,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, TelemetryError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(TelemetryError::EmptyServiceName);
        }
        Ok(Self {
            name,
            version: version.into().trim().to_string(),
        })
    }

    /// Identity of this binary as built.
    pub fn from_package() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// OpenTelemetry resource carrying `service.name` and `service.version`.
    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.name.clone())
            .with_attribute(KeyValue::new(SERVICE_VERSION, self.version.clone()))
            .build()
    }

    /// Instrumentation scope for the service's own trace source.
    pub fn scope(&self) -> InstrumentationScope {
        self.scope_named(self.name.clone())
    }

    /// Instrumentation scope for a named source, versioned with the service.
    pub fn scope_named(&self, name: impl Into<std::borrow::Cow<'static, str>>) -> InstrumentationScope {
        InstrumentationScope::builder(name)
            .with_version(self.version.clone())
            .build()
    }

    /// Constant labels for series exposed on the scrape endpoint.
    pub fn metric_labels(&self) -> [(&'static str, String); 2] {
        [
            ("service_name", self.name.clone()),
            ("service_version", self.version.clone()),
        ]
    }
}
