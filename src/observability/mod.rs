//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceIdentity (name, version)
//!     → logging.rs  console + OTLP logs   (LoggingSink)
//!     → metrics.rs  Prometheus scrape + OTLP metrics (MetricsPipeline)
//!     → tracing.rs  sampled spans → OTLP traces     (TracingPipeline)
//!
//! Instrumentation sources:
//!     http server middleware, outbound http client, cache commands,
//!     process and runtime collectors (collectors.rs)
//! ```
//!
//! # Design Decisions
//! - One identity value threaded through every provider, no global
//! - Every signal shares one `TelemetryEndpoint`
//! - Export failures at runtime are logged and dropped, never fatal
//! - Exporters can be swapped for in-process ones (`ExporterOverrides`)

pub mod collectors;
pub mod endpoint;
pub mod identity;
pub mod instruments;
pub mod logging;
pub mod metrics;
pub mod sampling;
pub mod tracing;

use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader};
use opentelemetry_sdk::trace::{SpanExporter, TracerProviderBuilder};
use thiserror::Error;

pub use endpoint::{ExportProtocol, TelemetryEndpoint};
pub use identity::ServiceIdentity;
pub use logging::{FlushGuard, LoggingSink, Severity};
pub use self::metrics::{MetricsPipeline, SourceMeter};
pub use sampling::SamplingPolicy;
pub use self::tracing::TracingPipeline;

/// Errors raised while assembling or tearing down telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("failed to build {signal} exporter for {endpoint}: {source}")]
    Exporter {
        signal: &'static str,
        endpoint: String,
        #[source]
        source: opentelemetry_otlp::ExporterBuildError,
    },

    #[error("failed to configure scrape endpoint: {0}")]
    Scrape(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    /// A push or flush to the collector failed. Never fatal.
    #[error("{signal} export transport failed during {action}: {source}")]
    ExportTransport {
        signal: &'static str,
        action: &'static str,
        #[source]
        source: OTelSdkError,
    },
}

pub(crate) type SpanExportHook = Box<dyn FnOnce(TracerProviderBuilder) -> TracerProviderBuilder + Send>;
pub(crate) type MetricExportHook =
    Box<dyn FnOnce(MeterProviderBuilder, Duration) -> MeterProviderBuilder + Send>;

/// In-process replacements for the OTLP span and metric exporters.
///
/// The default value exports over OTLP to the configured endpoint.
#[derive(Default)]
pub struct ExporterOverrides {
    pub(crate) spans: Option<SpanExportHook>,
    pub(crate) metrics: Option<MetricExportHook>,
}

impl ExporterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch spans into `exporter`.
    pub fn spans<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.spans = Some(Box::new(move |builder| builder.with_batch_exporter(exporter)));
        self
    }

    /// Push metrics into `exporter` on the configured interval.
    pub fn metrics<E: PushMetricExporter>(mut self, exporter: E) -> Self {
        self.metrics = Some(Box::new(move |builder, interval| {
            builder.with_reader(PeriodicReader::builder(exporter).with_interval(interval).build())
        }));
        self
    }
}

impl std::fmt::Debug for ExporterOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterOverrides")
            .field("spans", &self.spans.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
