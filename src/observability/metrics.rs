//! Metrics pipeline.
//!
//! # Responsibilities
//! - Own the scrape registry behind the Prometheus endpoint
//! - Own the OTLP meter provider that pushes on an interval
//! - Hand out one [`SourceMeter`] per instrumentation source
//!
//! # Design Decisions
//! - Instruments are `metrics` handles whose backing store writes to both
//!   exports, so call sites stay on the `metrics` facade
//! - No process-wide recorder is installed; sources hold their meter
//! - The scrape registry labels every series with the service identity
//! - A failure to build the push exporter is fatal; failures to deliver are not

use std::borrow::Cow;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{Key, Label, Level, Metadata, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;

use super::instruments::{BridgedCounter, BridgedGauge, BridgedHistogram};
use super::{MetricExportHook, ServiceIdentity, TelemetryEndpoint, TelemetryError};

/// Instrumentation sources registered by the pipeline itself.
pub mod sources {
    pub const HTTP_SERVER: &str = "otel_demo.http.server";
    pub const HTTP_CLIENT: &str = "otel_demo.http.client";
    pub const PROCESS: &str = "otel_demo.process";
    pub const RUNTIME: &str = "otel_demo.runtime";
}

/// Series names.
pub mod names {
    pub const HTTP_SERVER_REQUESTS: &str = "http_server_requests_total";
    pub const HTTP_SERVER_DURATION: &str = "http_server_request_duration_seconds";
    pub const HTTP_SERVER_ACTIVE: &str = "http_server_active_requests";
    pub const HTTP_CLIENT_REQUESTS: &str = "http_client_requests_total";
    pub const HTTP_CLIENT_DURATION: &str = "http_client_request_duration_seconds";
    pub const PROCESS_UPTIME: &str = "process_uptime_seconds";
    pub const PROCESS_THREADS: &str = "process_threads";
    pub const PROCESS_RESIDENT_MEMORY: &str = "process_resident_memory_bytes";
    pub const RUNTIME_WORKERS: &str = "tokio_workers";
    pub const RUNTIME_ALIVE_TASKS: &str = "tokio_alive_tasks";
    pub const RUNTIME_GLOBAL_QUEUE_DEPTH: &str = "tokio_global_queue_depth";
}

/// Bucket bounds for every `*_seconds` histogram, on both exports.
pub const SECONDS_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for [`MetricsPipeline`].
pub struct MetricsPipelineBuilder {
    identity: ServiceIdentity,
    endpoint: Option<TelemetryEndpoint>,
    hook: Option<MetricExportHook>,
    interval: Duration,
}

impl MetricsPipelineBuilder {
    /// Push to `endpoint` over OTLP.
    pub fn with_endpoint(mut self, endpoint: TelemetryEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Push through `exporter` instead of OTLP.
    pub fn with_exporter<E>(mut self, exporter: E) -> Self
    where
        E: opentelemetry_sdk::metrics::exporter::PushMetricExporter,
    {
        self.hook = super::ExporterOverrides::new().metrics(exporter).metrics;
        self
    }

    pub(crate) fn with_export_hook(mut self, hook: Option<MetricExportHook>) -> Self {
        if hook.is_some() {
            self.hook = hook;
        }
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Result<MetricsPipeline, TelemetryError> {
        let mut scrape = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("_seconds".to_string()), &SECONDS_BUCKETS)?;
        for (label, value) in self.identity.metric_labels() {
            scrape = scrape.add_global_label(label, value);
        }
        let recorder = scrape.build_recorder();
        let handle = recorder.handle();

        let mut provider = SdkMeterProvider::builder().with_resource(self.identity.resource());
        provider = match (self.hook, &self.endpoint) {
            (Some(hook), _) => hook(provider, self.interval),
            (None, Some(endpoint)) => {
                let exporter = endpoint.metric_exporter()?;
                let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
                    .with_interval(self.interval)
                    .build();
                provider.with_reader(reader)
            }
            (None, None) => provider,
        };

        let pipeline = MetricsPipeline {
            identity: self.identity,
            recorder: Arc::new(recorder),
            handle,
            provider: provider.build(),
            sources: DashMap::new(),
        };
        for name in [
            sources::HTTP_SERVER,
            sources::HTTP_CLIENT,
            sources::PROCESS,
            sources::RUNTIME,
        ] {
            pipeline.source(name);
        }
        let own = pipeline.identity.name().to_string();
        pipeline.source(&own);

        tracing::debug!(
            interval_secs = self.interval.as_secs(),
            pushing = self.endpoint.is_some(),
            "Metrics pipeline ready"
        );
        Ok(pipeline)
    }
}

/// Scrape registry plus OTLP meter provider, with named sources.
pub struct MetricsPipeline {
    identity: ServiceIdentity,
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    provider: SdkMeterProvider,
    sources: DashMap<String, SourceMeter>,
}

impl MetricsPipeline {
    pub fn builder(identity: &ServiceIdentity) -> MetricsPipelineBuilder {
        MetricsPipelineBuilder {
            identity: identity.clone(),
            endpoint: None,
            hook: None,
            interval: DEFAULT_EXPORT_INTERVAL,
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Meter for a named source, registering it on first use.
    pub fn source(&self, name: &str) -> SourceMeter {
        if let Some(existing) = self.sources.get(name) {
            return existing.clone();
        }
        self.sources
            .entry(name.to_string())
            .or_insert_with(|| {
                let scope = self.identity.scope_named(Cow::Owned(name.to_string()));
                SourceMeter {
                    name: Arc::from(name),
                    recorder: self.recorder.clone(),
                    meter: self.provider.meter_with_scope(scope),
                    counters: Arc::new(DashMap::new()),
                    gauges: Arc::new(DashMap::new()),
                    histograms: Arc::new(DashMap::new()),
                }
            })
            .clone()
    }

    /// Meter for the service's own instruments.
    pub fn app_source(&self) -> SourceMeter {
        self.source(self.identity.name())
    }

    /// Names of every registered source, sorted.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Prometheus text exposition of the scrape registry.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }

    /// Drain histogram buffers in the scrape registry.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    /// Collect and push now.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        self.provider
            .force_flush()
            .map_err(|source| TelemetryError::ExportTransport {
                signal: "metrics",
                action: "flush",
                source,
            })
    }

    /// Final push, then stop the periodic reader.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|source| TelemetryError::ExportTransport {
                signal: "metrics",
                action: "shutdown",
                source,
            })
    }
}

impl std::fmt::Debug for MetricsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsPipeline")
            .field("service", &self.identity.name())
            .field("sources", &self.source_names())
            .finish()
    }
}

/// One instrumentation source: a named OTLP meter plus the shared scrape registry.
///
/// Handles are created on demand and cached per name and label set.
#[derive(Clone)]
pub struct SourceMeter {
    name: Arc<str>,
    recorder: Arc<PrometheusRecorder>,
    meter: Meter,
    counters: Arc<DashMap<Key, Arc<BridgedCounter>>>,
    gauges: Arc<DashMap<Key, Arc<BridgedGauge>>>,
    histograms: Arc<DashMap<Key, Arc<BridgedHistogram>>>,
}

impl SourceMeter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe_counter(&self, name: &'static str, description: &'static str) {
        self.recorder
            .describe_counter(name.into(), None, SharedString::from(description));
    }

    pub fn describe_gauge(&self, name: &'static str, unit: Option<Unit>, description: &'static str) {
        self.recorder
            .describe_gauge(name.into(), unit, SharedString::from(description));
    }

    pub fn describe_histogram(&self, name: &'static str, description: &'static str) {
        self.recorder.describe_histogram(
            name.into(),
            Some(Unit::Seconds),
            SharedString::from(description),
        );
    }

    /// Counter for one series. Every handle for the same name and labels
    /// shares one running total.
    pub fn counter(&self, name: &'static str, labels: &[(&'static str, String)]) -> metrics::Counter {
        let (key, attributes) = self.key(name, labels);
        let bridged = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(BridgedCounter {
                    scrape: self.recorder.register_counter(&key, &self.metadata()),
                    push: self.meter.u64_counter(name).build(),
                    attributes,
                    total: AtomicU64::new(0),
                })
            })
            .clone();
        metrics::Counter::from_arc(bridged)
    }

    /// Gauge for one series. Every handle for the same name and labels
    /// shares one current value.
    pub fn gauge(&self, name: &'static str, labels: &[(&'static str, String)]) -> metrics::Gauge {
        let (key, attributes) = self.key(name, labels);
        let bridged = self
            .gauges
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(BridgedGauge {
                    scrape: self.recorder.register_gauge(&key, &self.metadata()),
                    push: self.meter.f64_gauge(name).build(),
                    attributes,
                    bits: AtomicU64::new(0f64.to_bits()),
                })
            })
            .clone();
        metrics::Gauge::from_arc(bridged)
    }

    pub fn histogram(&self, name: &'static str, labels: &[(&'static str, String)]) -> metrics::Histogram {
        let (key, attributes) = self.key(name, labels);
        let bridged = self
            .histograms
            .entry(key.clone())
            .or_insert_with(|| {
                let builder = self.meter.f64_histogram(name);
                let push = if name.ends_with("_seconds") {
                    builder.with_unit("s").with_boundaries(SECONDS_BUCKETS.to_vec()).build()
                } else {
                    builder.build()
                };
                Arc::new(BridgedHistogram {
                    scrape: self.recorder.register_histogram(&key, &self.metadata()),
                    push,
                    attributes,
                })
            })
            .clone();
        metrics::Histogram::from_arc(bridged)
    }

    fn key(&self, name: &'static str, labels: &[(&'static str, String)]) -> (Key, Vec<KeyValue>) {
        let (scrape, push): (Vec<Label>, Vec<KeyValue>) = labels
            .iter()
            .map(|(k, v)| (Label::new(*k, v.clone()), KeyValue::new(*k, v.clone())))
            .unzip();
        (Key::from_parts(name, scrape), push)
    }

    fn metadata(&self) -> Metadata<'static> {
        Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
    }
}

impl std::fmt::Debug for SourceMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMeter").field("name", &self.name).finish()
    }
}
