//! Tracing pipeline.
//!
//! # Responsibilities
//! - Build the tracer provider: identity resource, parent-based ratio sampler,
//!   batched OTLP span export
//! - Expose the service's named trace source and the framework sources used
//!   by the HTTP server, HTTP client and cache instrumentation
//!
//! # Design Decisions
//! - Sampling happens once at the root; children follow the parent decision
//! - W3C trace context is the only propagation format

use std::borrow::Cow;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, SpanExporter};

use super::{SamplingPolicy, ServiceIdentity, SpanExportHook, TelemetryEndpoint, TelemetryError};
use crate::cache::{CacheConnectionHandle, CacheInstrumentation};

/// Trace sources registered by the framework instrumentation.
pub mod sources {
    pub const HTTP_SERVER: &str = "otel_demo.http.server";
    pub const HTTP_CLIENT: &str = "otel_demo.http.client";
    pub const CACHE: &str = "otel_demo.cache.redis";
}

/// Builder for [`TracingPipeline`].
pub struct TracingPipelineBuilder {
    identity: ServiceIdentity,
    policy: SamplingPolicy,
    endpoint: Option<TelemetryEndpoint>,
    hook: Option<SpanExportHook>,
}

impl TracingPipelineBuilder {
    /// Export to `endpoint` over OTLP.
    pub fn with_endpoint(mut self, endpoint: TelemetryEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Export through `exporter` instead of OTLP.
    pub fn with_exporter<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.hook = super::ExporterOverrides::new().spans(exporter).spans;
        self
    }

    pub(crate) fn with_export_hook(mut self, hook: Option<SpanExportHook>) -> Self {
        if hook.is_some() {
            self.hook = hook;
        }
        self
    }

    pub fn build(self) -> Result<TracingPipeline, TelemetryError> {
        let mut builder = SdkTracerProvider::builder()
            .with_sampler(self.policy.sampler())
            .with_resource(self.identity.resource());
        builder = match (self.hook, &self.endpoint) {
            (Some(hook), _) => hook(builder),
            (None, Some(endpoint)) => builder.with_batch_exporter(endpoint.span_exporter()?),
            (None, None) => builder,
        };
        let provider = builder.build();
        let tracer = provider.tracer_with_scope(self.identity.scope());

        tracing::debug!(
            ratio = self.policy.ratio(),
            exporting = self.endpoint.is_some(),
            "Tracing pipeline ready"
        );
        Ok(TracingPipeline {
            identity: self.identity,
            policy: self.policy,
            provider,
            tracer,
        })
    }
}

/// Tracer provider plus the service's named trace source.
pub struct TracingPipeline {
    identity: ServiceIdentity,
    policy: SamplingPolicy,
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl TracingPipeline {
    pub fn builder(identity: &ServiceIdentity, policy: SamplingPolicy) -> TracingPipelineBuilder {
        TracingPipelineBuilder {
            identity: identity.clone(),
            policy,
            endpoint: None,
            hook: None,
        }
    }

    /// Trace source named after the service, for application spans.
    pub fn tracer(&self) -> SdkTracer {
        self.tracer.clone()
    }

    /// Trace source for a framework instrumentation scope.
    pub fn scoped_tracer(&self, scope: &'static str) -> SdkTracer {
        self.provider
            .tracer_with_scope(self.identity.scope_named(Cow::Borrowed(scope)))
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    pub fn propagator(&self) -> TraceContextPropagator {
        TraceContextPropagator::new()
    }

    /// Instrumentation for commands sent over `cache`.
    pub fn cache_instrumentation(
        &self,
        cache: &CacheConnectionHandle,
        verbose_statements: bool,
    ) -> CacheInstrumentation {
        CacheInstrumentation::new(
            self.scoped_tracer(sources::CACHE),
            cache.address(),
            verbose_statements,
        )
    }

    /// Export every finished span now.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        self.provider
            .force_flush()
            .map_err(|source| TelemetryError::ExportTransport {
                signal: "traces",
                action: "flush",
                source,
            })
    }

    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|source| TelemetryError::ExportTransport {
                signal: "traces",
                action: "shutdown",
                source,
            })
    }
}

impl std::fmt::Debug for TracingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingPipeline")
            .field("service", &self.identity.name())
            .field("ratio", &self.policy.ratio())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span as _, Tracer as _};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn pipeline(exporter: &InMemorySpanExporter, policy: SamplingPolicy) -> TracingPipeline {
        TracingPipeline::builder(&ServiceIdentity::new("OtelDemo", "1.0.1").unwrap(), policy)
            .with_exporter(exporter.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_app_spans_use_named_source() {
        let exporter = InMemorySpanExporter::default();
        let pipeline = pipeline(&exporter, SamplingPolicy::always());

        let mut span = pipeline.tracer().start("checkout");
        span.end();
        pipeline.force_flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "checkout");
        assert_eq!(spans[0].instrumentation_scope.name(), "OtelDemo");
    }

    #[test]
    fn test_scoped_tracer_uses_framework_scope() {
        let exporter = InMemorySpanExporter::default();
        let pipeline = pipeline(&exporter, SamplingPolicy::always());

        let mut span = pipeline.scoped_tracer(sources::HTTP_CLIENT).start("GET");
        span.end();
        pipeline.force_flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].instrumentation_scope.name(), sources::HTTP_CLIENT);
        assert_eq!(spans[0].instrumentation_scope.version(), Some("1.0.1"));
    }

    #[test]
    fn test_never_policy_exports_nothing() {
        let exporter = InMemorySpanExporter::default();
        let pipeline = pipeline(&exporter, SamplingPolicy::never());

        for _ in 0..10 {
            pipeline.tracer().start("dropped").end();
        }
        pipeline.force_flush().unwrap();
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }
}
