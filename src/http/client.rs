//! Outbound HTTP client.
//!
//! Wraps `reqwest` so every call gets a client span, a `traceparent`
//! header, and request count and duration series.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_http::HeaderInjector;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracer;

use crate::observability::metrics::{names, sources};
use crate::observability::tracing::sources as trace_sources;
use crate::observability::{MetricsPipeline, SourceMeter, TracingPipeline};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Traced and metered `reqwest` client. Cheap to clone.
#[derive(Clone)]
pub struct InstrumentedHttpClient {
    inner: reqwest::Client,
    tracer: SdkTracer,
    meter: SourceMeter,
    propagator: Arc<TraceContextPropagator>,
}

impl InstrumentedHttpClient {
    pub fn new(tracing: &TracingPipeline, metrics: &MetricsPipeline) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(inner, tracing, metrics))
    }

    pub fn with_client(inner: reqwest::Client, tracing: &TracingPipeline, metrics: &MetricsPipeline) -> Self {
        let meter = metrics.source(sources::HTTP_CLIENT);
        meter.describe_counter(names::HTTP_CLIENT_REQUESTS, "Outbound requests completed");
        meter.describe_histogram(names::HTTP_CLIENT_DURATION, "Outbound request duration");
        Self {
            inner,
            tracer: tracing.scoped_tracer(trace_sources::HTTP_CLIENT),
            meter,
            propagator: Arc::new(tracing.propagator()),
        }
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Send `request` inside a client span parented on `parent`.
    pub async fn execute(
        &self,
        mut request: reqwest::Request,
        parent: &Context,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let start = Instant::now();
        let method = request.method().as_str().to_string();
        let host = request.url().host_str().unwrap_or_default().to_string();

        let span = self
            .tracer
            .span_builder(method.clone())
            .with_kind(SpanKind::Client)
            .with_attributes([
                KeyValue::new("http.request.method", method.clone()),
                KeyValue::new("server.address", host.clone()),
                KeyValue::new("url.full", request.url().to_string()),
            ])
            .start_with_context(&self.tracer, parent);
        let cx = parent.with_span(span);
        self.propagator
            .inject_context(&cx, &mut HeaderInjector(request.headers_mut()));

        let result = self.inner.execute(request).await;

        let span = cx.span();
        let status = match &result {
            Ok(response) => {
                let code = response.status();
                span.set_attribute(KeyValue::new("http.response.status_code", i64::from(code.as_u16())));
                if code.is_server_error() {
                    span.set_status(Status::error(code.to_string()));
                }
                code.as_u16().to_string()
            }
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "Outbound request failed");
                span.set_status(Status::error(e.to_string()));
                "error".to_string()
            }
        };
        span.end();

        let labels = [
            ("http_method", method),
            ("server_address", host),
            ("http_status", status),
        ];
        self.meter.counter(names::HTTP_CLIENT_REQUESTS, &labels).increment(1);
        self.meter
            .histogram(names::HTTP_CLIENT_DURATION, &labels)
            .record(start.elapsed().as_secs_f64());

        result
    }

    pub async fn get(&self, url: &str, parent: &Context) -> Result<reqwest::Response, reqwest::Error> {
        let request = self.inner.get(url).build()?;
        self.execute(request, parent).await
    }
}

impl std::fmt::Debug for InstrumentedHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedHttpClient").finish_non_exhaustive()
    }
}
