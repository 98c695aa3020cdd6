//! Inbound request instrumentation.
//!
//! # Responsibilities
//! - Continue the caller's W3C trace context, or start a new root
//! - One server span per request, named `METHOD route`
//! - Request count, duration and in-flight gauges per route
//! - Expose the request's trace context to handlers as an extension
//!
//! # Design Decisions
//! - Mounted as a route layer so the matched route template is known;
//!   unmatched requests are not traced
//! - 5xx marks the span failed; 4xx does not

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use opentelemetry_http::HeaderExtractor;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracer;

use crate::observability::metrics::{names, sources};
use crate::observability::tracing::sources as trace_sources;
use crate::observability::{MetricsPipeline, SourceMeter, TracingPipeline};

/// State for [`track_http_request`].
#[derive(Clone)]
pub struct HttpServerInstrumentation {
    tracer: SdkTracer,
    meter: SourceMeter,
    propagator: Arc<TraceContextPropagator>,
}

impl HttpServerInstrumentation {
    pub fn new(tracing: &TracingPipeline, metrics: &MetricsPipeline) -> Self {
        let meter = metrics.source(sources::HTTP_SERVER);
        meter.describe_counter(names::HTTP_SERVER_REQUESTS, "Inbound requests completed");
        meter.describe_histogram(names::HTTP_SERVER_DURATION, "Inbound request duration");
        meter.describe_gauge(names::HTTP_SERVER_ACTIVE, None, "Inbound requests in flight");
        Self {
            tracer: tracing.scoped_tracer(trace_sources::HTTP_SERVER),
            meter,
            propagator: Arc::new(tracing.propagator()),
        }
    }
}

/// Holds one unit of the in-flight gauge; released on drop, so a request
/// cancelled by a timeout or a disconnect is still counted out.
struct InFlight(metrics::Gauge);

impl InFlight {
    fn enter(gauge: metrics::Gauge) -> Self {
        gauge.increment(1.0);
        Self(gauge)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

pub async fn track_http_request(
    State(instrumentation): State<HttpServerInstrumentation>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().as_str().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let parent = instrumentation
        .propagator
        .extract(&HeaderExtractor(request.headers()));
    let span = instrumentation
        .tracer
        .span_builder(format!("{method} {route}"))
        .with_kind(SpanKind::Server)
        .with_attributes([
            KeyValue::new("http.request.method", method.clone()),
            KeyValue::new("http.route", route.clone()),
            KeyValue::new("url.path", request.uri().path().to_string()),
        ])
        .start_with_context(&instrumentation.tracer, &parent);
    let cx = parent.with_span(span);
    request.extensions_mut().insert(cx.clone());

    let route_labels = [("http_method", method.clone()), ("http_route", route.clone())];
    let active = instrumentation.meter.gauge(names::HTTP_SERVER_ACTIVE, &route_labels);
    let in_flight = InFlight::enter(active);
    let response = next.run(request).await;
    drop(in_flight);

    let status = response.status();
    let span = cx.span();
    span.set_attribute(KeyValue::new("http.response.status_code", i64::from(status.as_u16())));
    if status.is_server_error() {
        span.set_status(Status::error(status.to_string()));
    }
    span.end();

    let labels = [
        ("http_method", method),
        ("http_route", route),
        ("http_status", status.as_u16().to_string()),
    ];
    instrumentation
        .meter
        .counter(names::HTTP_SERVER_REQUESTS, &labels)
        .increment(1);
    instrumentation
        .meter
        .histogram(names::HTTP_SERVER_DURATION, &labels)
        .record(start.elapsed().as_secs_f64());

    tracing::debug!(
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}
