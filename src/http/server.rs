//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the service's handlers
//! - Wire up middleware (request instrumentation, timeout, tracing)
//! - Expose the scrape endpoint and, in development, the API reference
//! - Serve on a bound listener until the shutdown future resolves

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use opentelemetry::trace::{Span as _, TraceContextExt as _, Tracer};
use opentelemetry::Context;
use opentelemetry_sdk::trace::SdkTracer;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::cache::InstrumentedCache;
use crate::config::Environment;
use crate::http::client::InstrumentedHttpClient;
use crate::http::docs;
use crate::http::instrumentation::{track_http_request, HttpServerInstrumentation};
use crate::observability::{MetricsPipeline, ServiceIdentity};
use crate::security::SigningKey;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<ServiceIdentity>,
    pub environment: Environment,
    pub cache: InstrumentedCache,
    pub signing_key: SigningKey,
    pub http_client: InstrumentedHttpClient,
    pub metrics: Arc<MetricsPipeline>,
    pub metrics_path: String,
    pub tracer: SdkTracer,
}

/// HTTP server for the service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, instrumentation: HttpServerInstrumentation) -> Self {
        let router = Self::build_router(state, instrumentation);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, instrumentation: HttpServerInstrumentation) -> Router {
        let mut router = Router::new()
            .route("/health", get(health))
            .route("/health/dependencies", get(dependencies))
            .route(&state.metrics_path, get(scrape));

        if state.environment.is_development() {
            tracing::debug!(
                openapi = docs::OPENAPI_PATH,
                reference = docs::REFERENCE_PATH,
                "API reference enabled"
            );
            router = router
                .route(docs::OPENAPI_PATH, get(docs::openapi))
                .route(docs::REFERENCE_PATH, get(docs::reference));
        }

        router
            .route_layer(middleware::from_fn_with_state(instrumentation, track_http_request))
            .with_state(state)
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    /// Router with every layer applied, for driving without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server on `listener` until `shutdown` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct DependencyStatus {
    pub cache: &'static str,
}

async fn health(State(state): State<AppState>, Extension(cx): Extension<Context>) -> Json<HealthStatus> {
    let mut span = state.tracer.start_with_context("health.check", &cx);
    span.end();

    Json(HealthStatus {
        status: "ok",
        service: state.identity.name().to_string(),
        version: state.identity.version().to_string(),
    })
}

async fn dependencies(
    State(state): State<AppState>,
    Extension(cx): Extension<Context>,
) -> (StatusCode, Json<DependencyStatus>) {
    match state.cache.ping(&cx).await {
        Ok(_) => (StatusCode::OK, Json(DependencyStatus { cache: "ok" })),
        Err(e) => {
            tracing::warn!(error = %e, trace_id = %cx.span().span_context().trace_id(), "Cache ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(DependencyStatus { cache: "unavailable" }))
        }
    }
}

async fn scrape(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
