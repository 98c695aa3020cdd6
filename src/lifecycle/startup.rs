//! Startup orchestration.
//!
//! # Responsibilities
//! - Bring up logging before anything else can fail
//! - Load configuration, then construct dependencies in order:
//!   identity, cache, metrics, tracing, HTTP client, signing key
//! - Serve until shutdown, then tear the pipelines down
//! - Report any failure as one fatal entry, flush, and exit non-zero
//!
//! # Design Decisions
//! - Fail fast: every startup error is fatal, nothing is retried
//! - The logging sink is flushed exactly once on every path, including unwinding
//! - Exporters can be replaced so the whole sequence runs in-process

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::cache::{CacheConnectionHandle, InstrumentedCache};
use crate::config::schema::keys;
use crate::config::{layered_sources, load_config, load_telemetry, ConfigError, ConfigSources, ServiceConfig};
use crate::error::StartupError;
use crate::http::{AppState, HttpServer, HttpServerInstrumentation, InstrumentedHttpClient};
use crate::lifecycle::phase::{Lifecycle, Phase};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::collectors::BackgroundCollectors;
use crate::observability::{
    ExporterOverrides, FlushGuard, LoggingSink, MetricsPipeline, ServiceIdentity, TracingPipeline,
};
use crate::security::SigningKey;

/// Message of the fatal entry written when startup fails.
pub const STARTUP_FAILED: &str = "Application start-up failed";

/// A run that started, served and stopped cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Served {
    /// Address the server was bound to.
    pub address: SocketAddr,
}

/// Outcome of one orchestrated run.
#[derive(Debug)]
pub struct StartupReport {
    phases: Vec<Phase>,
    result: Result<Served, StartupError>,
}

impl StartupReport {
    /// Every phase visited, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn reached(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn error(&self) -> Option<&StartupError> {
        self.result.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    pub fn served(&self) -> Option<Served> {
        self.result.as_ref().ok().copied()
    }

    pub fn into_result(self) -> Result<Served, StartupError> {
        self.result
    }
}

/// Everything constructed from configuration before serving.
struct Dependencies {
    identity: Arc<ServiceIdentity>,
    cache: CacheConnectionHandle,
    metrics: Arc<MetricsPipeline>,
    traces: TracingPipeline,
    http_client: InstrumentedHttpClient,
    signing_key: SigningKey,
}

impl Dependencies {
    /// Final export of spans and metrics. Transport failures are logged only.
    fn shutdown(&self) {
        if let Err(e) = self.traces.shutdown() {
            tracing::warn!(error = %e, "Tracing pipeline did not shut down cleanly");
        }
        if let Err(e) = self.metrics.shutdown() {
            tracing::warn!(error = %e, "Metrics pipeline did not shut down cleanly");
        }
    }
}

/// Drives the process through its lifecycle.
pub struct Orchestrator {
    sink: LoggingSink,
    exporters: ExporterOverrides,
    ready: Option<oneshot::Sender<SocketAddr>>,
    lifecycle: Lifecycle,
}

impl Orchestrator {
    /// Start from an already constructed logging sink.
    pub fn new(sink: LoggingSink) -> Self {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(Phase::LoggingReady);
        Self {
            sink,
            exporters: ExporterOverrides::default(),
            ready: None,
            lifecycle,
        }
    }

    /// Replace the OTLP span and metric exporters.
    pub fn with_exporters(mut self, exporters: ExporterOverrides) -> Self {
        self.exporters = exporters;
        self
    }

    /// Send the bound address on `ready` once the server accepts connections.
    pub fn notify_ready(mut self, ready: oneshot::Sender<SocketAddr>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn sink(&self) -> &LoggingSink {
        &self.sink
    }

    /// Run to completion. Never panics on startup failure; the outcome is in
    /// the report and the sink has been flushed and closed on return.
    pub async fn run(mut self, sources: Result<ConfigSources, ConfigError>, shutdown: &Shutdown) -> StartupReport {
        let _guard = FlushGuard::new(self.sink.clone());

        let result = match sources {
            Ok(sources) => self.start(&sources, shutdown).await,
            Err(e) => Err(StartupError::from(e)),
        };

        if let Err(error) = &result {
            self.lifecycle.advance(Phase::Failed);
            self.sink.fatal(STARTUP_FAILED, error);
        }

        self.lifecycle.advance(Phase::FlushingTelemetry);
        self.sink.flush_and_close();
        self.lifecycle.advance(Phase::Terminated);

        StartupReport {
            phases: self.lifecycle.into_history(),
            result,
        }
    }

    async fn start(&mut self, sources: &ConfigSources, shutdown: &Shutdown) -> Result<Served, StartupError> {
        let config = load_config(sources)?;
        self.lifecycle.advance(Phase::ConfigLoaded);
        self.sink.info(&format!(
            "Configuration loaded for {} {} ({})",
            config.service.name, config.service.version, config.service.environment
        ));

        let deps = self.build_dependencies(&config).await?;
        self.lifecycle.advance(Phase::DependenciesBuilt);

        let served = self.serve(&config, &deps, shutdown).await;
        deps.shutdown();
        let address = served?;

        self.lifecycle.advance(Phase::Stopped);
        self.sink.info("Application stopped");
        Ok(Served { address })
    }

    async fn build_dependencies(&mut self, config: &ServiceConfig) -> Result<Dependencies, StartupError> {
        let identity = ServiceIdentity::new(&config.service.name, &config.service.version)
            .map_err(|e| StartupError::dependency("service identity", e))?;

        let cache = CacheConnectionHandle::connect(&config.redis).await?;

        let metrics = MetricsPipeline::builder(&identity)
            .with_endpoint(config.telemetry.endpoint.clone())
            .with_export_hook(self.exporters.metrics.take())
            .with_interval(config.telemetry.metrics_export_interval)
            .build()
            .map_err(|e| StartupError::dependency("metrics pipeline", e))?;

        let traces = TracingPipeline::builder(&identity, config.telemetry.sampling)
            .with_endpoint(config.telemetry.endpoint.clone())
            .with_export_hook(self.exporters.spans.take())
            .build()
            .map_err(|e| StartupError::dependency("tracing pipeline", e))?;

        let http_client = InstrumentedHttpClient::new(&traces, &metrics)
            .map_err(|e| StartupError::dependency("http client", e))?;

        let signing_key = SigningKey::from_config(&config.auth)
            .map_err(|e| StartupError::dependency("signing key", e))?;

        tracing::debug!(
            service = identity.name(),
            cache = cache.address(),
            sampling_ratio = traces.policy().ratio(),
            "Dependencies constructed"
        );
        Ok(Dependencies {
            identity: Arc::new(identity),
            cache,
            metrics: Arc::new(metrics),
            traces,
            http_client,
            signing_key,
        })
    }

    async fn serve(
        &mut self,
        config: &ServiceConfig,
        deps: &Dependencies,
        shutdown: &Shutdown,
    ) -> Result<SocketAddr, StartupError> {
        let listener = TcpListener::bind(&config.listener.bind_address)
            .await
            .map_err(StartupError::runtime)?;
        let addr = listener.local_addr().map_err(StartupError::runtime)?;

        let cache_instrumentation = deps
            .traces
            .cache_instrumentation(&deps.cache, config.redis.verbose_statements);
        let state = AppState {
            identity: deps.identity.clone(),
            environment: config.service.environment,
            cache: InstrumentedCache::new(&deps.cache, cache_instrumentation),
            signing_key: deps.signing_key.clone(),
            http_client: deps.http_client.clone(),
            metrics: deps.metrics.clone(),
            metrics_path: config.telemetry.metrics_path.clone(),
            tracer: deps.traces.tracer(),
        };
        let server = HttpServer::new(state, HttpServerInstrumentation::new(&deps.traces, &deps.metrics));

        let collectors = BackgroundCollectors::new(deps.metrics.clone(), Handle::current());
        let collector_task = tokio::spawn(collectors.run(shutdown.subscribe()));
        let mut stop = shutdown.subscribe();

        self.lifecycle.advance(Phase::Running);
        self.sink.info(&format!("Application started, listening on {addr}"));
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(addr);
        }

        let served = server.run(listener, async move { stop.recv().await }).await;

        tracing::debug!(subscribers = shutdown.receiver_count(), "Signalling shutdown");
        shutdown.trigger();
        if let Err(e) = collector_task.await {
            tracing::warn!(error = %e, "Collector task ended abnormally");
        }
        served.map(|_| addr).map_err(StartupError::runtime)
    }
}

/// Logging sink for a process about to load `sources`.
///
/// Never fails: an unusable name or endpoint falls back to the package
/// identity and console-only output.
pub fn bootstrap_sink(sources: &ConfigSources) -> LoggingSink {
    let identity = sources
        .get(keys::SERVICE_NAME)
        .and_then(|name| {
            let version = sources
                .get(keys::SERVICE_VERSION)
                .unwrap_or(env!("CARGO_PKG_VERSION"));
            ServiceIdentity::new(name, version).ok()
        })
        .unwrap_or_else(ServiceIdentity::from_package);
    let endpoint = load_telemetry(sources).ok().map(|telemetry| telemetry.endpoint);
    LoggingSink::builder(identity).with_endpoint(endpoint).build()
}

/// Process entry point: logging, signals, orchestration, exit code.
pub async fn launch(config_file: Option<PathBuf>, overrides: Vec<String>) -> ExitCode {
    let sources = layered_sources(config_file.as_deref(), &overrides);
    let sink = match &sources {
        Ok(sources) => bootstrap_sink(sources),
        Err(_) => bootstrap_sink(&ConfigSources::new().with_defaults().with_environment()),
    };
    if let Err(e) = sink.install_global() {
        sink.warn(&format!("Process-wide subscriber not installed: {e}"));
    }

    let shutdown = Shutdown::new();
    let signal_task = signals::forward_signals(shutdown.clone());

    let report = Orchestrator::new(sink).run(sources, &shutdown).await;
    signal_task.abort();
    report.exit_code()
}
