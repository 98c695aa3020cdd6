//! Structured logging.
//!
//! # Responsibilities
//! - Write every entry synchronously to the console
//! - Batch every entry to the collector over OTLP
//! - Bridge `tracing` events from the rest of the crate into the same pipeline
//! - Drain and close the exporter exactly once, on every exit path
//!
//! # Design Decisions
//! - Minimum severity is debug
//! - The sink never fails to construct: an unusable endpoint degrades it to
//!   console only, because it is the channel every later failure is reported on
//! - Fatal entries are emitted straight to the OTLP logger so they keep the
//!   FATAL severity that `tracing` levels cannot express
//! - Transport crates are filtered out of the export bridge so exporter
//!   diagnostics never feed back into the exporter

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _, Severity as OtelSeverity};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::{LogExporter, LoggerProviderBuilder, SdkLogger, SdkLoggerProvider};
use tracing::Dispatch;
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as fmt_layer, Layer};

use crate::observability::{ServiceIdentity, TelemetryEndpoint, TelemetryError};

const LOGGER_NAME: &str = "otel_demo";

/// Targets never forwarded to the OTLP bridge.
const TRANSPORT_TARGETS: [&str; 7] = ["opentelemetry", "tonic", "h2", "hyper", "tower", "reqwest", "redis"];

/// Entry severity, debug and above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    fn otel(self) -> (OtelSeverity, &'static str) {
        match self {
            Severity::Debug => (OtelSeverity::Debug, "DEBUG"),
            Severity::Info => (OtelSeverity::Info, "INFO"),
            Severity::Warn => (OtelSeverity::Warn, "WARN"),
            Severity::Error => (OtelSeverity::Error, "ERROR"),
            Severity::Fatal => (OtelSeverity::Fatal, "FATAL"),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.otel().1)
    }
}

type ExporterHook = Box<dyn FnOnce(LoggerProviderBuilder) -> LoggerProviderBuilder + Send>;

/// Builder for [`LoggingSink`].
pub struct LoggingSinkBuilder {
    identity: ServiceIdentity,
    endpoint: Option<TelemetryEndpoint>,
    exporter: Option<ExporterHook>,
    console: bool,
}

impl LoggingSinkBuilder {
    /// Export to `endpoint` over OTLP.
    pub fn with_endpoint(mut self, endpoint: Option<TelemetryEndpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Export through `exporter` instead of OTLP.
    pub fn with_exporter<E: LogExporter + 'static>(mut self, exporter: E) -> Self {
        self.exporter = Some(Box::new(move |builder| builder.with_batch_exporter(exporter)));
        self
    }

    /// Disable console output.
    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    /// Construct the sink. Never fails.
    pub fn build(self) -> LoggingSink {
        let console_level = if self.console { LevelFilter::DEBUG } else { LevelFilter::OFF };
        let console = Dispatch::new(
            tracing_subscriber::registry().with(fmt_layer::layer().with_filter(console_level)),
        );

        let hook = match (self.exporter, &self.endpoint) {
            (Some(hook), _) => Some(hook),
            (None, Some(endpoint)) => match endpoint.log_exporter() {
                Ok(exporter) => Some(Box::new(move |builder: LoggerProviderBuilder| {
                    builder.with_batch_exporter(exporter)
                }) as ExporterHook),
                Err(e) => {
                    tracing::dispatcher::with_default(&console, || {
                        tracing::warn!(error = %e, "Log export disabled, writing to console only");
                    });
                    None
                }
            },
            (None, None) => None,
        };

        let provider = hook.map(|hook| {
            hook(SdkLoggerProvider::builder().with_resource(self.identity.resource())).build()
        });
        let logger = provider.as_ref().map(|p| p.logger(LOGGER_NAME));

        LoggingSink {
            inner: Arc::new(SinkInner {
                identity: self.identity,
                console,
                console_enabled: self.console,
                provider,
                logger,
                closed: AtomicBool::new(false),
                close_count: AtomicUsize::new(0),
            }),
        }
    }
}

struct SinkInner {
    identity: ServiceIdentity,
    console: Dispatch,
    console_enabled: bool,
    provider: Option<SdkLoggerProvider>,
    logger: Option<SdkLogger>,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

/// Console plus OTLP structured logger.
///
/// Cheap to clone; every clone shares the same exporter. Only the startup
/// orchestrator calls [`LoggingSink::flush_and_close`].
#[derive(Clone)]
pub struct LoggingSink {
    inner: Arc<SinkInner>,
}

impl LoggingSink {
    pub fn builder(identity: ServiceIdentity) -> LoggingSinkBuilder {
        LoggingSinkBuilder {
            identity,
            endpoint: None,
            exporter: None,
            console: true,
        }
    }

    /// Console-only sink.
    pub fn console_only(identity: ServiceIdentity) -> Self {
        Self::builder(identity).build()
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.inner.identity
    }

    /// Whether entries are being exported.
    pub fn is_exporting(&self) -> bool {
        self.inner.provider.is_some()
    }

    /// Install the process-wide `tracing` subscriber: env filter (default
    /// `debug`), console layer, and the bridge into this sink's exporter.
    pub fn install_global(&self) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let console = self.inner.console_enabled.then(fmt_layer::layer);
        let bridge = self.inner.provider.as_ref().map(|provider| {
            let targets = TRANSPORT_TARGETS
                .iter()
                .fold(Targets::new().with_default(LevelFilter::DEBUG), |targets, target| {
                    targets.with_target(*target, LevelFilter::OFF)
                });
            OpenTelemetryTracingBridge::new(provider).with_filter(targets)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(bridge)
            .try_init()?;
        Ok(())
    }

    /// Append a structured entry. Never blocks on the transport and never fails.
    pub fn log(&self, level: Severity, message: &str, exception: Option<&(dyn StdError + 'static)>) {
        let exception_text = exception.map(error_chain);

        if self.inner.console_enabled {
            let exception_field = exception_text.as_deref();
            tracing::dispatcher::with_default(&self.inner.console, || match level {
                Severity::Debug => tracing::debug!(exception = exception_field, "{}", message),
                Severity::Info => tracing::info!(exception = exception_field, "{}", message),
                Severity::Warn => tracing::warn!(exception = exception_field, "{}", message),
                Severity::Error => tracing::error!(exception = exception_field, "{}", message),
                Severity::Fatal => {
                    tracing::error!(severity = "FATAL", exception = exception_field, "{}", message)
                }
            });
        }

        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let Some(logger) = &self.inner.logger else {
            return;
        };

        let (severity, severity_text) = level.otel();
        let mut record = logger.create_log_record();
        let now = SystemTime::now();
        record.set_timestamp(now);
        record.set_observed_timestamp(now);
        record.set_severity_number(severity);
        record.set_severity_text(severity_text);
        record.set_target(LOGGER_NAME);
        record.set_body(AnyValue::from(message.to_string()));
        if let (Some(error), Some(text)) = (exception, exception_text) {
            record.add_attribute("exception.message", error.to_string());
            record.add_attribute("exception.stacktrace", text);
        }
        logger.emit(record);
    }

    pub fn info(&self, message: &str) {
        self.log(Severity::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.log(Severity::Warn, message, None);
    }

    /// Report an unrecoverable failure.
    pub fn fatal(&self, message: &str, error: &(dyn StdError + 'static)) {
        self.log(Severity::Fatal, message, Some(error));
    }

    /// Drain buffered entries and close the exporter.
    ///
    /// Idempotent: only the first call does any work, later calls return
    /// immediately. Transport errors are reported on the console, never raised.
    pub fn flush_and_close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.close_count.fetch_add(1, Ordering::AcqRel);

        let Some(provider) = &self.inner.provider else {
            return;
        };
        if let Err(e) = provider.force_flush() {
            self.console_warn("Failed to flush buffered log entries", &e);
        }
        if let Err(e) = provider.shutdown() {
            self.console_warn("Failed to close log exporter", &e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of times the close routine actually ran.
    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::Acquire)
    }

    fn console_warn(&self, message: &str, error: &dyn fmt::Display) {
        tracing::dispatcher::with_default(&self.inner.console, || {
            tracing::warn!(error = %error, "{}", message);
        });
    }
}

impl fmt::Debug for LoggingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingSink")
            .field("service", &self.inner.identity.name())
            .field("exporting", &self.is_exporting())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the sink when dropped, so unwinding still flushes.
pub struct FlushGuard {
    sink: LoggingSink,
}

impl FlushGuard {
    pub fn new(sink: LoggingSink) -> Self {
        Self { sink }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.sink.flush_and_close();
    }
}

/// Render an error and its sources, outermost first.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\n  caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::logs::{LogBatch, SdkLogRecord};
    use std::sync::{Arc, Mutex};

    /// Keeps every exported record, including those flushed during shutdown.
    #[derive(Clone, Debug, Default)]
    struct RetainedLogs(Arc<Mutex<Vec<SdkLogRecord>>>);

    impl RetainedLogs {
        fn records(&self) -> Vec<SdkLogRecord> {
            self.0.lock().unwrap().clone()
        }
    }

    impl LogExporter for RetainedLogs {
        fn export(
            &self,
            batch: LogBatch<'_>,
        ) -> impl std::future::Future<Output = OTelSdkResult> + Send {
            self.0
                .lock()
                .unwrap()
                .extend(batch.iter().map(|(record, _)| record.clone()));
            std::future::ready(Ok(()))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    fn sink_with(exporter: &RetainedLogs) -> LoggingSink {
        LoggingSink::builder(ServiceIdentity::new("sink-test", "0.0.1").unwrap())
            .with_exporter(exporter.clone())
            .without_console()
            .build()
    }

    #[test]
    fn test_error_chain_renders_sources() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let rendered = error_chain(&err);
        assert!(rendered.starts_with("outer failure"));
        assert!(rendered.contains("caused by: disk gone"));
    }

    #[test]
    fn test_fatal_entry_is_flushed_on_close() {
        let exporter = RetainedLogs::default();
        let sink = sink_with(&exporter);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        sink.fatal("Application start-up failed", &err);
        sink.flush_and_close();

        let logs = exporter.records();
        assert_eq!(logs.len(), 1);
        let record = &logs[0];
        assert_eq!(record.severity_number(), Some(OtelSeverity::Fatal));
        assert_eq!(record.severity_text(), Some("FATAL"));
        assert_eq!(
            record.body(),
            Some(&AnyValue::from("Application start-up failed".to_string()))
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let exporter = RetainedLogs::default();
        let sink = sink_with(&exporter);

        sink.info("before close");
        sink.flush_and_close();
        sink.flush_and_close();
        sink.info("after close");

        assert!(sink.is_closed());
        assert_eq!(sink.close_count(), 1);
        assert_eq!(exporter.records().len(), 1);
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let exporter = RetainedLogs::default();
        let sink = sink_with(&exporter);
        {
            let _guard = FlushGuard::new(sink.clone());
            sink.warn("inside scope");
        }
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn test_console_only_sink_tolerates_everything() {
        let sink = LoggingSink::console_only(ServiceIdentity::from_package());
        assert!(!sink.is_exporting());
        sink.log(Severity::Debug, "debug entry", None);
        sink.flush_and_close();
        sink.flush_and_close();
        assert_eq!(sink.close_count(), 1);
    }
}
