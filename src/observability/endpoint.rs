//! Telemetry export endpoint.
//!
//! # Responsibilities
//! - Hold the collector address and transport chosen at startup
//! - Build the OTLP exporter for each signal against that address
//!
//! # Design Decisions
//! - gRPC (binary) is the default transport; HTTP/JSON is the text alternative
//! - HTTP exporters get the per-signal path appended; gRPC uses the URL as is
//! - Building an exporter does not connect; reachability is a runtime concern

use std::fmt;
use std::time::Duration;

use opentelemetry_otlp::{Protocol, WithExportConfig};
use url::Url;

use crate::observability::TelemetryError;

/// Transport used to push telemetry to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportProtocol {
    /// OTLP over gRPC, protobuf encoded.
    Grpc,
    /// OTLP over HTTP, JSON encoded.
    HttpJson,
}

impl ExportProtocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "grpc" => Some(ExportProtocol::Grpc),
            "http/json" | "http-json" | "json" => Some(ExportProtocol::HttpJson),
            _ => None,
        }
    }
}

impl fmt::Display for ExportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportProtocol::Grpc => f.write_str("grpc"),
            ExportProtocol::HttpJson => f.write_str("http/json"),
        }
    }
}

/// Collector address plus transport, shared by the log, metric and trace exporters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEndpoint {
    url: Url,
    protocol: ExportProtocol,
    timeout: Duration,
}

impl TelemetryEndpoint {
    pub fn new(url: Url, protocol: ExportProtocol) -> Self {
        Self {
            url,
            protocol,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> ExportProtocol {
        self.protocol
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full URL for an HTTP signal path such as `v1/traces`.
    pub fn signal_url(&self, path: &str) -> String {
        format!("{}/{}", self.url.as_str().trim_end_matches('/'), path)
    }

    pub fn span_exporter(&self) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
        let built = match self.protocol {
            ExportProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(self.url.as_str())
                .with_timeout(self.timeout)
                .build(),
            ExportProtocol::HttpJson => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpJson)
                .with_endpoint(self.signal_url("v1/traces"))
                .with_timeout(self.timeout)
                .build(),
        };
        built.map_err(|source| self.build_error("traces", source))
    }

    pub fn metric_exporter(&self) -> Result<opentelemetry_otlp::MetricExporter, TelemetryError> {
        let built = match self.protocol {
            ExportProtocol::Grpc => opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(self.url.as_str())
                .with_timeout(self.timeout)
                .build(),
            ExportProtocol::HttpJson => opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpJson)
                .with_endpoint(self.signal_url("v1/metrics"))
                .with_timeout(self.timeout)
                .build(),
        };
        built.map_err(|source| self.build_error("metrics", source))
    }

    pub fn log_exporter(&self) -> Result<opentelemetry_otlp::LogExporter, TelemetryError> {
        let built = match self.protocol {
            ExportProtocol::Grpc => opentelemetry_otlp::LogExporter::builder()
                .with_tonic()
                .with_endpoint(self.url.as_str())
                .with_timeout(self.timeout)
                .build(),
            ExportProtocol::HttpJson => opentelemetry_otlp::LogExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpJson)
                .with_endpoint(self.signal_url("v1/logs"))
                .with_timeout(self.timeout)
                .build(),
        };
        built.map_err(|source| self.build_error("logs", source))
    }

    fn build_error(&self, signal: &'static str, source: opentelemetry_otlp::ExporterBuildError) -> TelemetryError {
        TelemetryError::Exporter {
            signal,
            endpoint: self.url.to_string(),
            source,
        }
    }
}

impl fmt::Display for TelemetryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.protocol)
    }
}
