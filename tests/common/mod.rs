//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{LogBatch, LogExporter, SdkLogRecord};
use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::trace::InMemorySpanExporter;
use otel_demo::config::ConfigSources;
use otel_demo::observability::{ExporterOverrides, LoggingSink, ServiceIdentity};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const SIGNING_KEY: &str = "0123456789abcdef0123456789abcdef";

pub fn identity() -> ServiceIdentity {
    ServiceIdentity::new("OtelDemo", "1.0.1").unwrap()
}

/// Log exporter that keeps every record it receives, shutdown included.
#[derive(Clone, Debug, Default)]
pub struct RetainedLogs {
    records: Arc<Mutex<Vec<SdkLogRecord>>>,
}

impl RetainedLogs {
    pub fn records(&self) -> Vec<SdkLogRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl LogExporter for RetainedLogs {
    fn export(
        &self,
        batch: LogBatch<'_>,
    ) -> impl std::future::Future<Output = OTelSdkResult> + Send {
        self.records
            .lock()
            .unwrap()
            .extend(batch.iter().map(|(record, _)| record.clone()));
        std::future::ready(Ok(()))
    }
}

/// Sink exporting to memory.
pub fn memory_sink() -> (LoggingSink, RetainedLogs) {
    let exporter = RetainedLogs::default();
    let sink = LoggingSink::builder(identity())
        .with_exporter(exporter.clone())
        .without_console()
        .build();
    (sink, exporter)
}

/// Span and metric exporters that never leave the process.
pub fn memory_exporters() -> (ExporterOverrides, InMemorySpanExporter, InMemoryMetricExporter) {
    let spans = InMemorySpanExporter::default();
    let metrics = InMemoryMetricExporter::default();
    let overrides = ExporterOverrides::new()
        .spans(spans.clone())
        .metrics(metrics.clone());
    (overrides, spans, metrics)
}

/// Defaults plus `pairs`, without the process environment.
pub fn sources(pairs: &[(&str, &str)]) -> ConfigSources {
    ConfigSources::new()
        .with_defaults()
        .with_layer("test", pairs.iter().copied())
}

/// Severity text and body of every exported log entry.
pub fn exported_entries(exporter: &RetainedLogs) -> Vec<(String, String)> {
    exporter
        .records()
        .iter()
        .map(|record| {
            let severity = record.severity_text().unwrap_or_default().to_string();
            let body = match record.body() {
                Some(opentelemetry::logs::AnyValue::String(s)) => s.as_str().to_string(),
                other => format!("{:?}", other),
            };
            (severity, body)
        })
        .collect()
}

/// Minimal RESP server: PONG for PING, nil for GET, OK for anything else.
/// Records every command it receives.
pub async fn start_mock_redis() -> (SocketAddr, Arc<Mutex<Vec<Vec<String>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let recorded = commands.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 4096];
                        loop {
                            let n = match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => n,
                            };
                            buf.extend_from_slice(&chunk[..n]);
                            while let Some((args, consumed)) = parse_command(&buf) {
                                buf.drain(..consumed);
                                let reply = reply_for(&args);
                                recorded.lock().unwrap().push(args);
                                if socket.write_all(reply.as_bytes()).await.is_err() {
                                    return;
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, commands)
}

fn reply_for(args: &[String]) -> &'static str {
    match args.first().map(|a| a.to_ascii_uppercase()).as_deref() {
        Some("PING") => "+PONG\r\n",
        Some("GET") => "$-1\r\n",
        Some("HELLO") => "-ERR unknown command 'HELLO'\r\n",
        _ => "+OK\r\n",
    }
}

fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let mut pos = 0;
    let header = read_line(buf, &mut pos)?;
    let Some(count) = header.strip_prefix('*') else {
        return Some((header.split_whitespace().map(str::to_string).collect(), pos));
    };
    let count: usize = count.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_line(buf, &mut pos)?.strip_prefix('$')?.parse().ok()?;
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[pos..pos + len]).into_owned());
        pos += len + 2;
    }
    Some((args, pos))
}

fn read_line(buf: &[u8], pos: &mut usize) -> Option<String> {
    let rest = buf.get(*pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8_lossy(&rest[..end]).into_owned();
    *pos += end + 2;
    Some(line)
}

/// HTTP backend answering 200 "ok" and keeping each request head.
pub async fn start_capturing_backend() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));
    let recorded = heads.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 4096];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }
                        recorded
                            .lock()
                            .unwrap()
                            .push(String::from_utf8_lossy(&buf).to_ascii_lowercase());
                        let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, heads)
}
