//! Cache connection and command tracing against an in-process RESP server.

mod common;

use std::time::Duration;

use opentelemetry::trace::SpanKind;
use opentelemetry::Context;
use opentelemetry_sdk::trace::InMemorySpanExporter;
use otel_demo::cache::{CacheConnectionHandle, CacheError, InstrumentedCache};
use otel_demo::config::RedisConfig;
use otel_demo::observability::{SamplingPolicy, TracingPipeline};

fn redis_config(connection_string: &str) -> RedisConfig {
    RedisConfig {
        connection_string: connection_string.to_string(),
        verbose_statements: false,
        connect_timeout: Duration::from_secs(2),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commands_are_traced() {
    let (addr, commands) = common::start_mock_redis().await;
    let handle = CacheConnectionHandle::connect(&redis_config(&addr.to_string()))
        .await
        .unwrap();
    assert_eq!(handle.address(), addr.to_string());

    let spans = InMemorySpanExporter::default();
    let traces = TracingPipeline::builder(&common::identity(), SamplingPolicy::always())
        .with_exporter(spans.clone())
        .build()
        .unwrap();
    let cache = InstrumentedCache::new(&handle, traces.cache_instrumentation(&handle, false));

    let mut set = redis::cmd("SET");
    set.arg("greeting").arg("hello");
    let reply: String = cache.query(&set, &Context::new()).await.unwrap();
    assert_eq!(reply, "OK");

    let mut get = redis::cmd("GET");
    get.arg("missing");
    let value: Option<String> = cache.query(&get, &Context::new()).await.unwrap();
    assert_eq!(value, None);

    assert!(commands
        .lock()
        .unwrap()
        .iter()
        .any(|cmd| cmd == &["SET", "greeting", "hello"]));

    traces.force_flush().unwrap();
    let exported = spans.get_finished_spans().unwrap();
    let names: Vec<_> = exported.iter().map(|span| span.name.to_string()).collect();
    assert_eq!(names, ["SET", "GET"]);
    assert!(exported.iter().all(|span| span.span_kind == SpanKind::Client));
    assert!(exported
        .iter()
        .all(|span| span.attributes.iter().all(|kv| kv.key.as_str() != "db.query.text")));
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    let error = CacheConnectionHandle::connect(&redis_config("127.0.0.1:1"))
        .await
        .err()
        .expect("nothing listens on port 1");
    assert!(matches!(
        error,
        CacheError::Unreachable { .. } | CacheError::Timeout { .. }
    ));
}

#[tokio::test]
async fn test_malformed_connection_string_is_rejected_before_connecting() {
    let error = CacheConnectionHandle::connect(&redis_config(""))
        .await
        .err()
        .expect("empty connection string");
    assert!(matches!(error, CacheError::InvalidConnectionString { .. }));
}
