//! Spans for cache commands.
//!
//! One client span per command, named after the operation. Statement text is
//! recorded only when verbose statements are enabled.

use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;
use redis::aio::MultiplexedConnection;
use redis::{Arg, Cmd, FromRedisValue, RedisResult};

use super::CacheConnectionHandle;

const DB_SYSTEM: &str = "redis";
const MAX_STATEMENT_LEN: usize = 1024;

/// Span factory for cache commands.
#[derive(Clone, Debug)]
pub struct CacheInstrumentation {
    tracer: SdkTracer,
    address: String,
    verbose_statements: bool,
}

impl CacheInstrumentation {
    pub fn new(tracer: SdkTracer, address: impl Into<String>, verbose_statements: bool) -> Self {
        Self {
            tracer,
            address: address.into(),
            verbose_statements,
        }
    }

    pub fn verbose_statements(&self) -> bool {
        self.verbose_statements
    }

    /// Start the span for `cmd` under `parent` and return its context.
    pub fn start(&self, cmd: &Cmd, parent: &Context) -> Context {
        let operation = operation_name(cmd);
        let mut attributes = vec![
            KeyValue::new("db.system.name", DB_SYSTEM),
            KeyValue::new("db.operation.name", operation.clone()),
            KeyValue::new("server.address", self.address.clone()),
        ];
        if self.verbose_statements {
            attributes.push(KeyValue::new("db.query.text", statement_text(cmd)));
        }

        let span = self
            .tracer
            .span_builder(operation)
            .with_kind(SpanKind::Client)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);
        parent.with_span(span)
    }

    /// End the span in `cx`, marking it failed on `error`.
    pub fn finish(&self, cx: &Context, error: Option<&redis::RedisError>) {
        let span = cx.span();
        if let Some(error) = error {
            span.set_attribute(KeyValue::new("error.type", format!("{:?}", error.kind())));
            span.set_status(Status::error(error.to_string()));
        }
        span.end();
    }
}

/// Upper-cased command name, e.g. `GET`.
pub fn operation_name(cmd: &Cmd) -> String {
    match cmd.args_iter().next() {
        Some(Arg::Simple(name)) => String::from_utf8_lossy(name).to_ascii_uppercase(),
        _ => "UNKNOWN".to_string(),
    }
}

/// Full command line, truncated.
pub fn statement_text(cmd: &Cmd) -> String {
    let mut text = cmd
        .args_iter()
        .map(|arg| match arg {
            Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Arg::Cursor => "<cursor>".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    if text.len() > MAX_STATEMENT_LEN {
        let mut cut = MAX_STATEMENT_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

/// Cache connection whose commands are traced.
#[derive(Clone)]
pub struct InstrumentedCache {
    connection: MultiplexedConnection,
    instrumentation: CacheInstrumentation,
}

impl InstrumentedCache {
    pub fn new(handle: &CacheConnectionHandle, instrumentation: CacheInstrumentation) -> Self {
        Self {
            connection: handle.connection(),
            instrumentation,
        }
    }

    /// Run `cmd` inside a client span parented on `parent`.
    pub async fn query<T: FromRedisValue>(&self, cmd: &Cmd, parent: &Context) -> RedisResult<T> {
        let cx = self.instrumentation.start(cmd, parent);
        let mut connection = self.connection.clone();
        let result = cmd.query_async::<T>(&mut connection).await;
        self.instrumentation.finish(&cx, result.as_ref().err());
        result
    }

    pub async fn ping(&self, parent: &Context) -> RedisResult<String> {
        self.query(&redis::cmd("PING"), parent).await
    }
}

impl std::fmt::Debug for InstrumentedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedCache")
            .field("instrumentation", &self.instrumentation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{SamplingPolicy, ServiceIdentity, TracingPipeline};
    use opentelemetry::Value;
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn set_cmd() -> Cmd {
        let mut cmd = redis::cmd("set");
        cmd.arg("session:42").arg("alice");
        cmd
    }

    fn record(verbose: bool) -> opentelemetry_sdk::trace::SpanData {
        let exporter = InMemorySpanExporter::default();
        let pipeline = TracingPipeline::builder(
            &ServiceIdentity::new("OtelDemo", "1.0.1").unwrap(),
            SamplingPolicy::always(),
        )
        .with_exporter(exporter.clone())
        .build()
        .unwrap();

        let instrumentation =
            CacheInstrumentation::new(pipeline.scoped_tracer("otel_demo.cache.redis"), "127.0.0.1:6379", verbose);
        let cx = instrumentation.start(&set_cmd(), &Context::new());
        instrumentation.finish(&cx, None);
        pipeline.force_flush().unwrap();

        exporter.get_finished_spans().unwrap().remove(0)
    }

    fn attribute<'a>(span: &'a opentelemetry_sdk::trace::SpanData, key: &str) -> Option<&'a Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    #[test]
    fn test_operation_and_statement() {
        let cmd = set_cmd();
        assert_eq!(operation_name(&cmd), "SET");
        assert_eq!(statement_text(&cmd), "set session:42 alice");
    }

    #[test]
    fn test_statement_is_truncated() {
        let mut cmd = redis::cmd("SET");
        cmd.arg("k").arg("é".repeat(2000));
        assert!(statement_text(&cmd).len() <= MAX_STATEMENT_LEN);
    }

    #[test]
    fn test_span_without_statement_by_default() {
        let span = record(false);
        assert_eq!(span.name, "SET");
        assert_eq!(span.span_kind, SpanKind::Client);
        assert_eq!(attribute(&span, "db.system.name"), Some(&Value::from("redis")));
        assert!(attribute(&span, "db.query.text").is_none());
    }

    #[test]
    fn test_verbose_span_records_statement() {
        let span = record(true);
        assert_eq!(
            attribute(&span, "db.query.text"),
            Some(&Value::from("set session:42 alice"))
        );
    }
}
