//! Process and runtime collectors.
//!
//! Sampled on a fixed tick into the `otel_demo.process` and
//! `otel_demo.runtime` sources. The same tick runs scrape-registry upkeep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{Gauge, Unit};
use tokio::runtime::Handle;
use tokio::time;

use super::metrics::{names, sources};
use super::{MetricsPipeline, SourceMeter};
use crate::lifecycle::ShutdownSignal;

pub const COLLECT_INTERVAL: Duration = Duration::from_secs(5);

/// Uptime, thread count and resident memory of this process.
pub struct ProcessCollector {
    started: Instant,
    uptime: Gauge,
    threads: Gauge,
    resident_memory: Gauge,
}

impl ProcessCollector {
    pub fn new(meter: &SourceMeter) -> Self {
        meter.describe_gauge(names::PROCESS_UPTIME, Some(Unit::Seconds), "Seconds since process start");
        meter.describe_gauge(names::PROCESS_THREADS, Some(Unit::Count), "OS threads in the process");
        meter.describe_gauge(
            names::PROCESS_RESIDENT_MEMORY,
            Some(Unit::Bytes),
            "Resident set size",
        );
        Self {
            started: Instant::now(),
            uptime: meter.gauge(names::PROCESS_UPTIME, &[]),
            threads: meter.gauge(names::PROCESS_THREADS, &[]),
            resident_memory: meter.gauge(names::PROCESS_RESIDENT_MEMORY, &[]),
        }
    }

    pub fn collect(&self) {
        self.uptime.set(self.started.elapsed().as_secs_f64());
        if let Some(stats) = ProcStatus::read() {
            if let Some(threads) = stats.threads {
                self.threads.set(threads as f64);
            }
            if let Some(rss) = stats.resident_bytes {
                self.resident_memory.set(rss as f64);
            }
        }
    }
}

/// Fields of `/proc/self/status`. Absent on other platforms.
#[derive(Debug, Default, PartialEq)]
struct ProcStatus {
    threads: Option<u64>,
    resident_bytes: Option<u64>,
}

impl ProcStatus {
    fn read() -> Option<Self> {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .map(|raw| Self::parse(&raw))
    }

    fn parse(raw: &str) -> Self {
        let mut status = Self::default();
        for line in raw.lines() {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match field {
                "Threads" => status.threads = value.parse().ok(),
                "VmRSS" => {
                    status.resident_bytes = value
                        .trim_end_matches("kB")
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .map(|kb| kb * 1024)
                }
                _ => {}
            }
        }
        status
    }
}

/// Worker count, live tasks and global queue depth of the tokio runtime.
pub struct RuntimeCollector {
    handle: Handle,
    workers: Gauge,
    alive_tasks: Gauge,
    global_queue_depth: Gauge,
}

impl RuntimeCollector {
    pub fn new(meter: &SourceMeter, handle: Handle) -> Self {
        meter.describe_gauge(names::RUNTIME_WORKERS, Some(Unit::Count), "Runtime worker threads");
        meter.describe_gauge(names::RUNTIME_ALIVE_TASKS, Some(Unit::Count), "Tasks not yet completed");
        meter.describe_gauge(
            names::RUNTIME_GLOBAL_QUEUE_DEPTH,
            Some(Unit::Count),
            "Tasks waiting in the global queue",
        );
        Self {
            handle,
            workers: meter.gauge(names::RUNTIME_WORKERS, &[]),
            alive_tasks: meter.gauge(names::RUNTIME_ALIVE_TASKS, &[]),
            global_queue_depth: meter.gauge(names::RUNTIME_GLOBAL_QUEUE_DEPTH, &[]),
        }
    }

    pub fn collect(&self) {
        let metrics = self.handle.metrics();
        self.workers.set(metrics.num_workers() as f64);
        self.alive_tasks.set(metrics.num_alive_tasks() as f64);
        self.global_queue_depth.set(metrics.global_queue_depth() as f64);
    }
}

/// Runs both collectors until shutdown.
pub struct BackgroundCollectors {
    pipeline: Arc<MetricsPipeline>,
    process: ProcessCollector,
    runtime: RuntimeCollector,
    interval: Duration,
}

impl BackgroundCollectors {
    pub fn new(pipeline: Arc<MetricsPipeline>, handle: Handle) -> Self {
        let process = ProcessCollector::new(&pipeline.source(sources::PROCESS));
        let runtime = RuntimeCollector::new(&pipeline.source(sources::RUNTIME), handle);
        Self {
            pipeline,
            process,
            runtime,
            interval: COLLECT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn collect_once(&self) {
        self.process.collect();
        self.runtime.collect();
        self.pipeline.run_upkeep();
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::debug!(interval = ?self.interval, "Process and runtime collectors starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.collect_once(),
                _ = shutdown.recv() => {
                    tracing::debug!("Collectors received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ServiceIdentity;

    #[test]
    fn test_parse_proc_status() {
        let raw = "Name:\totel-demo\nThreads:\t12\nVmRSS:\t   20480 kB\nVmSwap:\t0 kB\n";
        assert_eq!(
            ProcStatus::parse(raw),
            ProcStatus {
                threads: Some(12),
                resident_bytes: Some(20480 * 1024),
            }
        );
    }

    #[test]
    fn test_parse_tolerates_garbage() {
        assert_eq!(ProcStatus::parse("nonsense\nThreads: many\n"), ProcStatus::default());
    }

    #[tokio::test]
    async fn test_collect_once_populates_scrape_output() {
        let identity = ServiceIdentity::new("OtelDemo", "1.0.1").unwrap();
        let pipeline = Arc::new(MetricsPipeline::builder(&identity).build().unwrap());
        let collectors = BackgroundCollectors::new(pipeline.clone(), Handle::current());

        collectors.collect_once();

        let rendered = pipeline.render();
        assert!(rendered.contains(names::PROCESS_UPTIME));
        assert!(rendered.contains(names::RUNTIME_WORKERS));
        assert!(rendered.contains(names::RUNTIME_ALIVE_TASKS));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let identity = ServiceIdentity::new("OtelDemo", "1.0.1").unwrap();
        let pipeline = Arc::new(MetricsPipeline::builder(&identity).build().unwrap());
        let shutdown = crate::lifecycle::Shutdown::new();
        let collectors = BackgroundCollectors::new(pipeline, Handle::current())
            .with_interval(Duration::from_millis(10));

        let task = tokio::spawn(collectors.run(shutdown.subscribe()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("collectors stopped")
            .unwrap();
    }
}
