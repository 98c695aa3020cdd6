//! Metric handles that record into both exports at once.
//!
//! Each handle pairs a scrape-side `metrics` handle (owned by the Prometheus
//! recorder) with the matching OpenTelemetry instrument and its attribute set,
//! so one call site feeds the pull endpoint and the push exporter.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{CounterFn, GaugeFn, HistogramFn};
use opentelemetry::metrics::{Counter, Gauge, Histogram};
use opentelemetry::KeyValue;

pub(crate) struct BridgedCounter {
    pub(crate) scrape: metrics::Counter,
    pub(crate) push: Counter<u64>,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) total: AtomicU64,
}

impl CounterFn for BridgedCounter {
    fn increment(&self, value: u64) {
        self.total.fetch_add(value, Ordering::Relaxed);
        self.scrape.increment(value);
        self.push.add(value, &self.attributes);
    }

    fn absolute(&self, value: u64) {
        let previous = self.total.fetch_max(value, Ordering::Relaxed);
        self.scrape.absolute(value);
        if value > previous {
            self.push.add(value - previous, &self.attributes);
        }
    }
}

pub(crate) struct BridgedGauge {
    pub(crate) scrape: metrics::Gauge,
    pub(crate) push: Gauge<f64>,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) bits: AtomicU64,
}

impl BridgedGauge {
    fn update(&self, f: impl Fn(f64) -> f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = f(f64::from_bits(current));
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl GaugeFn for BridgedGauge {
    fn increment(&self, value: f64) {
        let next = self.update(|v| v + value);
        self.scrape.increment(value);
        self.push.record(next, &self.attributes);
    }

    fn decrement(&self, value: f64) {
        let next = self.update(|v| v - value);
        self.scrape.decrement(value);
        self.push.record(next, &self.attributes);
    }

    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.scrape.set(value);
        self.push.record(value, &self.attributes);
    }
}

pub(crate) struct BridgedHistogram {
    pub(crate) scrape: metrics::Histogram,
    pub(crate) push: Histogram<f64>,
    pub(crate) attributes: Vec<KeyValue>,
}

impl HistogramFn for BridgedHistogram {
    fn record(&self, value: f64) {
        self.scrape.record(value);
        self.push.record(value, &self.attributes);
    }
}
