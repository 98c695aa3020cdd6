//! Trace sampling policy.
//!
//! The decision is made once, at the trace root, from the trace id and the
//! configured ratio. Every descendant inherits the parent's decision through
//! the parent-based sampler, so a dropped trace never has exported children
//! and a recorded trace is never partially re-sampled.

use opentelemetry::trace::{SamplingDecision, SpanKind, TraceId};
use opentelemetry_sdk::trace::{Sampler, ShouldSample};

/// Probability that a trace root is recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    ratio: f64,
}

impl SamplingPolicy {
    /// Build a policy; the ratio is clamped into `[0.0, 1.0]` and NaN means 1.0.
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() { 1.0 } else { ratio.clamp(0.0, 1.0) };
        Self { ratio }
    }

    pub fn always() -> Self {
        Self { ratio: 1.0 }
    }

    pub fn never() -> Self {
        Self { ratio: 0.0 }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// SDK sampler implementing the policy.
    pub fn sampler(&self) -> Sampler {
        let root = if self.ratio >= 1.0 {
            Sampler::AlwaysOn
        } else if self.ratio <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.ratio)
        };
        Sampler::ParentBased(Box::new(root))
    }

    /// Decision the policy makes for a new root with `trace_id`.
    pub fn samples_root(&self, trace_id: TraceId) -> bool {
        let result = self
            .sampler()
            .should_sample(None, trace_id, "root", &SpanKind::Internal, &[], &[]);
        matches!(result.decision, SamplingDecision::RecordAndSample)
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::always()
    }
}
