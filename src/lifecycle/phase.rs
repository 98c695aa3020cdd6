//! Startup phases.

use std::fmt;

/// Where the process is in its life.
///
/// ```text
/// Uninitialized → LoggingReady → ConfigLoaded → DependenciesBuilt → Running → Stopped
///                      │              │                 │              │
///                      └──────────────┴──── Failed ─────┴──────────────┘
/// Stopped | Failed → FlushingTelemetry → Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    LoggingReady,
    ConfigLoaded,
    DependenciesBuilt,
    Running,
    Stopped,
    Failed,
    FlushingTelemetry,
    Terminated,
}

impl Phase {
    /// Whether `self → next` is a legal transition.
    pub fn allows(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Uninitialized, LoggingReady)
                | (LoggingReady, ConfigLoaded)
                | (ConfigLoaded, DependenciesBuilt)
                | (DependenciesBuilt, Running)
                | (Running, Stopped)
                | (LoggingReady | ConfigLoaded | DependenciesBuilt | Running, Failed)
                | (Stopped | Failed, FlushingTelemetry)
                | (FlushingTelemetry, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Phase::Terminated
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current phase plus every phase visited, in order.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    history: Vec<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            history: vec![Phase::Uninitialized],
        }
    }

    pub fn current(&self) -> Phase {
        self.history.last().copied().unwrap_or(Phase::Uninitialized)
    }

    /// Move to `next`. An illegal transition is logged and ignored.
    pub fn advance(&mut self, next: Phase) -> bool {
        let current = self.current();
        if !current.allows(next) {
            tracing::warn!(from = %current, to = %next, "Ignoring illegal lifecycle transition");
            return false;
        }
        tracing::debug!(from = %current, to = %next, "Lifecycle transition");
        self.history.push(next);
        true
    }

    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Phase> {
        self.history
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        for phase in [
            Phase::LoggingReady,
            Phase::ConfigLoaded,
            Phase::DependenciesBuilt,
            Phase::Running,
            Phase::Stopped,
            Phase::FlushingTelemetry,
            Phase::Terminated,
        ] {
            assert!(lifecycle.advance(phase), "rejected {phase}");
        }
        assert!(lifecycle.current().is_terminal());
    }

    #[test]
    fn test_failure_from_any_active_phase() {
        for phase in [
            Phase::LoggingReady,
            Phase::ConfigLoaded,
            Phase::DependenciesBuilt,
            Phase::Running,
        ] {
            assert!(phase.allows(Phase::Failed));
        }
        assert!(!Phase::Uninitialized.allows(Phase::Failed));
        assert!(!Phase::Terminated.allows(Phase::Failed));
    }

    #[test]
    fn test_flush_only_after_stop_or_failure() {
        assert!(Phase::Failed.allows(Phase::FlushingTelemetry));
        assert!(Phase::Stopped.allows(Phase::FlushingTelemetry));
        assert!(!Phase::Running.allows(Phase::FlushingTelemetry));
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.advance(Phase::Running));
        assert_eq!(lifecycle.history(), &[Phase::Uninitialized]);
    }
}
