//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Logging sink → Load config → Construct dependencies → Serve
//!     any failure → fatal entry → flush → non-zero exit
//!
//! Phases (phase.rs):
//!     Uninitialized → LoggingReady → ConfigLoaded → DependenciesBuilt → Running
//!
//! Shutdown (shutdown.rs):
//!     Trigger → server drains → collectors stop → pipelines flush → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: logging first, config second, listeners last
//! - Telemetry is flushed on every exit path

pub mod phase;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use phase::{Lifecycle, Phase};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{bootstrap_sink, launch, Orchestrator, Served, StartupReport, STARTUP_FAILED};
