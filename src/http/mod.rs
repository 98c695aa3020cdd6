//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, routes)
//!     → instrumentation.rs (server span, request metrics, trace context)
//!     → handlers (health, dependencies, scrape, docs.rs)
//!
//! Outbound:
//!     handler → client.rs (client span, traceparent, request metrics) → upstream
//! ```

pub mod client;
pub mod docs;
pub mod instrumentation;
pub mod server;

pub use client::InstrumentedHttpClient;
pub use instrumentation::{track_http_request, HttpServerInstrumentation};
pub use server::{AppState, HttpServer};
