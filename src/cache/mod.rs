//! Cache store subsystem.
//!
//! # Data Flow
//! ```text
//! RedisConfig
//!     → connection.rs (normalize string, connect, PING)  CacheConnectionHandle
//!     → instrumentation.rs (client span per command)     InstrumentedCache
//!     → request handlers
//! ```

pub mod connection;
pub mod instrumentation;

pub use connection::{normalize_connection_string, CacheConnectionHandle, CacheError};
pub use instrumentation::{CacheInstrumentation, InstrumentedCache};
