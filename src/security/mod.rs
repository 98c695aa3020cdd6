//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! AuthConfig.signing_key
//!     → signing_key.rs (validate, wrap)
//!     → AppState (shared, read-only)
//! ```
//!
//! # Design Decisions
//! - Fail closed: no key, no start
//! - Secrets are redacted from every Debug impl

pub mod signing_key;

pub use signing_key::{SigningKey, SigningKeyError};
