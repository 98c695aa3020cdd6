//! Authentication signing key.
//!
//! # Responsibilities
//! - Validate the configured key material at startup
//! - Hold the bytes for token signing and verification
//!
//! # Design Decisions
//! - Missing or empty key material is a startup failure, not a runtime one
//! - Short keys are accepted with a warning
//! - The key never appears in Debug output or logs

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::AuthConfig;

/// Length below which a key is considered weak.
pub const RECOMMENDED_KEY_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningKeyError {
    #[error("signing key is not configured")]
    Missing,

    #[error("signing key is empty")]
    Empty,
}

/// Symmetric key material used to sign access tokens.
#[derive(Clone)]
pub struct SigningKey {
    bytes: Arc<[u8]>,
}

impl SigningKey {
    pub fn new(material: impl AsRef<[u8]>) -> Result<Self, SigningKeyError> {
        let material = material.as_ref();
        if material.iter().all(u8::is_ascii_whitespace) {
            return Err(SigningKeyError::Empty);
        }
        if material.len() < RECOMMENDED_KEY_BYTES {
            tracing::warn!(
                length = material.len(),
                recommended = RECOMMENDED_KEY_BYTES,
                "Signing key is shorter than recommended"
            );
        }
        Ok(Self {
            bytes: Arc::from(material),
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, SigningKeyError> {
        match &config.signing_key {
            Some(material) => Self::new(material.as_bytes()),
            None => Err(SigningKeyError::Missing),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_empty() {
        assert_eq!(
            SigningKey::from_config(&AuthConfig::default()).unwrap_err(),
            SigningKeyError::Missing
        );
        let blank = AuthConfig {
            signing_key: Some("  ".into()),
        };
        assert_eq!(SigningKey::from_config(&blank).unwrap_err(), SigningKeyError::Empty);
    }

    #[test]
    fn test_short_key_is_accepted() {
        let key = SigningKey::new("short").unwrap();
        assert_eq!(key.len(), 5);
    }

    #[test]
    fn test_debug_hides_material() {
        let key = SigningKey::new("a-very-long-and-very-secret-signing-key").unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("secret"));
    }
}
