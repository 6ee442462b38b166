//! Error types for fieldcrypt

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fieldcrypt
#[derive(Error, Debug)]
pub enum Error {
    // Master secret errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Envelope / record errors
    #[error("Malformed {kind}: {reason}")]
    Format { kind: &'static str, reason: String },

    #[error("Authentication failed - data corrupted or wrong key")]
    Authentication,

    // Crypto errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::Format`] error
    pub(crate) fn format(kind: &'static str, reason: impl Into<String>) -> Self {
        Error::Format {
            kind,
            reason: reason.into(),
        }
    }

    /// True for AEAD tag mismatches (wrong key or tampered bytes)
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication)
    }

    /// True when the caller handed over a corrupt or forged envelope/record
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format { .. })
    }

    /// True for errors that should abort startup
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Blocking task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Authentication.is_authentication());
        assert!(!Error::Authentication.is_format());

        let err = Error::format("envelope", "missing prefix");
        assert!(err.is_format());
        assert!(!err.is_authentication());
        assert_eq!(err.to_string(), "Malformed envelope: missing prefix");

        assert!(Error::Configuration("missing".to_string()).is_configuration());
        assert!(Error::InvalidConfig("bad".to_string()).is_configuration());
    }
}
