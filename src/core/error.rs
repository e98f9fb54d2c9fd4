//! Error types for Port 42 operations.
//!
//! This module defines the canonical error type used throughout Port 42.
//! All subsystems return `Result<T, PortError>` for error handling.

use std::io;
use thiserror::Error;

/// Canonical error type for all Port 42 operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Variants that wrap a foreign error auto-convert via `#[from]`.
#[derive(Error, Debug)]
pub enum PortError {
    /// I/O error (auto-converts from `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// SQLite index error (auto-converts from `rusqlite::Error`)
    #[error("index error: {0}")]
    Rusqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization error (auto-converts from `serde_json::Error`)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object, path, session, or relation absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request, reference, or prompt.
    #[error("validation error: {0}")]
    Validation(String),

    /// Per-operation deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// AI provider returned malformed or empty content.
    #[error("provider error: {0}")]
    Provider(String),

    /// Request rejected by a cache or validation policy.
    #[error("policy rejection: {0}")]
    PolicyRejection(String),

    /// Session state or token error.
    #[error("session error: {0}")]
    Session(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = PortError::Validation("prompt too long".to_string());
        assert_eq!(format!("{}", err), "validation error: prompt too long");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = PortError::NotFound("object abc123".to_string());
        assert_eq!(format!("{}", err), "not found: object abc123");
    }

    #[test]
    fn test_timeout_error_display() {
        let err = PortError::Timeout("url fetch".to_string());
        assert_eq!(format!("{}", err), "timeout: url fetch");
    }

    #[test]
    fn test_provider_error_display() {
        let err = PortError::Provider("empty completion".to_string());
        assert_eq!(format!("{}", err), "provider error: empty completion");
    }

    #[test]
    fn test_policy_rejection_display() {
        let err = PortError::PolicyRejection("body too large".to_string());
        assert_eq!(format!("{}", err), "policy rejection: body too large");
    }

    #[test]
    fn test_session_error_display() {
        let err = PortError::Session("session is completed".to_string());
        assert_eq!(format!("{}", err), "session error: session is completed");
    }
}
