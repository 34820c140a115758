//! Error types for the NameNode HA controller.
//!
//! This module provides a unified error type [`HaError`] for all controller
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Leadership**: a mutation of the coordination store was attempted by a
//!   non-leader.
//! - **Transient reachability**: a peer or the coordination service did not
//!   answer within a bounded wait ([`HaError::TimedOut`]).
//! - **Storage service**: an external control operation failed
//!   ([`HaError::ServiceCommand`]). For the one-time bootstrap operations this
//!   is fatal for the current reconciliation pass only.
//! - **Not ready**: data read from the coordination store is missing or
//!   inconsistent; callers treat it as "try again on the next event".
//! - **Configuration**: invalid settings or missing configuration.
//!
//! # Example
//!
//! ```rust
//! use namenode_ha::error::{HaError, Result};
//!
//! fn first_member(members: &[String]) -> Result<&str> {
//!     members
//!         .first()
//!         .map(String::as_str)
//!         .ok_or_else(|| HaError::NotReady("chosen set is empty".into()))
//! }
//!
//! let err = first_member(&[]).unwrap_err();
//! assert!(err.is_not_ready());
//! ```

use std::io;
use thiserror::Error;

/// Main error type for HA controller operations.
#[derive(Error, Debug)]
pub enum HaError {
    // Leadership errors
    #[error("Not the leader: coordination store is read-only on this node")]
    NotLeader,

    // Reachability errors
    #[error("Timed out waiting for {what} after {after_ms}ms")]
    TimedOut { what: String, after_ms: u64 },

    #[error("Wait cancelled: {0}")]
    Cancelled(String),

    // Storage service errors
    #[error("Storage service operation '{operation}' failed: {reason}")]
    ServiceCommand { operation: String, reason: String },

    // State errors
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Coordination store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HaError {
    /// Shorthand for a failed storage-service operation.
    pub fn service(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        HaError::ServiceCommand {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable on a later event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HaError::TimedOut { .. }
                | HaError::NotReady(_)
                | HaError::Network(_)
                | HaError::ServiceCommand { .. }
        )
    }

    /// Check if the error only means "preconditions not met yet".
    pub fn is_not_ready(&self) -> bool {
        matches!(self, HaError::NotReady(_))
    }
}

impl From<serde_json::Error> for HaError {
    fn from(e: serde_json::Error) -> Self {
        HaError::Serialization(e.to_string())
    }
}

/// Result type alias for HA controller operations.
pub type Result<T> = std::result::Result<T, HaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HaError::TimedOut {
            what: "peer".into(),
            after_ms: 10
        }
        .is_retryable());
        assert!(HaError::service("initSharedEditLogs", "exit 1").is_retryable());
        assert!(!HaError::NotLeader.is_retryable());
        assert!(!HaError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = HaError::service("bootstrapStandby", "exit status 2");
        assert_eq!(
            err.to_string(),
            "Storage service operation 'bootstrapStandby' failed: exit status 2"
        );
    }
}
