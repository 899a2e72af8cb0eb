//! Cloud provider error types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use stratus_core::GraphError;
use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Output '{output}' of node '{node}' is not available")]
    UnresolvedOutput { node: String, output: String },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Throttled(_) | CloudError::Timeout(_) => true,
            CloudError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// A provider call failed for a single node
///
/// Isolated to the node and its dependents; the rest of the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Provisioning of '{node}' failed: {detail}")]
pub struct ProvisioningError {
    pub node: String,
    pub detail: String,
}

impl ProvisioningError {
    pub fn new(node: impl Into<String>, error: &CloudError) -> Self {
        Self {
            node: node.into(),
            detail: error.to_string(),
        }
    }
}

/// The run-wide deadline fired
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Run deadline of {}s exceeded", .limit.as_secs())]
pub struct TimeoutError {
    pub limit: Duration,
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CloudError::Throttled("Rate exceeded".into()).is_transient());
        assert!(CloudError::Timeout("read".into()).is_transient());
        assert!(
            CloudError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
                .is_transient()
        );
        assert!(!CloudError::ApiError("InvalidParameterValue".into()).is_transient());
        assert!(!CloudError::Cancelled.is_transient());
    }

    #[test]
    fn test_provisioning_error_message() {
        let err = ProvisioningError::new("database", &CloudError::ApiError("quota".into()));
        assert_eq!(err.to_string(), "Provisioning of 'database' failed: API error: quota");
    }
}
