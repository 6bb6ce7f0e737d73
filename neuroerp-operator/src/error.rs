//! Error types for the NeuroErp operator.
//!
//! Every variant is treated as transient by the dispatch layer: a failed pass
//! is retried with backoff and the next pass re-derives everything from the
//! live objects.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found.
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Invalid configuration or object shape.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource store failure not originating from the Kubernetes client.
    #[error("Store {operation} failed: {cause}")]
    StoreError {
        /// Store operation that failed.
        operation: String,
        /// Error cause.
        cause: String,
    },

    /// Cleanup of external side effects failed during deletion.
    #[error("Cleanup failed for {name}: {cause}")]
    CleanupError {
        /// Object name.
        name: String,
        /// Error cause.
        cause: String,
    },

    /// The pass was cancelled by the dispatch layer.
    #[error("Reconcile pass cancelled")]
    Cancelled,

    /// The pass ran past its deadline.
    #[error("Reconcile pass exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl OperatorError {
    /// Build a store error for the given operation.
    pub fn store(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::StoreError {
            operation: operation.into(),
            cause: cause.into(),
        }
    }

    /// Whether this error is a 404 from the store.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }
}
