//! Engine error types.
//!
//! `ReconcileError` is what every public operation returns. Cluster access
//! has its own `ClusterError` so the in-memory and kube-backed
//! implementations can share one failure vocabulary.

use git_provider_client::GitProviderError;
use kube::Error as KubeError;
use platform_model::ModelError;
use thiserror::Error;

/// Errors raised by the cluster access layer.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Object already exists on create
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Replace lost against a concurrent writer (resourceVersion mismatch)
    #[error("Conflict writing {kind} {namespace}/{name}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Object could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other API failure
    #[error("Cluster API error: {0}")]
    Api(String),
}

/// Errors that can occur while reconciling a container.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A resource the operation depends on does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request cannot be applied
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Git provider webhook failure
    #[error("Git provider error: {0}")]
    Provider(#[from] GitProviderError),

    /// Cluster API failure
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Manifest (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background task failed to complete
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<ModelError> for ReconcileError {
    fn from(err: ModelError) -> Self {
        ReconcileError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ReconcileError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReconcileError::Task(err.to_string())
    }
}
