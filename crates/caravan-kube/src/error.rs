//! Error types for caravan-kube

use thiserror::Error;

/// Result type for Kubernetes operations
pub type Result<T> = std::result::Result<T, KubeError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Config(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unknown resource type {api_version}/{kind}")]
    UnknownResourceType { api_version: String, kind: String },

    #[error("{field} for '{key}' is empty")]
    MissingField { key: String, field: String },

    #[error("manifest for '{kind}/{name}' is not connected to a cluster")]
    NotConnected { kind: String, name: String },

    #[error("timed out after {seconds}s waiting for {kind}/{name}")]
    WatchTimeout {
        kind: String,
        name: String,
        seconds: u64,
    },

    #[error("watch for {kind}/{name} failed: {message}")]
    WatchFailed {
        kind: String,
        name: String,
        message: String,
    },

    #[error("{kind}/{name} failed to deploy\n{logs}")]
    WorkloadFailed {
        kind: String,
        name: String,
        logs: String,
    },

    #[error("no pods found in '{namespace}' matching '{label}'")]
    PodNotFound { namespace: String, label: String },

    #[error("key '{key}' not found in {kind} '{name}'")]
    KeyNotFound {
        kind: String,
        name: String,
        key: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KubeError {
    /// Check whether this is a Kubernetes 404 Not Found response
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }
}
