//! Error types for caravan-flow

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    #[error(transparent)]
    Core(#[from] caravan_core::CoreError),

    #[error(transparent)]
    Engine(#[from] caravan_engine::EngineError),

    #[error(transparent)]
    Kube(#[from] caravan_kube::KubeError),

    #[error(transparent)]
    Release(#[from] caravan_release::ReleaseError),

    #[error(transparent)]
    Registry(#[from] caravan_registry::RegistryError),

    #[error("failed to parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("cycle in dependencies")]
    Cycle,

    #[error("stage '{key}' does not exist")]
    UnknownStage { key: String },

    #[error("'{key}' depends on unknown stage '{depends}'")]
    UnknownDependency { key: String, depends: String },

    #[error("no {kind} client connected")]
    MissingBackend { kind: &'static str },

    #[error("job '{command}' failed: {message}")]
    Hook { command: String, message: String },

    #[error("stage(s) failed: {}", stages.join(", "))]
    StagesFailed { stages: Vec<String> },
}
