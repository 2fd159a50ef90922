//! Error types for caravan-registry

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    #[error("failed to fetch digest for '{reference}': {message}")]
    Digest { reference: String, message: String },

    #[error("'{command}' exited with {code}")]
    Build { command: String, code: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
