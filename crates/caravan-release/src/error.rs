//! Error types for caravan-release

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReleaseError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReleaseError {
    #[error("{field} for '{key}' is empty")]
    MissingField { key: String, field: String },

    #[error("chart for release '{release}' is not connected to a daemon")]
    NotConnected { release: String },

    #[error("release daemon error: {message}")]
    Daemon { message: String },

    #[error("'{command}' exited with {code}: {stderr}")]
    Exec {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("repository '{name}' is not configured")]
    RepositoryNotFound { name: String },

    #[error("chart '{chart}' not found in repository '{repo}'")]
    ChartNotFound { chart: String, repo: String },

    #[error("failed to fetch {url}: {message}")]
    Download { url: String, message: String },

    #[error("invalid chart reference '{name}': {message}")]
    InvalidReference { name: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
