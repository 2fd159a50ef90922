//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("template error in {name}: {message}")]
    Template { name: String, message: String },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error("git error for {path}: {message}")]
    Git { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
