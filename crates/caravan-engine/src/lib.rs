//! Caravan Engine - template rendering for workflow and value files
//!
//! Every template a workflow touches (the workflow document itself, stage
//! inputs, value files) is evaluated against the same helper surface. The
//! engine carries the cluster-free helpers; callers register the
//! cluster-bound ones (`getDigest`, `fromConfigMap`, ...) before rendering.

pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;

pub use engine::Engine;
pub use error::{EngineError, Result};
