//! Caravan Core - foundational types for the deployment orchestrator
//!
//! This crate provides the pieces every other Caravan crate builds on:
//! - `Values`: the layered key/value store with deep merge and cascade lookup
//! - file loading helpers shared by the renderer and the CLI
//! - git HEAD lookup for the `getCommit` template helper

pub mod error;
pub mod files;
pub mod git;
pub mod values;

pub use error::{CoreError, Result};
pub use files::{is_dir, load_file};
pub use git::head_commit;
pub use values::{parse_value_args, Values};
