//! Caravan Registry - image digests and builds
//!
//! Resolves `tag` entries to registry digests over the OCI distribution
//! API and drives `build` entries through the local docker client.

pub mod build;
pub mod digest;
pub mod error;

pub use build::{BuildSpec, DockerCli};
pub use digest::fetch_digest;
pub use error::{RegistryError, Result};
