//! Caravan Kube - Kubernetes client plumbing and the manifest resource
//!
//! Wraps the typed and dynamic `kube` clients behind one handle, decodes
//! multi-document manifests through API discovery, and watches Jobs and
//! Pods to a terminal phase after they are applied.

pub mod client;
pub mod error;
pub mod manifest;
pub mod watch;

pub use client::K8s;
pub use error::{KubeError, Result};
pub use manifest::Manifest;
