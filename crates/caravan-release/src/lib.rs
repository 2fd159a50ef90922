//! Caravan Release - chart releases through a release-management daemon
//!
//! The daemon itself is an external collaborator; this crate carries its
//! contract ([`client::ReleaseClient`]), the `helm` binary adapter that
//! implements it, the chart repository fetch/cache layer, and the chart
//! resource that plugs into workflow stages.

pub mod chart;
pub mod client;
pub mod error;
pub mod exec;
pub mod fetch;

pub use chart::Chart;
pub use client::{FakeReleaseClient, InstallRequest, ReleaseClient, ReleaseState, ReleaseStatus};
pub use error::{ReleaseError, Result};
pub use exec::HelmCli;

/// Purge timeout applied to release deletion (seconds)
pub const DELETE_TIMEOUT: u64 = 60;
