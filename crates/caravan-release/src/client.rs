//! Contract for the release-management daemon

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// Lifecycle state of a deployed release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Unknown,
    Deployed,
    Failed,
    Deleted,
    PendingInstall,
    PendingUpgrade,
}

impl ReleaseStatus {
    /// Parse a daemon status string; both `PENDING_INSTALL` and
    /// `pending-install` spellings are seen in the wild
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().replace('_', "-").as_str() {
            "deployed" => Self::Deployed,
            "failed" => Self::Failed,
            "deleted" | "uninstalled" => Self::Deleted,
            "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
        };
        write!(f, "{}", s)
    }
}

/// What the daemon knows about a release
#[derive(Debug, Clone, Copy)]
pub struct ReleaseState {
    pub status: ReleaseStatus,
    pub revision: u32,
}

/// Parameters for an install or upgrade
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Resolved chart: a local directory or a cached archive
    pub chart: PathBuf,
    pub release: String,
    pub namespace: String,
    /// Wait time in seconds
    pub timeout: u64,
    /// Rendered value overrides (YAML)
    pub overrides: Vec<u8>,
}

/// The daemon's capability set.
///
/// One shared connection serves every chart stage; implementations must
/// be safe for concurrent use.
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// Query a release; `None` when the daemon has never seen it
    async fn status(&self, release: &str) -> Result<Option<ReleaseState>>;

    /// Install a new release and wait for it to settle
    async fn install(&self, request: &InstallRequest) -> Result<()>;

    /// Upgrade an existing release
    async fn upgrade(&self, request: &InstallRequest) -> Result<()>;

    /// Purge a release within the given timeout (seconds)
    async fn delete(&self, release: &str, timeout: u64) -> Result<()>;
}

/// In-memory daemon for tests.
///
/// Tracks release states and records every operation in order, so
/// driver tests can assert on scheduling without a cluster.
#[derive(Default)]
pub struct FakeReleaseClient {
    state: Mutex<HashMap<String, ReleaseState>>,
    log: Mutex<Vec<(String, String)>>,
}

impl FakeReleaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a release state before a test run
    pub fn seed(&self, release: &str, status: ReleaseStatus, revision: u32) {
        self.state
            .lock()
            .unwrap()
            .insert(release.to_string(), ReleaseState { status, revision });
    }

    /// Operations performed, in order, as (op, release) pairs
    pub fn operations(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, op: &str, release: &str) {
        self.log
            .lock()
            .unwrap()
            .push((op.to_string(), release.to_string()));
    }
}

#[async_trait]
impl ReleaseClient for FakeReleaseClient {
    async fn status(&self, release: &str) -> Result<Option<ReleaseState>> {
        Ok(self.state.lock().unwrap().get(release).copied())
    }

    async fn install(&self, request: &InstallRequest) -> Result<()> {
        self.record("install", &request.release);
        self.state.lock().unwrap().insert(
            request.release.clone(),
            ReleaseState {
                status: ReleaseStatus::Deployed,
                revision: 1,
            },
        );
        Ok(())
    }

    async fn upgrade(&self, request: &InstallRequest) -> Result<()> {
        self.record("upgrade", &request.release);
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entry(request.release.clone())
            .or_insert(ReleaseState {
                status: ReleaseStatus::Deployed,
                revision: 0,
            });
        entry.status = ReleaseStatus::Deployed;
        entry.revision += 1;
        Ok(())
    }

    async fn delete(&self, release: &str, _timeout: u64) -> Result<()> {
        self.record("delete", release);
        self.state.lock().unwrap().remove(release);
        Ok(())
    }
}
