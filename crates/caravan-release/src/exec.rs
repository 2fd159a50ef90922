//! `helm` binary adapter for the release daemon contract

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::client::{InstallRequest, ReleaseClient, ReleaseState, ReleaseStatus};
use crate::error::{ReleaseError, Result};

/// Drives the release daemon through the `helm` client binary.
///
/// The daemon connection is addressed with `HELM_HOST`, normally a
/// port-forward to the in-cluster daemon established by the caller.
pub struct HelmCli {
    /// `localhost:<port>` of the forwarded daemon, if any
    host: Option<String>,
    /// Explicit helm configuration directory
    config: Option<PathBuf>,
    /// Explicit kubeconfig handed through to helm
    kubeconfig: Option<PathBuf>,
}

impl HelmCli {
    pub fn new(
        host: Option<String>,
        config: Option<PathBuf>,
        kubeconfig: Option<PathBuf>,
    ) -> Self {
        Self {
            host,
            config,
            kubeconfig,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("helm");
        if let Some(host) = &self.host {
            cmd.env("HELM_HOST", host);
        }
        if let Some(config) = &self.config {
            cmd.env("HELM_HOME", config);
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }
        cmd
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(args = ?args, "running helm");
        let mut child = cmd.spawn()?;

        if let Some(data) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(data).await?;
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ReleaseError::Exec {
                command: format!("helm {}", args.join(" ")),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ReleaseClient for HelmCli {
    async fn status(&self, release: &str) -> Result<Option<ReleaseState>> {
        let output = match self.run(&["status", release], None).await {
            Ok(out) => out,
            // the daemon reports unknown releases as an error
            Err(ReleaseError::Exec { stderr, .. }) if stderr.contains("not found") => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        Ok(Some(parse_status_output(&output)))
    }

    async fn install(&self, request: &InstallRequest) -> Result<()> {
        let chart = request.chart.display().to_string();
        let timeout = request.timeout.to_string();
        self.run(
            &[
                "install",
                &chart,
                "--name",
                &request.release,
                "--namespace",
                &request.namespace,
                "--wait",
                "--timeout",
                &timeout,
                "--values",
                "-",
            ],
            Some(&request.overrides),
        )
        .await?;
        Ok(())
    }

    async fn upgrade(&self, request: &InstallRequest) -> Result<()> {
        let chart = request.chart.display().to_string();
        let timeout = request.timeout.to_string();
        self.run(
            &[
                "upgrade",
                &request.release,
                &chart,
                "--timeout",
                &timeout,
                "--values",
                "-",
            ],
            Some(&request.overrides),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, release: &str, timeout: u64) -> Result<()> {
        let timeout = timeout.to_string();
        self.run(
            &["delete", release, "--purge", "--timeout", &timeout],
            None,
        )
        .await?;
        Ok(())
    }
}

/// Pull the status and revision out of the daemon's status report
fn parse_status_output(output: &str) -> ReleaseState {
    let mut status = ReleaseStatus::Unknown;
    let mut revision = 0;
    for line in output.lines() {
        if let Some(raw) = line.strip_prefix("STATUS:") {
            status = ReleaseStatus::parse(raw.trim());
        } else if let Some(raw) = line.strip_prefix("REVISION:") {
            revision = raw.trim().parse().unwrap_or(0);
        }
    }
    ReleaseState { status, revision }
}
