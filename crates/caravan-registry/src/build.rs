//! Image builds through the local docker client

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tokio::process::Command;

use crate::digest::fetch_digest;
use crate::error::{RegistryError, Result};

/// One image build from a workflow's `build` block.
///
/// The plain-string shorthand `name: server/app:tag` expands to a spec
/// with just a reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    Reference(String),
    Full {
        reference: String,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        args: IndexMap<String, String>,
    },
}

impl BuildSpec {
    pub fn reference(&self) -> &str {
        match self {
            Self::Reference(reference) => reference,
            Self::Full { reference, .. } => reference,
        }
    }

    fn context(&self) -> Option<&str> {
        match self {
            Self::Reference(_) => None,
            Self::Full { context, .. } => context.as_deref(),
        }
    }

    fn args(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Self::Reference(_) => None,
            Self::Full { args, .. } => Some(args),
        }
    }
}

/// Builds and pushes images by shelling out to `docker`
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    /// Build the image in its context, push it, and return the pushed
    /// digest
    pub async fn build_and_push(&self, default_context: &Path, spec: &BuildSpec) -> Result<String> {
        let reference = spec.reference();
        let context = spec
            .context()
            .map(Path::new)
            .unwrap_or(default_context);

        let mut build = Command::new("docker");
        build.arg("build").arg("--tag").arg(reference);
        if let Some(args) = spec.args() {
            for (key, value) in args {
                build.arg("--build-arg").arg(format!("{}={}", key, value));
            }
        }
        build.arg(context);

        tracing::info!(image = %reference, "building image");
        run(build, &format!("docker build {}", reference)).await?;

        tracing::info!(image = %reference, "pushing image");
        let mut push = Command::new("docker");
        push.args(["push", reference]);
        run(push, &format!("docker push {}", reference)).await?;

        fetch_digest(reference).await
    }
}

async fn run(mut cmd: Command, label: &str) -> Result<()> {
    let status = cmd.status().await?;
    if !status.success() {
        return Err(RegistryError::Build {
            command: label.to_string(),
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}
