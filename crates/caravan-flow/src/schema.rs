//! Workflow and stage schema
//!
//! A stage's YAML carries both the workflow metadata (ordering, hooks,
//! preconditions) and the fields of its resource variant; the `kind`
//! discriminator decides which variant the document decodes into.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::Deserialize;

use caravan_core::Values;
use caravan_kube::{K8s, Manifest};
use caravan_registry::BuildSpec;
use caravan_release::{Chart, ReleaseClient};

use crate::error::{FlowError, Result};

/// Default wait time (seconds) applied when a stage names none
pub const DEFAULT_TIMEOUT: u64 = 300;

/// The complete workflow, keyed by stage
pub type Stages = IndexMap<String, Stage>;

/// Top-level workflow document
#[derive(Default, Deserialize)]
pub struct Workflow {
    /// Images to build and push before the run
    #[serde(default)]
    pub build: IndexMap<String, BuildSpec>,

    /// Images whose digests are looked up before the run
    #[serde(default)]
    pub tag: IndexMap<String, String>,

    #[serde(default)]
    pub stages: Stages,

    #[serde(default)]
    pub values: Values,
}

impl Workflow {
    /// Parse a rendered workflow document
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow").finish_non_exhaustive()
    }
}

/// Shell commands run around a stage's resource action
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Jobs {
    #[serde(default)]
    pub before: Vec<String>,

    #[serde(default)]
    pub after: Vec<String>,
}

/// One unit of the workflow: a resource plus its orchestration metadata
#[derive(Clone)]
pub struct Stage {
    /// Stages that must complete before this one acts
    pub depends: Vec<String>,

    /// Install only: skip when already installed, never delete
    pub forget: bool,

    /// Template file rendered into the resource's input
    pub template: String,

    /// Shell hooks around the resource action
    pub jobs: Jobs,

    /// Resource discriminator ("helm", "kube"/"kubernetes")
    pub kind: String,

    /// Preconditions on values; an empty expectation just requires
    /// presence
    pub requires: IndexMap<String, String>,

    /// Stage-local value overrides
    pub values: Values,

    pub resource: Resource,
}

/// Common fields read in the first decode pass
#[derive(Default, Deserialize)]
struct StageHeader {
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    forget: bool,
    #[serde(default)]
    template: String,
    #[serde(default)]
    jobs: Jobs,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    requires: IndexMap<String, String>,
    #[serde(default)]
    values: Values,
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = serde_yaml::Value::deserialize(deserializer)?;
        let header: StageHeader =
            serde_yaml::from_value(raw.clone()).map_err(D::Error::custom)?;

        let resource = match header.kind.as_str() {
            "kube" | "kubernetes" => {
                let mut manifest: Manifest =
                    serde_yaml::from_value(raw).map_err(D::Error::custom)?;
                if manifest.timeout == 0 {
                    manifest.timeout = DEFAULT_TIMEOUT;
                }
                Resource::Manifest(manifest)
            }
            "helm" => {
                let mut chart: Chart = serde_yaml::from_value(raw).map_err(D::Error::custom)?;
                if chart.timeout == 0 {
                    chart.timeout = DEFAULT_TIMEOUT;
                }
                Resource::Chart(chart)
            }
            other => {
                return Err(D::Error::custom(format!("kind '{}' unknown", other)));
            }
        };

        Ok(Stage {
            depends: header.depends,
            forget: header.forget,
            template: header.template,
            jobs: header.jobs,
            kind: header.kind,
            requires: header.requires,
            values: header.values,
            resource,
        })
    }
}

/// Backend clients shared by every stage in a run
#[derive(Clone, Default)]
pub struct Backends {
    pub k8s: Option<K8s>,
    pub releases: Option<Arc<dyn ReleaseClient>>,
}

/// The thing a stage creates or destroys.
///
/// A closed set of two variants sharing one capability surface; the
/// scheduler never needs to know which one it is driving.
#[derive(Clone)]
pub enum Resource {
    Manifest(Manifest),
    Chart(Chart),
}

impl Resource {
    /// Validate required fields, cascading them from values
    pub fn lint(&mut self, key: &str, values: &mut Values) -> Result<()> {
        match self {
            Resource::Manifest(manifest) => manifest.lint(key, values)?,
            Resource::Chart(chart) => chart.lint(key, values)?,
        }
        Ok(())
    }

    /// Attach the matching backend client
    pub fn connect(&mut self, backends: &Backends) -> Result<()> {
        match self {
            Resource::Manifest(manifest) => {
                let k8s = backends
                    .k8s
                    .clone()
                    .ok_or(FlowError::MissingBackend { kind: "kubernetes" })?;
                manifest.connect(k8s);
            }
            Resource::Chart(chart) => {
                let releases = backends
                    .releases
                    .clone()
                    .ok_or(FlowError::MissingBackend { kind: "release daemon" })?;
                chart.connect(releases);
            }
        }
        Ok(())
    }

    /// Whether the resource currently exists
    pub async fn status(&self) -> Result<bool> {
        match self {
            Resource::Manifest(manifest) => Ok(manifest.status().await?),
            Resource::Chart(chart) => Ok(chart.status().await?),
        }
    }

    /// Create the resource if absent, update it if present
    pub async fn install_or_upgrade(&self) -> Result<()> {
        match self {
            Resource::Manifest(manifest) => Ok(manifest.install_or_upgrade().await?),
            Resource::Chart(chart) => Ok(chart.install_or_upgrade().await?),
        }
    }

    /// Remove the resource
    pub async fn delete(&self) -> Result<()> {
        match self {
            Resource::Manifest(manifest) => Ok(manifest.delete().await?),
            Resource::Chart(chart) => Ok(chart.delete().await?),
        }
    }

    /// Store the pre-rendered input payload
    pub fn set_input(&mut self, input: Vec<u8>) {
        match self {
            Resource::Manifest(manifest) => manifest.set_input(input),
            Resource::Chart(chart) => chart.set_input(input),
        }
    }

    /// The current input payload
    pub fn get_input(&self) -> &[u8] {
        match self {
            Resource::Manifest(manifest) => manifest.get_input(),
            Resource::Chart(chart) => chart.get_input(),
        }
    }
}

#[cfg(test)]
impl Stage {
    /// A minimal helm stage for graph and driver tests
    pub(crate) fn for_tests() -> Self {
        Self {
            depends: Vec::new(),
            forget: false,
            template: String::new(),
            jobs: Jobs::default(),
            kind: "helm".to_string(),
            requires: IndexMap::new(),
            values: Values::new(),
            resource: Resource::Chart(Chart::default()),
        }
    }
}
