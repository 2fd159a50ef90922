//! CLI subcommands

pub mod kube;
pub mod output;
pub mod run;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::{miette, IntoDiagnostic, Result};

use caravan_core::{parse_value_args, CoreError, Values};
use caravan_flow::Renderer;
use caravan_kube::K8s;

/// Persistent flags shared by every subcommand
pub struct Globals {
    pub templates: Vec<PathBuf>,
    pub values: Vec<String>,
    pub builds: Vec<String>,
    pub tags: Vec<String>,
    pub kube_config: Option<PathBuf>,
}

/// The connected context a command runs in: cluster, renderer, and the
/// values layered from explicit pairs and template files
pub struct Session {
    pub k8s: K8s,
    pub renderer: Arc<Renderer>,
    pub values: Values,
}

/// Connect and layer the input values.
///
/// Explicit `--value` pairs come first; each `--template` file is then
/// rendered against the values collected so far and merged on top.
pub async fn session(globals: &Globals) -> Result<Session> {
    let k8s = K8s::connect(globals.kube_config.as_deref())
        .await
        .into_diagnostic()?;
    let renderer = Arc::new(Renderer::new(Some(k8s.clone())));

    let mut values = parse_value_args(&globals.values).into_diagnostic()?;
    for template in &globals.templates {
        let rendered = renderer.clone();
        values
            .from_template(template, |path: &Path, current: &Values| {
                rendered
                    .render_file(path, current)
                    .map_err(|err| CoreError::Template {
                        name: path.display().to_string(),
                        message: err.to_string(),
                    })
            })
            .map_err(|err| miette!("couldn't attach import {}: {}", template.display(), err))?;
    }

    Ok(Session {
        k8s,
        renderer,
        values,
    })
}

/// Split repeated NAME=REF flags into pairs
pub fn parse_pairs(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(name, reference)| (name.to_string(), reference.to_string()))
                .ok_or_else(|| miette!("invalid pair '{}', expected NAME=REF", arg))
        })
        .collect()
}
