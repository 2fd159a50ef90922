//! Run command - drive a workflow forward, in reverse, or up to a target

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use miette::{bail, IntoDiagnostic, Result};

use caravan_flow::{Backends, Workflow};
use caravan_kube::K8s;
use caravan_registry::{BuildSpec, DockerCli};
use caravan_release::{HelmCli, ReleaseClient};

use super::{parse_pairs, session, Globals};

pub struct Options {
    pub workflow: PathBuf,
    pub destroy: bool,
    pub force: bool,
    pub until: Option<String>,
    pub context: PathBuf,
    pub tiller_name: String,
    pub tiller_port: u16,
    pub helm_config: Option<PathBuf>,
}

pub async fn run(globals: Globals, options: Options) -> Result<()> {
    let session = session(&globals).await?;

    // the workflow document itself is a template
    let data = session
        .renderer
        .render_file(&options.workflow, &session.values)
        .into_diagnostic()?;
    let mut workflow = Workflow::from_bytes(&data).into_diagnostic()?;

    // explicit CLI layers win over the workflow's values block
    workflow.values.append(&session.values);

    for (name, reference) in parse_pairs(&globals.builds)? {
        workflow.build.insert(name, BuildSpec::Reference(reference));
    }
    for (name, reference) in parse_pairs(&globals.tags)? {
        workflow.tag.insert(name, reference);
    }

    // digests land in the values before stage inputs are rendered
    let docker = DockerCli::default();
    for (name, spec) in &workflow.build {
        let digest = docker
            .build_and_push(&options.context, spec)
            .await
            .into_diagnostic()?;
        workflow.values.set(name, digest.into());
    }
    for (name, reference) in &workflow.tag {
        let digest = caravan_registry::fetch_digest(reference)
            .await
            .into_diagnostic()?;
        workflow.values.set(name, digest.into());
    }

    let releases = daemon_client(&session.k8s, &options, globals.kube_config.clone()).await;
    let backends = Backends {
        k8s: Some(session.k8s.clone()),
        releases: Some(releases),
    };

    // in-flight actions are not rolled back on interrupt
    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        std::process::exit(1);
    });

    caravan_flow::connect(
        &mut workflow.stages,
        &backends,
        &session.renderer,
        &workflow.values,
    )
    .into_diagnostic()?;

    let mut values = workflow.values;
    caravan_flow::lint(&mut workflow.stages, &mut values).into_diagnostic()?;

    if workflow.stages.is_empty() {
        bail!("nothing to run");
    }

    let values = Arc::new(values);
    let renderer = session.renderer;

    if options.destroy {
        caravan_flow::reverse(workflow.stages, values, renderer, options.force)
            .await
            .into_diagnostic()?;
        println!("{} workflow destroyed", style("✓").green().bold());
        return Ok(());
    }

    if let Some(target) = &options.until {
        caravan_flow::until(workflow.stages, values, renderer, options.force, target)
            .await
            .into_diagnostic()?;
        println!(
            "{} workflow deployed up to {}",
            style("✓").green().bold(),
            style(target).cyan()
        );
        return Ok(());
    }

    caravan_flow::forward(workflow.stages, values, renderer, options.force)
        .await
        .into_diagnostic()?;
    println!("{} workflow deployed", style("✓").green().bold());
    Ok(())
}

/// Reach the in-cluster release daemon through a port-forward when its
/// pod is present; otherwise the helm client runs against its default
/// configuration.
async fn daemon_client(
    k8s: &K8s,
    options: &Options,
    kube_config: Option<PathBuf>,
) -> Arc<dyn ReleaseClient> {
    let host = match k8s.find_pod(&options.tiller_name, "name=tiller").await {
        Ok(pod) => {
            match k8s
                .forward_pod(&options.tiller_name, &pod, 0, options.tiller_port)
                .await
            {
                Ok(local) => Some(format!("localhost:{}", local)),
                Err(err) => {
                    tracing::warn!(error = %err, "could not forward release daemon");
                    None
                }
            }
        }
        Err(err) => {
            tracing::debug!(error = %err, "release daemon pod not found");
            None
        }
    };

    Arc::new(HelmCli::new(host, options.helm_config.clone(), kube_config))
}
