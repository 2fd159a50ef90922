//! Kube command - template and deploy a single manifest

use std::path::Path;

use console::style;
use miette::{IntoDiagnostic, Result};

use caravan_kube::Manifest;

use super::{session, Globals};

pub async fn run(globals: Globals, spec: &Path, namespace: &str) -> Result<()> {
    let session = session(&globals).await?;

    let out = session
        .renderer
        .render_file(spec, &session.values)
        .into_diagnostic()?;

    let mut manifest = Manifest::default();
    manifest.namespace = namespace.to_string();
    manifest.timeout = 300;
    manifest.set_input(out);
    manifest.connect(session.k8s);

    manifest.install_or_upgrade().await.into_diagnostic()?;

    println!("{} deployed successfully", style("✓").green().bold());
    Ok(())
}
