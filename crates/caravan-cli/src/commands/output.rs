//! Output command - print the layered values

use miette::{bail, IntoDiagnostic, Result};

use super::{session, Globals};

pub async fn run(globals: Globals, to_env: bool) -> Result<()> {
    let session = session(&globals).await?;

    if session.values.is_empty() {
        bail!("no values supplied");
    }

    if to_env {
        session.values.to_env("");
    } else {
        let out = serde_json::to_string(&session.values.0).into_diagnostic()?;
        println!("{}", out);
    }

    Ok(())
}
