//! Git HEAD lookup for the `getCommit` template helper

use std::path::Path;
use std::process::Command;

use crate::error::{CoreError, Result};

/// Return the commit id of HEAD for the repository at `path`
pub fn head_commit<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let output = Command::new("git")
        .arg("-C")
        .arg(path)
        .args(["rev-parse", "HEAD"])
        .output()
        .map_err(|err| CoreError::Git {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(CoreError::Git {
            path: path.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
