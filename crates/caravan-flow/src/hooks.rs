//! Shell hook execution for stage jobs

use tokio::process::Command;

use crate::error::{FlowError, Result};

/// Run each command in order with the stage's values exported.
///
/// Commands are tokenized on whitespace. The exported pairs sit under
/// the inherited environment, so variables already present in the
/// process win over exported values. The first non-zero exit aborts.
pub async fn run(env: &[String], jobs: &[String]) -> Result<()> {
    for command in jobs {
        tracing::info!(command = %command, "running job");

        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            continue;
        };

        let mut cmd = Command::new(program);
        cmd.args(parts);
        for pair in env {
            if let Some((key, value)) = pair.split_once('=') {
                if std::env::var_os(key).is_none() {
                    cmd.env(key, value);
                }
            }
        }

        let output = cmd.output().await.map_err(|err| FlowError::Hook {
            command: command.clone(),
            message: err.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            tracing::info!(command = %command, "{}", line);
        }

        if !output.status.success() {
            return Err(FlowError::Hook {
                command: command.clone(),
                message: format!(
                    "exit status {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let jobs = vec!["echo hello".to_string(), "true".to_string()];
        run(&[], &jobs).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_job_aborts() {
        let jobs = vec!["false".to_string(), "echo never".to_string()];
        let err = run(&[], &jobs).await.unwrap_err();
        assert!(matches!(err, FlowError::Hook { ref command, .. } if command == "false"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let jobs = vec!["caravan-no-such-binary".to_string()];
        assert!(run(&[], &jobs).await.is_err());
    }

    #[tokio::test]
    async fn test_values_exported_to_environment() {
        let env = vec!["CARAVAN_HOOK_CHECK=yes".to_string()];
        let jobs = vec!["printenv CARAVAN_HOOK_CHECK".to_string()];
        run(&env, &jobs).await.unwrap();
    }
}
