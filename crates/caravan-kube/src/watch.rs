//! Watches that follow Jobs and Pods to a terminal phase

use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, PropagationPolicy};
use kube::runtime::wait::{await_condition, Condition};

use crate::client::K8s;
use crate::error::{KubeError, Result};

/// Wait for a Job to finish, then remove it with foreground propagation.
///
/// On failure the logs of the job's pod are folded into the error so the
/// operator sees why the deploy died without chasing the pod themselves.
pub async fn wait_job(k8s: &K8s, namespace: &str, name: &str, timeout: u64) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(k8s.client(), namespace);

    let condition = await_condition(jobs.clone(), name, is_job_finished());
    let outcome = match tokio::time::timeout(Duration::from_secs(timeout), condition).await {
        Err(_) => Err(KubeError::WatchTimeout {
            kind: "Job".to_string(),
            name: name.to_string(),
            seconds: timeout,
        }),
        Ok(Err(err)) => Err(KubeError::WatchFailed {
            kind: "Job".to_string(),
            name: name.to_string(),
            message: err.to_string(),
        }),
        Ok(Ok(job)) => {
            let failed = job
                .as_ref()
                .and_then(|j| j.status.as_ref())
                .and_then(|s| s.failed)
                .unwrap_or(0);

            if failed > 0 {
                // pods disappear with the job, grab logs first
                let logs = job_logs(k8s, namespace, name).await.unwrap_or_default();
                Err(KubeError::WorkloadFailed {
                    kind: "Job".to_string(),
                    name: name.to_string(),
                    logs,
                })
            } else {
                Ok(())
            }
        }
    };

    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Foreground),
        ..Default::default()
    };
    if let Err(err) = jobs.delete(name, &params).await {
        tracing::warn!(job = %name, error = %err, "failed to clean up job");
    }

    outcome
}

/// Wait for a Pod to reach a terminal phase.
///
/// `Succeeded` completes the wait (and deletes the pod when `remove` is
/// set); `Failed` and `Unknown` surface the pod's logs as the error.
pub async fn wait_pod(
    k8s: &K8s,
    namespace: &str,
    name: &str,
    remove: bool,
    timeout: u64,
) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(k8s.client(), namespace);

    let condition = await_condition(pods.clone(), name, is_pod_finished());
    let pod = match tokio::time::timeout(Duration::from_secs(timeout), condition).await {
        Err(_) => {
            return Err(KubeError::WatchTimeout {
                kind: "Pod".to_string(),
                name: name.to_string(),
                seconds: timeout,
            });
        }
        Ok(Err(err)) => {
            return Err(KubeError::WatchFailed {
                kind: "Pod".to_string(),
                name: name.to_string(),
                message: err.to_string(),
            });
        }
        Ok(Ok(pod)) => pod,
    };

    let phase = pod
        .as_ref()
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.clone())
        .unwrap_or_default();

    if phase == "Succeeded" {
        if remove {
            pods.delete(name, &DeleteParams::default()).await?;
        }
        return Ok(());
    }

    let logs = k8s.pod_logs(namespace, name).await.unwrap_or_default();
    Err(KubeError::WorkloadFailed {
        kind: "Pod".to_string(),
        name: name.to_string(),
        logs,
    })
}

/// Logs of the pod backing a job, located through the job-name label
async fn job_logs(k8s: &K8s, namespace: &str, job: &str) -> Result<String> {
    let pod = k8s
        .find_pod(namespace, &format!("job-name={}", job))
        .await?;
    k8s.pod_logs(namespace, &pod).await
}

fn is_job_finished() -> impl Condition<Job> {
    |obj: Option<&Job>| {
        obj.and_then(|job| job.status.as_ref())
            .map(|status| status.succeeded.unwrap_or(0) > 0 || status.failed.unwrap_or(0) > 0)
            .unwrap_or(false)
    }
}

fn is_pod_finished() -> impl Condition<Pod> {
    |obj: Option<&Pod>| {
        obj.and_then(|pod| pod.status.as_ref())
            .and_then(|status| status.phase.as_deref())
            .map(|phase| matches!(phase, "Succeeded" | "Failed" | "Unknown"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_status(succeeded: i32, failed: i32) -> Job {
        let mut job = Job::default();
        job.status = Some(k8s_openapi::api::batch::v1::JobStatus {
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        });
        job
    }

    fn pod_with_phase(phase: &str) -> Pod {
        let mut pod = Pod::default();
        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        pod
    }

    #[test]
    fn test_job_terminal_condition() {
        let cond = is_job_finished();
        assert!(cond.matches_object(Some(&job_with_status(1, 0))));
        assert!(cond.matches_object(Some(&job_with_status(0, 1))));
        assert!(!cond.matches_object(Some(&job_with_status(0, 0))));
        assert!(!cond.matches_object(Some(&Job::default())));
        assert!(!cond.matches_object(None));
    }

    #[test]
    fn test_pod_terminal_condition() {
        let cond = is_pod_finished();
        assert!(cond.matches_object(Some(&pod_with_phase("Succeeded"))));
        assert!(cond.matches_object(Some(&pod_with_phase("Failed"))));
        assert!(cond.matches_object(Some(&pod_with_phase("Unknown"))));
        assert!(!cond.matches_object(Some(&pod_with_phase("Running"))));
        assert!(!cond.matches_object(None));
    }
}
