//! Shared handle on the typed and dynamic Kubernetes clients

use std::path::Path;

use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::error::{KubeError, Result};

/// A connection to Kubernetes, shared by every stage in a workflow.
///
/// `kube::Client` multiplexes typed and dynamic access over one
/// connection pool and is safe to clone across workers.
#[derive(Clone)]
pub struct K8s {
    client: Client,
}

impl K8s {
    /// Connect using the given kubeconfig, falling back to the standard
    /// resolution (in-cluster first, then `$HOME/.kube/config`)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path)
                    .map_err(|e| KubeError::Config(e.to_string()))?;
                let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| KubeError::Config(e.to_string()))?;
                Client::try_from(config)?
            }
            None => Client::try_default()
                .await
                .map_err(|e| KubeError::Config(e.to_string()))?,
        };

        Ok(Self { client })
    }

    /// Wrap an already constructed client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// The namespace the client defaults to
    pub fn default_namespace(&self) -> String {
        self.client.default_namespace().to_string()
    }

    /// Read an entry from a ConfigMap
    pub async fn from_config_map(&self, name: &str, namespace: &str, key: &str) -> Result<String> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = api.get(name).await?;
        cm.data
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
            .ok_or_else(|| KubeError::KeyNotFound {
                kind: "ConfigMap".to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })
    }

    /// Read an entry from a Secret, decoded to a string
    pub async fn from_secret(&self, name: &str, namespace: &str, key: &str) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).to_string())
            .ok_or_else(|| KubeError::KeyNotFound {
                kind: "Secret".to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })
    }

    /// Find the first pod in a namespace matching a label selector
    pub async fn find_pod(&self, namespace: &str, label: &str) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(label)).await?;

        pods.items
            .first()
            .and_then(|pod| pod.metadata.name.clone())
            .ok_or_else(|| KubeError::PodNotFound {
                namespace: namespace.to_string(),
                label: label.to_string(),
            })
    }

    /// Fetch the full logs of a pod
    pub async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.logs(name, &LogParams::default()).await?)
    }

    /// Forward a local TCP port to a pod, returning the bound local port.
    ///
    /// Pass `local = 0` to pick an ephemeral port. Each accepted
    /// connection opens its own forward; the listener lives until the
    /// process exits.
    pub async fn forward_pod(
        &self,
        namespace: &str,
        name: &str,
        local: u16,
        remote: u16,
    ) -> Result<u16> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", local)).await?;
        let port = listener.local_addr()?.port();
        let name = name.to_string();

        tokio::spawn(async move {
            loop {
                let Ok((mut conn, _)) = listener.accept().await else {
                    break;
                };
                let pods = pods.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    match pods.portforward(&name, &[remote]).await {
                        Ok(mut forwarder) => {
                            if let Some(mut upstream) = forwarder.take_stream(remote) {
                                let _ = tokio::io::copy_bidirectional(&mut conn, &mut upstream)
                                    .await;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(pod = %name, error = %err, "port-forward failed");
                        }
                    }
                });
            }
        });

        Ok(port)
    }
}
