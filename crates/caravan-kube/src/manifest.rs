//! The manifest resource: a Kubernetes spec with zero or more documents

use futures::future::join_all;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::{GroupVersionKind, TypeMeta};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use serde::Deserialize;

use caravan_core::Values;

use crate::client::K8s;
use crate::error::{KubeError, Result};
use crate::watch;

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "caravan";

/// A Kubernetes resource specification, possibly multi-document.
///
/// The rendered `object` bytes may hold any number of YAML documents
/// separated by `---`; each is decoded and acted on through the dynamic
/// client after discovery resolves its kind.
#[derive(Clone, Default, Deserialize)]
pub struct Manifest {
    /// Target namespace for documents that do not name their own
    #[serde(default)]
    pub namespace: String,

    /// Install / upgrade wait time in seconds
    #[serde(default)]
    pub timeout: u64,

    /// Remove workloads once they have completed
    #[serde(default)]
    pub remove: bool,

    /// Rendered manifest body
    #[serde(skip)]
    object: Vec<u8>,

    #[serde(skip)]
    k8s: Option<K8s>,
}

#[derive(Clone, Copy, PartialEq)]
enum Action {
    Status,
    Apply,
    Delete,
}

impl Manifest {
    /// Validate required fields, filling them from the values cascade
    pub fn lint(&mut self, key: &str, values: &mut Values) -> Result<()> {
        self.namespace = values.cascade(&self.namespace, key, "namespace");
        if self.namespace.is_empty() {
            return Err(KubeError::MissingField {
                key: key.to_string(),
                field: "namespace".to_string(),
            });
        }
        Ok(())
    }

    /// Attach the cluster connection
    pub fn connect(&mut self, k8s: K8s) {
        self.k8s = Some(k8s);
    }

    /// Store the pre-rendered manifest body
    pub fn set_input(&mut self, object: Vec<u8>) {
        self.object = object;
    }

    /// The current manifest body
    pub fn get_input(&self) -> &[u8] {
        &self.object
    }

    /// True when every document in the manifest exists in the cluster
    pub async fn status(&self) -> Result<bool> {
        self.act(Action::Status).await
    }

    /// Apply every document, creating or updating as needed
    pub async fn install_or_upgrade(&self) -> Result<()> {
        self.act(Action::Apply).await?;
        Ok(())
    }

    /// Delete every document; missing objects are not an error
    pub async fn delete(&self) -> Result<()> {
        self.act(Action::Delete).await?;
        Ok(())
    }

    fn k8s(&self) -> Result<&K8s> {
        self.k8s.as_ref().ok_or_else(|| KubeError::NotConnected {
            kind: "Manifest".to_string(),
            name: self.namespace.clone(),
        })
    }

    /// Run one action over all documents concurrently.
    ///
    /// Returns whether every document exists; for apply/delete the first
    /// document error fails the whole manifest, but only after all
    /// in-flight actions finished.
    async fn act(&self, action: Action) -> Result<bool> {
        let k8s = self.k8s()?;
        let discovery = Discovery::new(k8s.client()).run().await?;
        let docs = self.decode(&discovery)?;

        tracing::info!(count = docs.len(), "given {} specification(s)", docs.len());

        let results = join_all(docs.iter().map(|doc| self.execute(doc, action))).await;

        let mut all_exist = true;
        for result in results {
            all_exist &= result?;
        }
        Ok(all_exist)
    }

    /// Split the body on `---` and resolve each document via discovery
    fn decode(&self, discovery: &Discovery) -> Result<Vec<Document>> {
        let body = String::from_utf8_lossy(&self.object);
        let mut docs = Vec::new();

        for (index, raw) in body.split("---").enumerate() {
            let raw = raw.trim();
            if raw.is_empty()
                || raw
                    .lines()
                    .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
            {
                continue;
            }

            docs.push(self.decode_document(raw).map_err(|err| {
                KubeError::InvalidManifest(format!("document {}: {}", index, err))
            })?);
        }

        for doc in &mut docs {
            let (api_resource, capabilities) =
                discovery
                    .resolve_gvk(&doc.gvk)
                    .ok_or_else(|| KubeError::UnknownResourceType {
                        api_version: doc.gvk.api_version(),
                        kind: doc.gvk.kind.clone(),
                    })?;

            if capabilities.scope == Scope::Namespaced && doc.obj.metadata.namespace.is_none() {
                doc.obj.metadata.namespace = Some(self.namespace.clone());
            }

            doc.api_resource = Some(api_resource);
            doc.capabilities = Some(capabilities);
        }

        Ok(docs)
    }

    fn decode_document(&self, raw: &str) -> Result<Document> {
        let obj: DynamicObject = serde_yaml::from_str(raw)
            .map_err(|e| KubeError::InvalidManifest(e.to_string()))?;

        let types = obj.types.clone().ok_or_else(|| {
            KubeError::InvalidManifest("resource missing apiVersion or kind".to_string())
        })?;

        Ok(Document {
            gvk: gvk_from_type_meta(&types),
            obj,
            api_resource: None,
            capabilities: None,
        })
    }

    /// Perform one action against one resolved document
    async fn execute(&self, doc: &Document, action: Action) -> Result<bool> {
        let k8s = self.k8s()?;
        let name = doc.name()?;
        let api = doc.api(k8s);

        match action {
            Action::Status => Ok(api.get_opt(name).await?.is_some()),
            Action::Apply => {
                let exists = api.get_opt(name).await?.is_some();

                let mut params = PatchParams::apply(FIELD_MANAGER);
                params.force = true;
                api.patch(name, &params, &Patch::Apply(&doc.obj)).await?;

                tracing::info!(
                    resource = %doc.display(),
                    "{}",
                    if exists { "configured" } else { "created" }
                );

                self.watch_workload(doc, name).await?;
                Ok(true)
            }
            Action::Delete => {
                match api.delete(name, &DeleteParams::default()).await {
                    Ok(_) => {
                        tracing::info!(resource = %doc.display(), "deleted");
                        Ok(true)
                    }
                    Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
                    Err(err) => Err(KubeError::Api(err)),
                }
            }
        }
    }

    /// Follow Jobs and Pods until they terminate
    async fn watch_workload(&self, doc: &Document, name: &str) -> Result<()> {
        let k8s = self.k8s()?;
        let namespace = doc
            .obj
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(&self.namespace);

        match doc.gvk.kind.as_str() {
            "Job" => {
                tracing::info!(job = %name, "waiting for job");
                watch::wait_job(k8s, namespace, name, self.timeout).await
            }
            "Pod" => {
                tracing::info!(pod = %name, "waiting for pod");
                watch::wait_pod(k8s, namespace, name, self.remove, self.timeout).await
            }
            _ => Ok(()),
        }
    }
}

/// A decoded document, with its API location resolved via discovery
struct Document {
    obj: DynamicObject,
    gvk: GroupVersionKind,
    api_resource: Option<ApiResource>,
    capabilities: Option<ApiCapabilities>,
}

impl Document {
    fn name(&self) -> Result<&str> {
        self.obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| KubeError::InvalidManifest("resource missing metadata.name".to_string()))
    }

    fn display(&self) -> String {
        let name = self.obj.metadata.name.as_deref().unwrap_or("unnamed");
        match &self.obj.metadata.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.gvk.kind, name),
            None => format!("{}/{}", self.gvk.kind, name),
        }
    }

    fn api(&self, k8s: &K8s) -> Api<DynamicObject> {
        let api_resource = self
            .api_resource
            .as_ref()
            .expect("document resolved before use");
        let namespaced = self
            .capabilities
            .as_ref()
            .map(|c| c.scope == Scope::Namespaced)
            .unwrap_or(true);

        if namespaced {
            let ns = self.obj.metadata.namespace.as_deref().unwrap_or("default");
            Api::namespaced_with(k8s.client(), ns, api_resource)
        } else {
            Api::all_with(k8s.client(), api_resource)
        }
    }
}

/// Parse the apiVersion field into group and version:
/// "apps/v1" -> ("apps", "v1"), "v1" -> ("", "v1")
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}
