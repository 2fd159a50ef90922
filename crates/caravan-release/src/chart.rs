//! The chart resource: a release managed through the daemon

use std::sync::Arc;

use serde::Deserialize;

use caravan_core::Values;

use crate::client::{InstallRequest, ReleaseClient, ReleaseStatus};
use crate::error::{ReleaseError, Result};
use crate::fetch::ChartFetcher;
use crate::DELETE_TIMEOUT;

/// A chart release.
///
/// `name` is either `repo/app` or a local chart directory; the rendered
/// `object` bytes are handed to the daemon as value overrides.
#[derive(Clone, Default, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub release: String,

    #[serde(default)]
    pub namespace: String,

    /// Install / upgrade wait time in seconds
    #[serde(default)]
    pub timeout: u64,

    #[serde(skip)]
    object: Vec<u8>,

    #[serde(skip)]
    client: Option<Arc<dyn ReleaseClient>>,
}

impl Chart {
    /// Validate required fields, filling them from the values cascade
    pub fn lint(&mut self, key: &str, values: &mut Values) -> Result<()> {
        if self.name.is_empty() {
            return Err(ReleaseError::MissingField {
                key: key.to_string(),
                field: "name".to_string(),
            });
        }
        self.namespace = values.cascade(&self.namespace, key, "namespace");
        if self.namespace.is_empty() {
            return Err(ReleaseError::MissingField {
                key: key.to_string(),
                field: "namespace".to_string(),
            });
        }
        self.release = values.cascade(&self.release, key, "release");
        if self.release.is_empty() {
            return Err(ReleaseError::MissingField {
                key: key.to_string(),
                field: "release".to_string(),
            });
        }
        self.version = values.cascade(&self.version, key, "version");
        Ok(())
    }

    /// Attach the shared daemon connection
    pub fn connect(&mut self, client: Arc<dyn ReleaseClient>) {
        self.client = Some(client);
    }

    /// Store the rendered value overrides
    pub fn set_input(&mut self, object: Vec<u8>) {
        self.object = object;
    }

    /// The current value overrides
    pub fn get_input(&self) -> &[u8] {
        &self.object
    }

    fn client(&self) -> Result<&Arc<dyn ReleaseClient>> {
        self.client.as_ref().ok_or_else(|| ReleaseError::NotConnected {
            release: self.release.clone(),
        })
    }

    /// Whether the release exists in a usable state.
    ///
    /// A release stuck in `pending-install`, or whose first revision
    /// `failed`, is purged and reported as absent so a fresh install can
    /// proceed.
    pub async fn status(&self) -> Result<bool> {
        let client = self.client()?;
        let Some(state) = client.status(&self.release).await? else {
            return Ok(false);
        };

        match state.status {
            ReleaseStatus::PendingInstall => {
                tracing::info!(release = %self.release, "purging stuck pending install");
                client.delete(&self.release, DELETE_TIMEOUT).await?;
                Ok(false)
            }
            ReleaseStatus::Failed if state.revision <= 1 => {
                tracing::info!(release = %self.release, "purging failed first release");
                client.delete(&self.release, DELETE_TIMEOUT).await?;
                Ok(false)
            }
            ReleaseStatus::Deleted => Ok(false),
            _ => Ok(true),
        }
    }

    /// Install the release if absent, upgrade it otherwise
    pub async fn install_or_upgrade(&self) -> Result<()> {
        let fetcher = ChartFetcher::new()?;
        let version = (!self.version.is_empty()).then_some(self.version.as_str());
        let chart = fetcher.fetch(&self.name, version).await?;

        let request = InstallRequest {
            chart,
            release: self.release.clone(),
            namespace: self.namespace.clone(),
            timeout: self.timeout,
            overrides: self.object.clone(),
        };

        let client = self.client()?;
        if self.status().await? {
            tracing::info!(release = %self.release, "upgrading release");
            client.upgrade(&request).await?;
            tracing::info!(release = %self.release, "release upgraded");
        } else {
            tracing::info!(release = %self.release, "installing release");
            client.install(&request).await?;
            tracing::info!(release = %self.release, "release installed");
        }
        Ok(())
    }

    /// Purge the release with the fixed delete timeout
    pub async fn delete(&self) -> Result<()> {
        tracing::info!(release = %self.release, "deleting release");
        self.client()?.delete(&self.release, DELETE_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FakeReleaseClient;

    fn chart_with(client: Arc<dyn ReleaseClient>) -> Chart {
        let mut chart = Chart {
            name: "stable/burrow".to_string(),
            release: "test-release".to_string(),
            namespace: "test".to_string(),
            timeout: 300,
            ..Default::default()
        };
        chart.connect(client);
        chart
    }

    #[test]
    fn test_lint_fills_fields() {
        let mut values = Values::from_yaml("namespace: default\nrelease: api").unwrap();
        let mut chart = Chart {
            name: "stable/burrow".to_string(),
            ..Default::default()
        };

        chart.lint("api", &mut values).unwrap();
        assert_eq!(chart.namespace, "default");
        assert_eq!(chart.release, "api");
        // resolved fields are visible to later cascade lookups
        assert_eq!(values.get("api.namespace").unwrap(), "default");
    }

    #[test]
    fn test_lint_missing_release() {
        let mut values = Values::from_yaml("namespace: default").unwrap();
        let mut chart = Chart {
            name: "stable/burrow".to_string(),
            ..Default::default()
        };

        let err = chart.lint("api", &mut values).unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::MissingField { ref field, .. } if field == "release"
        ));
    }

    #[tokio::test]
    async fn test_status_absent() {
        let client = Arc::new(FakeReleaseClient::new());
        let chart = chart_with(client);
        assert!(!chart.status().await.unwrap());
    }

    #[tokio::test]
    async fn test_status_purges_pending_install() {
        let client = Arc::new(FakeReleaseClient::new());
        client.seed("test-release", ReleaseStatus::PendingInstall, 1);

        let chart = chart_with(client.clone());
        assert!(!chart.status().await.unwrap());

        // the stuck release was purged before reporting absence
        let ops = client.operations();
        assert_eq!(ops, vec![("delete".to_string(), "test-release".to_string())]);
        assert!(client.status("test-release").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_purges_failed_first_release() {
        let client = Arc::new(FakeReleaseClient::new());
        client.seed("test-release", ReleaseStatus::Failed, 1);

        let chart = chart_with(client.clone());
        assert!(!chart.status().await.unwrap());
        assert_eq!(client.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_status_keeps_failed_upgrade() {
        let client = Arc::new(FakeReleaseClient::new());
        client.seed("test-release", ReleaseStatus::Failed, 4);

        let chart = chart_with(client.clone());
        // a failed upgrade is still an existing release
        assert!(chart.status().await.unwrap());
        assert!(client.operations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_uses_purge_timeout() {
        let client = Arc::new(FakeReleaseClient::new());
        client.seed("test-release", ReleaseStatus::Deployed, 2);

        let chart = chart_with(client.clone());
        chart.delete().await.unwrap();
        assert!(client.status("test-release").await.unwrap().is_none());
    }
}
