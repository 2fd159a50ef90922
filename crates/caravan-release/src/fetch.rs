//! Chart repository resolution and the local archive cache

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use caravan_core::is_dir;

use crate::error::{ReleaseError, Result};

/// Where a chart comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ChartSource {
    /// A chart directory on disk, loaded as-is
    Local(PathBuf),
    /// `repo/app`: fetched from a configured repository
    Remote { repo: String, chart: String },
}

impl ChartSource {
    /// Interpret a stage's `name` field.
    ///
    /// An existing directory wins; otherwise the name must be
    /// `repo/app`.
    pub fn parse(name: &str) -> Result<Self> {
        if is_dir(name) {
            return Ok(Self::Local(PathBuf::from(name)));
        }

        match name.split_once('/') {
            Some((repo, chart)) if !repo.is_empty() && !chart.is_empty() => Ok(Self::Remote {
                repo: repo.to_string(),
                chart: chart.to_string(),
            }),
            _ => Err(ReleaseError::InvalidReference {
                name: name.to_string(),
                message: "expected a chart directory or 'repo/app'".to_string(),
            }),
        }
    }
}

/// Configured chart repositories (`~/.caravan/repositories.yaml`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
}

impl RepositoryConfig {
    /// Load from the default location; absence means no repositories
    pub fn load() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn url_for(&self, name: &str) -> Result<&str> {
        self.repositories
            .iter()
            .find(|repo| repo.name == name)
            .map(|repo| repo.url.as_str())
            .ok_or_else(|| ReleaseError::RepositoryNotFound {
                name: name.to_string(),
            })
    }
}

/// A repository's `index.yaml`
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryIndex {
    #[serde(default)]
    pub entries: IndexMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl RepositoryIndex {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }

    /// Pick a chart entry: an explicit version must match exactly,
    /// otherwise the highest parseable semver wins
    pub fn select(&self, chart: &str, version: Option<&str>) -> Option<&IndexEntry> {
        let versions = self.entries.get(chart)?;

        match version {
            Some(wanted) => versions.iter().find(|entry| entry.version == wanted),
            None => versions.iter().max_by_key(|entry| {
                semver::Version::parse(&entry.version)
                    .unwrap_or_else(|_| semver::Version::new(0, 0, 0))
            }),
        }
    }
}

/// Resolves chart names against repositories, caching downloads.
pub struct ChartFetcher {
    config: RepositoryConfig,
    cache_dir: PathBuf,
}

impl ChartFetcher {
    /// Fetcher over `~/.caravan/archive`
    pub fn new() -> Result<Self> {
        let cache_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".caravan")
            .join("archive");
        Ok(Self {
            config: RepositoryConfig::load()?,
            cache_dir,
        })
    }

    /// Fetcher with explicit config and cache locations
    pub fn with_config(config: RepositoryConfig, cache_dir: PathBuf) -> Self {
        Self { config, cache_dir }
    }

    /// Resolve a chart name to a local path, downloading if needed.
    ///
    /// Local directories pass straight through; remote charts land in
    /// the archive cache and are reused on later runs.
    pub async fn fetch(&self, name: &str, version: Option<&str>) -> Result<PathBuf> {
        let (repo, chart) = match ChartSource::parse(name)? {
            ChartSource::Local(path) => return Ok(path),
            ChartSource::Remote { repo, chart } => (repo, chart),
        };

        let base = self.config.url_for(&repo)?.trim_end_matches('/').to_string();
        let index_url = format!("{}/index.yaml", base);
        let data = download(&index_url).await?;
        let index = RepositoryIndex::from_bytes(&data)?;

        let entry = index
            .select(&chart, version)
            .ok_or_else(|| ReleaseError::ChartNotFound {
                chart: chart.clone(),
                repo: repo.clone(),
            })?;
        let url = entry
            .urls
            .first()
            .ok_or_else(|| ReleaseError::ChartNotFound {
                chart: chart.clone(),
                repo: repo.clone(),
            })?;
        let url = if url.contains("://") {
            url.clone()
        } else {
            format!("{}/{}", base, url)
        };

        std::fs::create_dir_all(&self.cache_dir)?;
        let archive = self
            .cache_dir
            .join(format!("{}-{}.tgz", chart, entry.version));
        if archive.exists() {
            tracing::debug!(chart = %chart, "using cached archive");
            return Ok(archive);
        }

        tracing::info!(chart = %chart, version = %entry.version, "downloading chart");
        let body = download(&url).await?;
        std::fs::write(&archive, body)?;
        Ok(archive)
    }
}

async fn download(url: &str) -> Result<Vec<u8>> {
    let response = reqwest::get(url)
        .await?
        .error_for_status()
        .map_err(|err| ReleaseError::Download {
            url: url.to_string(),
            message: err.to_string(),
        })?;
    Ok(response.bytes().await?.to_vec())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".caravan").join("repositories.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_source_parse() {
        let dir = tempfile::tempdir().unwrap();
        let local = ChartSource::parse(dir.path().to_str().unwrap()).unwrap();
        assert!(matches!(local, ChartSource::Local(_)));

        let remote = ChartSource::parse("stable/burrow").unwrap();
        assert_eq!(
            remote,
            ChartSource::Remote {
                repo: "stable".to_string(),
                chart: "burrow".to_string(),
            }
        );

        assert!(ChartSource::parse("no-slash-no-dir").is_err());
        assert!(ChartSource::parse("/trailing").is_err());
    }

    #[test]
    fn test_index_select() {
        let index = RepositoryIndex::from_bytes(
            br#"
entries:
  burrow:
    - version: "1.2.0"
      urls: ["burrow-1.2.0.tgz"]
    - version: "2.0.1"
      urls: ["burrow-2.0.1.tgz"]
    - version: "2.0.0"
      urls: ["burrow-2.0.0.tgz"]
"#,
        )
        .unwrap();

        assert_eq!(index.select("burrow", None).unwrap().version, "2.0.1");
        assert_eq!(
            index.select("burrow", Some("1.2.0")).unwrap().version,
            "1.2.0"
        );
        assert!(index.select("burrow", Some("9.9.9")).is_none());
        assert!(index.select("missing", None).is_none());
    }

    #[test]
    fn test_repository_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.yaml");
        std::fs::write(
            &path,
            "repositories:\n  - name: stable\n    url: https://charts.example.com/stable\n",
        )
        .unwrap();

        let config = RepositoryConfig::load_from(&path).unwrap();
        assert_eq!(
            config.url_for("stable").unwrap(),
            "https://charts.example.com/stable"
        );
        assert!(config.url_for("missing").is_err());
    }
}
