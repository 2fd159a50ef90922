//! Image digest lookup over the OCI distribution API

use base64::Engine as _;
use oci_distribution::client::{Client, ClientConfig};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;

use crate::error::{RegistryError, Result};

/// Fetch the manifest digest for an image reference (`server/app:tag`).
///
/// Credentials come from `~/.docker/config.json` when the registry has
/// an entry there; everything else goes anonymous.
pub async fn fetch_digest(reference: &str) -> Result<String> {
    let parsed: Reference = reference.parse().map_err(|err| {
        RegistryError::InvalidReference {
            reference: reference.to_string(),
            message: format!("{}", err),
        }
    })?;

    let auth = docker_auth(parsed.registry()).unwrap_or(RegistryAuth::Anonymous);
    let client = Client::new(ClientConfig::default());

    client
        .fetch_manifest_digest(&parsed, &auth)
        .await
        .map_err(|err| RegistryError::Digest {
            reference: reference.to_string(),
            message: err.to_string(),
        })
}

/// Read basic credentials for a registry from the docker config file
fn docker_auth(registry: &str) -> Option<RegistryAuth> {
    let home = dirs::home_dir()?;
    let content = std::fs::read_to_string(home.join(".docker").join("config.json")).ok()?;
    parse_docker_auth(&content, registry)
}

fn parse_docker_auth(config: &str, registry: &str) -> Option<RegistryAuth> {
    let config: serde_json::Value = serde_json::from_str(config).ok()?;
    let encoded = config
        .get("auths")?
        .get(registry)?
        .get("auth")?
        .as_str()?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, password) = credentials.split_once(':')?;

    Some(RegistryAuth::Basic(
        username.to_string(),
        password.to_string(),
    ))
}
