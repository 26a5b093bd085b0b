//! Best-effort exposed-port lookup. Nothing here can fail a request: the
//! result is `Some(ports)` or `None`, and every error is logged and dropped.

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::RawManifest;
use super::size::{ManifestShape, manifest_shape};
use crate::inspector::{Access, InspectMode, Inspector, InvocationOutcome};
use crate::reference::ImageReference;
use crate::registry::{self, BlobFetcher, FetchError};

/// Protocol-qualified ports such as `80/tcp`, sorted.
pub type PortSet = BTreeSet<String>;

/// Where `ExposedPorts` can live in an image config, most specific first.
const EXPOSED_PORTS_PATHS: &[&[&str]] = &[
    &["config", "ExposedPorts"],
    &["container_config", "ExposedPorts"],
    &["ExposedPorts"],
];

#[derive(Debug, Error)]
pub enum PortError {
    #[error("config inspection failed: {0}")]
    ConfigInspection(String),

    #[error("raw manifest unavailable")]
    NoManifest,

    #[error("raw manifest carries no config digest")]
    NoConfigDigest,

    #[error("config blob fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("config blob does not match digest {0}")]
    DigestMismatch(String),

    #[error("config blob is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Keys of the first non-empty `ExposedPorts` mapping in `config`.
pub fn exposed_ports(config: &Value) -> PortSet {
    EXPOSED_PORTS_PATHS
        .iter()
        .filter_map(|path| {
            path.iter()
                .try_fold(config, |node, key| node.get(key))
                .and_then(Value::as_object)
        })
        .find(|ports| !ports.is_empty())
        .map(|ports| ports.keys().cloned().collect())
        .unwrap_or_default()
}

/// `config.digest` of a descriptor-style manifest.
pub fn config_digest(raw: &Value) -> Option<&str> {
    if manifest_shape(raw) != ManifestShape::Descriptors {
        return None;
    }
    raw.get("config")?.get("digest")?.as_str()
}

/// Walk the fallback chain: config inspection, then config blob from the
/// registry. `Some(empty)` means the image exposes nothing; `None` means
/// every step failed.
pub async fn resolve(
    inspector: &dyn Inspector,
    fetcher: &dyn BlobFetcher,
    reference: &ImageReference,
    access: &Access,
    raw: &RawManifest<'_>,
) -> Option<PortSet> {
    let image = reference.to_string();
    let mut answered = false;

    match from_config_inspection(inspector, &image, access).await {
        Ok(ports) if !ports.is_empty() => return Some(ports),
        Ok(_) => answered = true,
        Err(e) => debug!(%image, error = %e, "config inspection gave no ports"),
    }

    match from_config_blob(fetcher, reference, access, raw).await {
        Ok(ports) if !ports.is_empty() => return Some(ports),
        Ok(_) => answered = true,
        Err(e) => debug!(%image, error = %e, "config blob gave no ports"),
    }

    if answered {
        Some(PortSet::new())
    } else {
        warn!(%image, "port resolution failed, reporting no exposed ports");
        None
    }
}

async fn from_config_inspection(
    inspector: &dyn Inspector,
    image: &str,
    access: &Access,
) -> Result<PortSet, PortError> {
    match inspector.inspect(image, InspectMode::Config, access).await {
        InvocationOutcome::Success(config) => Ok(exposed_ports(&config)),
        InvocationOutcome::AuthOrNotFound(msg) | InvocationOutcome::OtherFailure(msg) => {
            Err(PortError::ConfigInspection(msg))
        }
    }
}

async fn from_config_blob(
    fetcher: &dyn BlobFetcher,
    reference: &ImageReference,
    access: &Access,
    raw: &RawManifest<'_>,
) -> Result<PortSet, PortError> {
    let manifest = raw.get().await.ok_or(PortError::NoManifest)?;
    let digest = config_digest(manifest).ok_or(PortError::NoConfigDigest)?;

    let url = registry::blob_url(reference, digest);
    debug!(%url, "fetching config blob");
    let bytes = fetcher
        .fetch(&url, access.credentials.as_ref(), access.proxy.as_deref())
        .await?;
    if !registry::digest_matches(&bytes, digest) {
        return Err(PortError::DigestMismatch(digest.to_string()));
    }

    let config: Value = serde_json::from_slice(&bytes)?;
    Ok(exposed_ports(&config))
}
