//! The resolution pipeline behind every data endpoint: normalize, inspect,
//! resolve sizes and ports, assemble the payload, and cache it.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::cache::{self, CacheBackend, InFlight, KeyParams, key};
use crate::config::Config;
use crate::error::ApiError;
use crate::inspector::{Access, InspectMode, Inspector, InvocationOutcome, SkopeoInspector};
use crate::reference::{self, ImageReference};
use crate::registry::{BlobFetcher, HttpBlobFetcher};
use crate::resolve::{self, PortSet, RawManifest, SizeRecord, ports};

/// Cached data endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ImageInfo,
    ImageSize,
    ImageTags,
    TagInfo,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::ImageInfo => "image-info",
            Endpoint::ImageSize => "image-size",
            Endpoint::ImageTags => "image-tags",
            Endpoint::TagInfo => "tag-info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Per-request parameters, exactly as the caller sent them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lookup<'a> {
    pub image: Option<&'a str>,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub proxy: Option<&'a str>,
}

impl Lookup<'_> {
    fn key_params(&self) -> KeyParams<'_> {
        KeyParams {
            image: self.image.map(str::trim),
            username: self.username,
            proxy: self.proxy,
        }
    }
}

pub struct ImageService {
    config: Arc<Config>,
    inspector: Arc<dyn Inspector>,
    fetcher: Arc<dyn BlobFetcher>,
    cache: Arc<dyn CacheBackend>,
    flights: InFlight,
}

impl ImageService {
    pub fn new(
        config: Arc<Config>,
        inspector: Arc<dyn Inspector>,
        fetcher: Arc<dyn BlobFetcher>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            config,
            inspector,
            fetcher,
            cache,
            flights: InFlight::new(),
        }
    }

    /// Wire up skopeo, the HTTP blob fetcher and the configured cache.
    pub fn from_config(config: Arc<Config>) -> Self {
        let inspector = Arc::new(SkopeoInspector::new(
            config.inspector_cmd.clone(),
            config.inspect_timeout,
        ));
        let fetcher = Arc::new(HttpBlobFetcher::new(config.fetch_timeout));
        let cache = cache::build(
            config.cache_type,
            config.cache_ttl,
            config.cache_max_entries,
        );
        info!(
            inspector = %config.inspector_cmd,
            cache = cache.name(),
            ttl_secs = config.cache_ttl.as_secs(),
            "image service ready"
        );
        Self::new(config, inspector, fetcher, cache)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &dyn CacheBackend {
        self.cache.as_ref()
    }

    /// Serve `endpoint` from cache, or resolve and populate it. Concurrent
    /// misses on one key wait for a single resolution. Failures are never
    /// cached.
    pub async fn lookup(
        &self,
        endpoint: Endpoint,
        lookup: &Lookup<'_>,
    ) -> Result<(Value, CacheStatus), ApiError> {
        let reference = parse_for(endpoint, lookup.image)?;
        let key = key::scoped(endpoint.as_str(), &lookup.key_params());

        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "cache hit");
            return Ok((hit, CacheStatus::Hit));
        }

        let _flight = self.flights.acquire(&key).await;
        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "cache hit after waiting on in-flight resolution");
            return Ok((hit, CacheStatus::Hit));
        }

        debug!(%key, "cache miss");
        let access = self
            .config
            .access(lookup.username, lookup.password, lookup.proxy);
        let payload = self.resolve(endpoint, &reference, &access).await?;
        self.cache.set(&key, payload.clone());
        Ok((payload, CacheStatus::Miss))
    }

    /// Uncached resolution.
    pub async fn resolve(
        &self,
        endpoint: Endpoint,
        reference: &ImageReference,
        access: &Access,
    ) -> Result<Value, ApiError> {
        match endpoint {
            Endpoint::ImageInfo => self.image_info(reference, access).await,
            Endpoint::ImageSize => self.image_size(reference, access).await,
            Endpoint::ImageTags => self.image_tags(reference, access).await,
            Endpoint::TagInfo => self.tag_info(reference, access).await,
        }
    }

    /// Sizes, exposed ports and the raw inspection document.
    pub async fn image_info(
        &self,
        reference: &ImageReference,
        access: &Access,
    ) -> Result<Value, ApiError> {
        let image = reference.to_string();
        let doc = self.inspect(&image, access).await?;

        let raw = RawManifest::new(self.inspector.as_ref(), &image, access);
        let sizes = resolve::size_record(&doc, &raw).await;
        let exposed = self.exposed_ports(reference, access, &raw).await;

        let mut payload = envelope(&image);
        payload.extend(size_fields(&sizes));
        payload.insert("exposed_ports".into(), ports_value(exposed));
        payload.insert("raw_data".into(), doc);
        Ok(Value::Object(payload))
    }

    pub async fn image_size(
        &self,
        reference: &ImageReference,
        access: &Access,
    ) -> Result<Value, ApiError> {
        let image = reference.to_string();
        let doc = self.inspect(&image, access).await?;

        let raw = RawManifest::new(self.inspector.as_ref(), &image, access);
        let sizes = resolve::size_record(&doc, &raw).await;

        let mut payload = envelope(&image);
        payload.extend(size_fields(&sizes));
        Ok(Value::Object(payload))
    }

    pub async fn image_tags(
        &self,
        reference: &ImageReference,
        access: &Access,
    ) -> Result<Value, ApiError> {
        let repository = reference.repository_path();
        let outcome = self.inspector.list_tags(&repository, access).await;
        let doc = into_document(&repository, outcome)?;

        let tags: Vec<Value> = doc
            .get("Tags")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut payload = envelope(&repository);
        payload.insert("count".into(), json!(tags.len()));
        payload.insert("tags".into(), Value::Array(tags));
        Ok(Value::Object(payload))
    }

    /// Sizes plus a handful of config fields for one explicit tag.
    pub async fn tag_info(
        &self,
        reference: &ImageReference,
        access: &Access,
    ) -> Result<Value, ApiError> {
        let image = reference.to_string();
        let doc = self.inspect(&image, access).await?;

        let raw = RawManifest::new(self.inspector.as_ref(), &image, access);
        let sizes = resolve::size_record(&doc, &raw).await;
        let exposed = self.exposed_ports(reference, access, &raw).await;

        let field = |name: &str| doc.get(name).cloned().unwrap_or(Value::Null);
        let layers_count = ["LayersData", "Layers"]
            .iter()
            .find_map(|k| doc.get(*k).and_then(Value::as_array))
            .map_or(0, Vec::len);

        let mut payload = envelope(&image);
        payload.insert("tag".into(), json!(reference.tag));
        payload.extend(size_fields(&sizes));
        payload.insert("created".into(), field("Created"));
        payload.insert("architecture".into(), field("Architecture"));
        payload.insert("os".into(), field("Os"));
        payload.insert(
            "env".into(),
            doc.get("Env").cloned().unwrap_or_else(|| json!([])),
        );
        payload.insert("layers_count".into(), json!(layers_count));
        payload.insert("digest".into(), field("Digest"));
        payload.insert("exposed_ports".into(), ports_value(exposed));
        Ok(Value::Object(payload))
    }

    async fn inspect(&self, image: &str, access: &Access) -> Result<Value, ApiError> {
        let outcome = self
            .inspector
            .inspect(image, InspectMode::Standard, access)
            .await;
        into_document(image, outcome)
    }

    async fn exposed_ports(
        &self,
        reference: &ImageReference,
        access: &Access,
        raw: &RawManifest<'_>,
    ) -> Option<PortSet> {
        ports::resolve(
            self.inspector.as_ref(),
            self.fetcher.as_ref(),
            reference,
            access,
            raw,
        )
        .await
    }
}

/// Validate and normalize the `image` parameter for `endpoint`. No external
/// calls happen before this succeeds.
fn parse_for(endpoint: Endpoint, image: Option<&str>) -> Result<ImageReference, ApiError> {
    let raw = image.unwrap_or_default();
    let reference = ImageReference::parse(raw)?;
    if endpoint == Endpoint::TagInfo
        && reference.digest.is_none()
        && !reference::has_explicit_tag(raw)
    {
        return Err(ApiError::InvalidInput(format!(
            "tag-info needs an explicit tag, e.g. {}:latest",
            reference.repository_path()
        )));
    }
    Ok(reference)
}

fn into_document(image: &str, outcome: InvocationOutcome) -> Result<Value, ApiError> {
    if let Some(err) = ApiError::from_outcome(image, &outcome) {
        tracing::error!(%image, error = %err, "inspection failed");
        return Err(err);
    }
    Ok(outcome.success().unwrap_or_default())
}

fn envelope(image: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("status".into(), json!("success"));
    payload.insert("image".into(), json!(image));
    payload
}

/// Size fields of the response. Estimates and authoritative figures use
/// different keys so callers can tell them apart.
pub fn size_fields(record: &SizeRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("compressed_size".into(), json!(record.compressed_bytes));
    fields.insert(
        "compressed_size_mb".into(),
        json!(to_mb(record.compressed_bytes)),
    );
    if let Some(bytes) = record.uncompressed_bytes {
        let prefix = if record.uncompressed_is_estimate {
            "estimated_uncompressed_size"
        } else {
            "uncompressed_size"
        };
        fields.insert(prefix.into(), json!(bytes));
        fields.insert(format!("{prefix}_mb"), json!(to_mb(bytes)));
    }
    fields.insert(
        "uncompressed_is_estimate".into(),
        json!(record.uncompressed_is_estimate),
    );
    fields.insert("size_source".into(), json!(record.source));
    fields
}

fn ports_value(ports: Option<PortSet>) -> Value {
    json!(ports.unwrap_or_default())
}

/// Mebibytes rounded to two decimals.
fn to_mb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}
