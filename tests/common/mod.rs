//! Scripted inspector and fetcher plus a helper that serves the router on
//! an ephemeral port.

#![allow(dead_code)]

use std::future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use imgscope::cache::MemoryCache;
use imgscope::inspector::{Access, Credentials, InspectMode, Inspector, InvocationOutcome};
use imgscope::registry::{BlobFetcher, FetchError};
use imgscope::{Config, ImageService};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Inspect(InspectMode),
    ListTags,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub target: String,
    pub access: Access,
}

/// Inspector that answers each mode with a fixed outcome and records calls.
pub struct StubInspector {
    standard: InvocationOutcome,
    raw: InvocationOutcome,
    config: InvocationOutcome,
    tags: InvocationOutcome,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl StubInspector {
    pub fn new(standard: InvocationOutcome) -> Self {
        let unavailable = || InvocationOutcome::OtherFailure("not scripted".into());
        Self {
            standard,
            raw: unavailable(),
            config: unavailable(),
            tags: unavailable(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_raw(mut self, outcome: InvocationOutcome) -> Self {
        self.raw = outcome;
        self
    }

    pub fn with_config(mut self, outcome: InvocationOutcome) -> Self {
        self.config = outcome;
        self
    }

    pub fn with_tags(mut self, outcome: InvocationOutcome) -> Self {
        self.tags = outcome;
        self
    }

    /// Slow down standard inspections so concurrent requests overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    pub fn total(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, kind: CallKind, target: &str, access: &Access) {
        self.calls.lock().unwrap().push(Call {
            kind,
            target: target.to_string(),
            access: access.clone(),
        });
    }
}

#[async_trait]
impl Inspector for StubInspector {
    async fn inspect(
        &self,
        reference: &str,
        mode: InspectMode,
        access: &Access,
    ) -> InvocationOutcome {
        self.record(CallKind::Inspect(mode), reference, access);
        match mode {
            InspectMode::Standard => {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.standard.clone()
            }
            InspectMode::Raw => self.raw.clone(),
            InspectMode::Config => self.config.clone(),
        }
    }

    async fn list_tags(&self, repository: &str, access: &Access) -> InvocationOutcome {
        self.record(CallKind::ListTags, repository, access);
        self.tags.clone()
    }
}

/// Fetcher that serves one fixed body, or 404 when it has none.
#[derive(Default)]
pub struct StubFetcher {
    body: Option<Vec<u8>>,
    urls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn serving(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Some(body.into()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobFetcher for StubFetcher {
    async fn fetch(
        &self,
        url: &str,
        _credentials: Option<&Credentials>,
        _proxy: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.body.clone().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
        })
    }
}

/// Standard inspection document for an image with two layers of 100 and
/// 200 compressed bytes and no uncompressed figures.
pub fn nginx_doc() -> Value {
    json!({
        "Name": "docker.io/library/nginx",
        "Digest": "sha256:abc",
        "Created": "2024-01-01T00:00:00Z",
        "Architecture": "amd64",
        "Os": "linux",
        "Env": ["PATH=/usr/bin"],
        "Layers": ["sha256:l1", "sha256:l2"],
        "LayersData": [
            { "Digest": "sha256:l1", "Size": 100 },
            { "Digest": "sha256:l2", "Size": 200 }
        ]
    })
}

pub fn nginx_config() -> Value {
    json!({ "config": { "ExposedPorts": { "80/tcp": {} } } })
}

pub fn service(
    config: Config,
    inspector: Arc<StubInspector>,
    fetcher: Arc<StubFetcher>,
) -> Arc<ImageService> {
    let cache = Arc::new(MemoryCache::new(config.cache_ttl, config.cache_max_entries));
    Arc::new(ImageService::new(Arc::new(config), inspector, fetcher, cache))
}

/// Serve the router on 127.0.0.1 and return its base URL.
pub async fn spawn(service: Arc<ImageService>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(imgscope::server::serve(
        listener,
        service,
        future::pending::<()>(),
    ));
    format!("http://{addr}")
}
