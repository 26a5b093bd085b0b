//! Minimal registry blob fetch, used only when the inspector cannot hand us
//! an image config directly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::inspector::Credentials;
use crate::reference::ImageReference;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GET {url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("token endpoint error: {0}")]
    Token(String),

    #[error("invalid proxy '{0}'")]
    Proxy(String),
}

/// "Fetch bytes at URL with optional basic auth and optional proxy".
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        proxy: Option<&str>,
    ) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest`-backed fetcher. A client is built per call so each request can
/// carry its own proxy.
pub struct HttpBlobFetcher {
    timeout: Duration,
}

impl HttpBlobFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("imgscope/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout);
        if let Some(proxy) = proxy {
            let proxy =
                reqwest::Proxy::all(proxy).map_err(|_| FetchError::Proxy(proxy.to_string()))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder.build()?)
    }

    /// Exchange a `Bearer realm=...` challenge for a token.
    async fn bearer_token(
        &self,
        client: &reqwest::Client,
        challenge: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String, FetchError> {
        let realm = extract_param(challenge, "realm")
            .ok_or_else(|| FetchError::Token("challenge has no realm".into()))?;

        let mut query = Vec::new();
        if let Some(service) = extract_param(challenge, "service") {
            query.push(("service", service));
        }
        if let Some(scope) = extract_param(challenge, "scope") {
            query.push(("scope", scope));
        }

        debug!(%realm, "fetching registry token");
        let mut req = client.get(&realm).query(&query);
        if let Some(creds) = credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Token(format!("{realm} returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await?;
        body.get("token")
            .or_else(|| body.get("access_token"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| FetchError::Token("response has no token".into()))
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        proxy: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        let client = self.client(proxy)?;

        let mut req = client.get(url);
        if let Some(creds) = credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }
        let resp = req.send().await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            let challenge = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if !challenge.starts_with("Bearer") {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: StatusCode::UNAUTHORIZED,
                });
            }
            let token = self.bearer_token(&client, &challenge, credentials).await?;
            client
                .get(url)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .send()
                .await?
        } else {
            resp
        };

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Blob endpoint for `digest` in the reference's repository.
pub fn blob_url(reference: &ImageReference, digest: &str) -> String {
    let host = reference.registry_host();
    format!(
        "{}://{host}/v2/{}/blobs/{digest}",
        registry_scheme(host),
        reference.registry_repository()
    )
}

/// Localhost and loopback registries speak plain HTTP; everything else HTTPS.
fn registry_scheme(registry: &str) -> &'static str {
    let host = registry.split(':').next().unwrap_or(registry);
    if host == "localhost" || host == "127.0.0.1" {
        "http"
    } else {
        "https"
    }
}

/// Whether `data` hashes to `digest` (`sha256:<hex>`). Other algorithms are
/// accepted unchecked.
pub fn digest_matches(data: &[u8], digest: &str) -> bool {
    match digest.strip_prefix("sha256:") {
        Some(expected) => {
            let actual: String = Sha256::digest(data)
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            actual.eq_ignore_ascii_case(expected)
        }
        None => true,
    }
}

/// Value of `param="..."` in a `WWW-Authenticate` header.
fn extract_param(header: &str, param: &str) -> Option<String> {
    let search = format!("{param}=\"");
    let start = header.find(&search)? + search.len();
    let end = header[start..].find('"')?;
    Some(header[start..start + end].to_string())
}
