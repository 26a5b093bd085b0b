//! Blob fetches against a throwaway registry that demands a bearer token.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use common::{StubInspector, nginx_config, nginx_doc};
use imgscope::cache::NullCache;
use imgscope::inspector::{Credentials, InvocationOutcome};
use imgscope::registry::{BlobFetcher, FetchError, HttpBlobFetcher};
use imgscope::{Config, Endpoint, ImageReference, ImageService};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;

const TOKEN: &str = "t0k3n";

struct MockRegistry {
    addr: SocketAddr,
    token_requests: Arc<AtomicUsize>,
}

/// Registry that 401s every blob request without `Bearer t0k3n` and hands
/// that token out at `/token` to anyone presenting `bob:hunter2`.
async fn start_registry(blob: Vec<u8>) -> MockRegistry {
    start_slow_registry(blob, Duration::ZERO).await
}

/// Same registry, but every `/v2/` answer is held back by `delay`.
async fn start_slow_registry(blob: Vec<u8>, delay: Duration) -> MockRegistry {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token_requests = Arc::new(AtomicUsize::new(0));

    let challenge = format!(
        r#"Bearer realm="http://{addr}/token",service="mock-registry",scope="repository:app:pull""#
    );
    let counter = token_requests.clone();
    let app = Router::new()
        .route(
            "/token",
            get(move |headers: HeaderMap, Query(query): Query<HashMap<String, String>>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // base64("bob:hunter2")
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Basic Ym9iOmh1bnRlcjI=");
                    let scoped = query.get("service").map(String::as_str) == Some("mock-registry")
                        && query.get("scope").map(String::as_str) == Some("repository:app:pull");
                    if authorized && scoped {
                        axum::Json(json!({ "token": TOKEN })).into_response()
                    } else {
                        StatusCode::UNAUTHORIZED.into_response()
                    }
                }
            }),
        )
        .route(
            "/v2/*rest",
            get(move |headers: HeaderMap, uri: Uri| {
                let challenge = challenge.clone();
                let blob = blob.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    if !uri.path().contains("/blobs/") {
                        return StatusCode::NOT_FOUND.into_response();
                    }
                    let expected = format!("Bearer {TOKEN}");
                    let bearer = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some(expected.as_str());
                    if bearer {
                        blob.into_response()
                    } else {
                        (StatusCode::UNAUTHORIZED, [("www-authenticate", challenge)], "")
                            .into_response()
                    }
                }
            }),
        );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockRegistry {
        addr,
        token_requests,
    }
}

fn digest_of(data: &[u8]) -> String {
    let hex: String = Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("sha256:{hex}")
}

fn bob() -> Credentials {
    Credentials::from_parts(Some("bob"), Some("hunter2")).unwrap()
}

#[tokio::test]
async fn bearer_challenge_is_answered() {
    let registry = start_registry(b"config-bytes".to_vec()).await;
    let fetcher = HttpBlobFetcher::new(Duration::from_secs(5));
    let url = format!("http://{}/v2/app/blobs/sha256:abc", registry.addr);

    let bytes = fetcher.fetch(&url, Some(&bob()), None).await.unwrap();
    assert_eq!(bytes, b"config-bytes");
    assert_eq!(registry.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn token_refusal_is_an_error() {
    let registry = start_registry(b"config-bytes".to_vec()).await;
    let fetcher = HttpBlobFetcher::new(Duration::from_secs(5));
    let url = format!("http://{}/v2/app/blobs/sha256:abc", registry.addr);

    let err = fetcher.fetch(&url, None, None).await.unwrap_err();
    assert!(matches!(err, FetchError::Token(_)), "{err}");
}

#[tokio::test]
async fn missing_blob_is_a_status_error() {
    let registry = start_registry(Vec::new()).await;
    let fetcher = HttpBlobFetcher::new(Duration::from_secs(5));
    let url = format!("http://{}/v2/app/manifests/1", registry.addr);

    let err = fetcher.fetch(&url, Some(&bob()), None).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND
    ));
}

#[tokio::test]
async fn ports_resolved_from_local_registry_blob() {
    let config_blob = serde_json::to_vec(&nginx_config()).unwrap();
    let digest = digest_of(&config_blob);
    let registry = start_registry(config_blob).await;

    let raw = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": { "digest": &digest, "size": 42 },
        "layers": [{ "digest": "sha256:l1", "size": 100 }]
    });
    let inspector = Arc::new(
        StubInspector::new(InvocationOutcome::Success(nginx_doc()))
            .with_raw(InvocationOutcome::Success(raw)),
    );
    let config = Arc::new(Config {
        default_username: Some("bob".into()),
        default_password: Some("hunter2".into()),
        ..Config::default()
    });
    let service = ImageService::new(
        config.clone(),
        inspector,
        Arc::new(HttpBlobFetcher::new(Duration::from_secs(5))),
        Arc::new(NullCache::default()),
    );

    let reference = ImageReference::parse(&format!("{}/app:1", registry.addr)).unwrap();
    let access = config.access(None, None, None);
    let payload = service
        .resolve(Endpoint::ImageInfo, &reference, &access)
        .await
        .unwrap();
    assert_eq!(payload["exposed_ports"], json!(["80/tcp"]));
}

#[tokio::test]
async fn tampered_blob_yields_no_ports() {
    let registry = start_registry(serde_json::to_vec(&nginx_config()).unwrap()).await;

    let raw = json!({
        "schemaVersion": 2,
        "config": { "digest": digest_of(b"something else"), "size": 42 },
        "layers": [{ "digest": "sha256:l1", "size": 100 }]
    });
    let inspector = Arc::new(
        StubInspector::new(InvocationOutcome::Success(nginx_doc()))
            .with_raw(InvocationOutcome::Success(raw)),
    );
    let config = Arc::new(Config {
        default_username: Some("bob".into()),
        default_password: Some("hunter2".into()),
        ..Config::default()
    });
    let service = ImageService::new(
        config.clone(),
        inspector,
        Arc::new(HttpBlobFetcher::new(Duration::from_secs(5))),
        Arc::new(NullCache::default()),
    );

    let reference = ImageReference::parse(&format!("{}/app:1", registry.addr)).unwrap();
    let payload = service
        .resolve(Endpoint::ImageInfo, &reference, &config.access(None, None, None))
        .await
        .unwrap();
    assert_eq!(payload["exposed_ports"], json!([]));
    assert_eq!(payload["compressed_size"], 300);
}

#[tokio::test]
async fn slow_blob_fetch_times_out() {
    let registry = start_slow_registry(b"config-bytes".to_vec(), Duration::from_secs(5)).await;
    let fetcher = HttpBlobFetcher::new(Duration::from_millis(200));
    let url = format!("http://{}/v2/app/blobs/sha256:abc", registry.addr);

    let err = fetcher.fetch(&url, Some(&bob()), None).await.unwrap_err();
    assert!(matches!(&err, FetchError::Http(e) if e.is_timeout()), "{err}");
    assert_eq!(registry.token_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_blob_fetch_degrades_to_no_ports() {
    let config_blob = serde_json::to_vec(&nginx_config()).unwrap();
    let digest = digest_of(&config_blob);
    let registry = start_slow_registry(config_blob, Duration::from_secs(5)).await;

    let raw = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": { "digest": &digest, "size": 42 },
        "layers": [{ "digest": "sha256:l1", "size": 100 }]
    });
    let inspector = Arc::new(
        StubInspector::new(InvocationOutcome::Success(nginx_doc()))
            .with_raw(InvocationOutcome::Success(raw)),
    );
    let config = Arc::new(Config {
        default_username: Some("bob".into()),
        default_password: Some("hunter2".into()),
        ..Config::default()
    });
    let service = ImageService::new(
        config.clone(),
        inspector,
        Arc::new(HttpBlobFetcher::new(Duration::from_millis(200))),
        Arc::new(NullCache::default()),
    );

    let reference = ImageReference::parse(&format!("{}/app:1", registry.addr)).unwrap();
    let payload = service
        .resolve(Endpoint::ImageInfo, &reference, &config.access(None, None, None))
        .await
        .unwrap();
    assert_eq!(payload["exposed_ports"], json!([]));
    assert_eq!(payload["compressed_size"], 300);
}
