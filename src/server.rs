use std::future::Future;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::service::{Endpoint, ImageService, Lookup};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");
pub const X_CACHE_TYPE: HeaderName = HeaderName::from_static("x-cache-type");

const USAGE: &str = "\
imgscope: container image size lookup

  GET /image-info?image=nginx:latest    size, exposed ports and raw inspection data
  GET /image-size?image=nginx:latest    size only
  GET /image-tags?image=nginx           tags of a repository
  GET /tag-info?image=nginx:1.25        size and config summary of one tag
  GET /cache-info                       cache statistics
  GET /cache-clear                      drop all cached responses

Optional parameters: username, password, proxy, api_key
";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ImageService>,
}

impl AppState {
    fn authorize(&self, supplied: Option<&str>) -> Result<(), ApiError> {
        if self.service.config().api_key_matches(supplied) {
            Ok(())
        } else {
            warn!("rejected request with invalid api_key");
            Err(ApiError::AuthRejected)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageQuery {
    pub image: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy: Option<String>,
    pub api_key: Option<String>,
}

impl ImageQuery {
    fn lookup(&self) -> Lookup<'_> {
        Lookup {
            image: self.image.as_deref(),
            username: self.username.as_deref(),
            password: self.password.as_deref(),
            proxy: self.proxy.as_deref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct KeyQuery {
    pub api_key: Option<String>,
}

pub fn build_router(service: Arc<ImageService>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/image-info", get(image_info))
        .route("/image-size", get(image_size))
        .route("/image-tags", get(image_tags))
        .route("/tag-info", get(tag_info))
        .route("/cache-info", get(cache_info))
        .route("/cache-clear", get(cache_clear))
        .fallback(not_found)
        .with_state(AppState { service })
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    service: Arc<ImageService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("listening on http://{addr}");
    }
    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn index() -> &'static str {
    USAGE
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": "error", "message": "route not found" })),
    )
}

async fn image_info(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    cached(state, Endpoint::ImageInfo, query).await
}

async fn image_size(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    cached(state, Endpoint::ImageSize, query).await
}

async fn image_tags(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    cached(state, Endpoint::ImageTags, query).await
}

async fn tag_info(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    cached(state, Endpoint::TagInfo, query).await
}

/// Gate, look up, and tag the response with cache headers. Resolution runs
/// in its own task so a panic becomes a 500 instead of a dropped connection.
async fn cached(
    state: AppState,
    endpoint: Endpoint,
    query: ImageQuery,
) -> Result<Response, ApiError> {
    state.authorize(query.api_key.as_deref())?;
    debug!(endpoint = endpoint.as_str(), image = ?query.image, "lookup");

    let service = state.service.clone();
    let (payload, status) =
        tokio::spawn(async move { service.lookup(endpoint, &query.lookup()).await })
            .await
            .map_err(|e| ApiError::Unexpected(e.to_string()))??;

    let config = state.service.config();
    let mut response = Json(payload).into_response();
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
    headers.insert(X_CACHE_TTL, HeaderValue::from(config.cache_ttl.as_secs()));
    headers.insert(
        X_CACHE_TYPE,
        HeaderValue::from_static(state.service.cache().name()),
    );
    Ok(response)
}

async fn cache_info(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    state.authorize(query.api_key.as_deref())?;
    let cache = state.service.cache();
    let stats = cache.stats()?;
    Ok(Json(json!({
        "status": "success",
        "cache_type": cache.name(),
        "cache_timeout": state.service.config().cache_ttl.as_secs(),
        "stats": stats,
    }))
    .into_response())
}

async fn cache_clear(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    state.authorize(query.api_key.as_deref())?;
    state.service.cache().clear()?;
    info!("cache cleared");
    Ok(Json(json!({ "status": "success", "message": "cache cleared" })).into_response())
}
