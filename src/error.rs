use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;
use crate::inspector::InvocationOutcome;
use crate::reference::ReferenceError;

/// Everything a request can fail with, mapped onto the JSON error envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{message}")]
    AuthOrNotFound { message: String, detail: String },

    #[error("{message}")]
    ToolFailure { message: String, detail: String },

    #[error("invalid or missing api_key")]
    AuthRejected,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ApiError {
    /// Turn a failed invocation into the matching error; `None` on success.
    pub fn from_outcome(image: &str, outcome: &InvocationOutcome) -> Option<Self> {
        match outcome {
            InvocationOutcome::Success(_) => None,
            InvocationOutcome::AuthOrNotFound(detail) => Some(ApiError::AuthOrNotFound {
                message: format!("access denied or image not found: {image}"),
                detail: detail.clone(),
            }),
            InvocationOutcome::OtherFailure(detail) => Some(ApiError::ToolFailure {
                message: format!("failed to inspect image: {image}"),
                detail: detail.clone(),
            }),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthOrNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::AuthRejected => StatusCode::UNAUTHORIZED,
            ApiError::ToolFailure { .. } | ApiError::Cache(_) | ApiError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ReferenceError> for ApiError {
    fn from(e: ReferenceError) -> Self {
        ApiError::InvalidInput(format!(
            "{e}; pass an image name, e.g. /image-info?image=nginx:latest"
        ))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::AuthOrNotFound { message, detail }
            | ApiError::ToolFailure { message, detail } => json!({
                "status": "error",
                "message": message,
                "error": detail,
            }),
            other => json!({
                "status": "error",
                "message": other.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_mapping() {
        let not_found = InvocationOutcome::AuthOrNotFound("manifest unknown: not found".into());
        let err = ApiError::from_outcome("nginx:nope", &not_found).unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let broken = InvocationOutcome::OtherFailure("exit 1".into());
        let err = ApiError::from_outcome("nginx:latest", &broken).unwrap();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = InvocationOutcome::Success(json!({}));
        assert!(ApiError::from_outcome("nginx:latest", &ok).is_none());
    }

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(
            ApiError::InvalidInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::AuthRejected.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Cache(CacheError::Backend("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(ReferenceError::Empty).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
