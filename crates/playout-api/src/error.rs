//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use playout_store::StoreError;
use playout_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] playout_queue::QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) | ApiError::Store(_) | ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            e if e.is_conflict() => ApiError::Conflict(e.to_string()),
            StoreError::Model(e) => ApiError::Validation(e.to_string()),
            e => ApiError::Store(e),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::Store(e) => e.into(),
            WorkerError::Queue(e) => e.into(),
            WorkerError::Model(e) => ApiError::Validation(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::Validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal() && std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_models::JobStatus;

    #[test]
    fn test_store_errors_map_to_status_codes() {
        assert_eq!(
            ApiError::from(StoreError::not_found("prepare job x")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::conflict("active prepare job")).status_code(),
            StatusCode::CONFLICT
        );
        let lost = StoreError::StatusConflict {
            id: "job".into(),
            expected: JobStatus::New,
            actual: JobStatus::Failed,
        };
        assert_eq!(ApiError::from(lost).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_worker_store_errors_keep_their_mapping() {
        let err = WorkerError::from(StoreError::conflict("active prepare job"));
        assert_eq!(ApiError::from(err).status_code(), StatusCode::CONFLICT);
        let err = WorkerError::job_failed("boom");
        assert_eq!(ApiError::from(err).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
