use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::error::CoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Core(CoreError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Core(e @ CoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, e.to_string()),
            ApiError::Core(CoreError::Computation(msg)) => {
                tracing::warn!(error = %msg, "Computation error.");
                (StatusCode::UNPROCESSABLE_ENTITY, msg)
            }
            ApiError::Core(CoreError::Store(store_err)) => {
                tracing::error!(error = ?store_err, "Metric store error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal storage error occurred".to_string(),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Join(join_err) => {
                tracing::error!(error = ?join_err, "Worker task failed.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
