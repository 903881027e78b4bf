//! Error types for the translation recommender.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No matching recommender found")]
    NoMatchingRecommender,

    #[error("Cache error: {0}")]
    CacheError(#[source] sqlx::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Errors raised while talking to Wikipedia, Wikidata or CXServer.
///
/// These never reach a caller of the recommendation API: every consumer
/// substitutes an empty result and logs.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to upstream failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Invalid JSON from upstream: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Upstream API error: {0}")]
    Api(String),

    #[error("Unexpected upstream payload: {0}")]
    Malformed(String),

    #[error("Invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::CacheError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NoMatchingRecommender => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No matching recommender found".to_string(),
            ),
            AppError::CacheError(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Cache error: {}", e)),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "detail": error_message
        }));

        (status, body).into_response()
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for upstream fetches
pub type FetchResult<T> = Result<T, FetchError>;
