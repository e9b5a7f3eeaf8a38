//! Error types for alertad.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("missing required field: {0}")]
    Validation(&'static str),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl IntoResponse for AlertError {
    fn into_response(self) -> Response {
        let status = match &self {
            AlertError::UserNotFound(_) => StatusCode::NOT_FOUND,
            AlertError::Validation(_) => StatusCode::BAD_REQUEST,
            AlertError::Protocol(_) => StatusCode::BAD_REQUEST,
            // Dispatch errors are swallowed at the dispatch boundary and
            // never reach an HTTP caller.
            AlertError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AlertError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
