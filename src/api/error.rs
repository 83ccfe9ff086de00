//! Errors returned by the debug API handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body
    InvalidRequest(String),

    /// No porter is registered under this name
    UnknownPorter(String),

    /// The porter refused the payload, e.g. while shutting down
    Rejected { porter: String, reason: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownPorter(_) => StatusCode::NOT_FOUND,
            ApiError::Rejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::InvalidRequest(msg) => json!({ "error": msg }),
            ApiError::UnknownPorter(name) => json!({
                "error": format!("no porter named '{name}'"),
                "porter": name,
            }),
            ApiError::Rejected { porter, reason } => json!({
                "error": reason,
                "porter": porter,
            }),
        };

        (status, Json(body)).into_response()
    }
}
