//! Error types for the HTTP layer

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures that happen before a request reaches the console API. Errors
/// from the operations themselves are reported in the response body.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Missing or invalid bearer token")]
    Unauthorized,

    /// Unknown target and target owned by someone else look the same.
    #[error("Target not found")]
    TargetNotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("HTTP server error: {0}")]
    Server(String),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::Unauthorized => StatusCode::UNAUTHORIZED,
            HttpError::TargetNotFound => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(json!({ "success": false, "message": self.to_string() })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for HttpError {
    fn from(rejection: QueryRejection) -> Self {
        HttpError::BadRequest(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;
