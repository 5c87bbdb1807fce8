//! API error type and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use sphere_core::{StoreError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::MalformedBody(_) => "validation_error",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Store(_) => "internal_error",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.error_type();

        let body = match &self {
            // uniform: nothing about why the credential failed or the id is absent
            Self::Unauthorized | Self::NotFound => json!({ "error": kind }),
            Self::Validation(_) | Self::MalformedBody(_) => {
                json!({ "error": kind, "detail": self.to_string() })
            }
            Self::Store(e) => {
                tracing::error!(error = %e, "store failure while serving request");
                json!({ "error": kind, "detail": "internal server error" })
            }
        };

        (status, Json(body)).into_response()
    }
}
