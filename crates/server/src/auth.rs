//! Shared-secret API key check for protected routes
//!
//! The key is read from the `X-API-KEY` header, falling back to the
//! `api_key` query parameter when the header is absent or empty. Comparison is plain string equality, which is
//! not constant-time.

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
pub struct ApiKeyParam {
    api_key: Option<String>,
}

/// True when a key is configured and the presented one equals it
pub fn credential_matches(configured: &str, presented: Option<&str>) -> bool {
    !configured.is_empty() && presented == Some(configured)
}

/// Middleware: reject before the handler runs, so a rejected request never
/// reaches the store
pub async fn require_api_key(
    State(state): State<AppState>,
    query: Option<Query<ApiKeyParam>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let from_header = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let presented = from_header.or_else(|| query.and_then(|Query(q)| q.api_key));

    if !credential_matches(&state.config.api_key, presented.as_deref()) {
        tracing::warn!(
            path = %request.uri().path(),
            key_present = presented.is_some(),
            "rejected unauthenticated request"
        );
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
