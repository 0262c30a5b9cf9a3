//! Shared-secret authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::http::constants::{BEARER_PREFIX, HEADER_API_KEY, PUBLIC_ROUTES};
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.dev_mode || is_public(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let candidate = extract_api_key(req.headers())
        .ok_or_else(|| ApiError::unauthorized("missing API key header"))?;
    if !state.secret.matches(&candidate) {
        debug!(route = %req.uri().path(), "rejected request with invalid API key");
        return Err(ApiError::unauthorized("invalid API key"));
    }

    Ok(next.run(req).await)
}

fn is_public(path: &str) -> bool {
    PUBLIC_ROUTES.contains(&path)
}

/// Read the secret from `x-api-key`, falling back to an `Authorization: Bearer` token.
pub(crate) fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let header_value = headers
        .get(HEADER_API_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(value) = header_value {
        return Some(value.to_string());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
