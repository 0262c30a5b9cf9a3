//! Per-route request counting.

use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::ApiState;

const UNMATCHED_ROUTE: &str = "unmatched";

/// Count every response under its route template and status code.
///
/// Templates such as `/api/download/{id}/status` keep label cardinality
/// bounded; raw paths would mint a series per job id.
pub(crate) async fn record_http_metrics(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_owned();
    let response = next.run(request).await;
    state
        .telemetry
        .inc_http_request(&route, response.status().as_u16());
    response
}
