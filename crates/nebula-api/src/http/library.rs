//! History and favorites handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use nebula_runtime::{FavoriteEntry, HistoryEntry, NewFavorite};

use crate::http::constants::DEFAULT_HISTORY_LIMIT;
use crate::http::errors::ApiError;
use crate::models::{
    FavoriteCheck, FavoriteQuery, FavoriteRequest, HistoryQuery, HistorySearchQuery, StatusAck,
};
use crate::state::ApiState;

pub(crate) async fn list_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HistoryEntry>> {
    let limit = query
        .limit
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.store.history(limit).await)
}

pub(crate) async fn search_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistorySearchQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let needle = query.q.trim();
    if needle.is_empty() {
        return Err(ApiError::bad_request("search query cannot be empty"));
    }
    Ok(Json(state.store.search_history(needle).await))
}

pub(crate) async fn list_favorites(State(state): State<Arc<ApiState>>) -> Json<Vec<FavoriteEntry>> {
    Json(state.store.favorites().await)
}

pub(crate) async fn add_favorite(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<FavoriteRequest>,
) -> Result<Json<FavoriteEntry>, ApiError> {
    let magnet_link = required_source(&request.magnet_link)?;
    let entry = state
        .store
        .add_favorite(NewFavorite {
            magnet_link,
            torrent_name: request.torrent_name,
            tags: request.tags,
            notes: request.notes,
        })
        .await?;
    Ok(Json(entry))
}

pub(crate) async fn remove_favorite(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FavoriteQuery>,
) -> Result<Json<StatusAck>, ApiError> {
    let magnet_link = required_source(&query.magnet_link)?;
    if state.store.remove_favorite(&magnet_link).await? {
        Ok(Json(StatusAck::new("removed")))
    } else {
        Err(ApiError::not_found("favorite not found"))
    }
}

pub(crate) async fn check_favorite(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FavoriteQuery>,
) -> Result<Json<FavoriteCheck>, ApiError> {
    let magnet_link = required_source(&query.magnet_link)?;
    Ok(Json(FavoriteCheck {
        is_favorite: state.store.is_favorite(&magnet_link).await,
    }))
}

fn required_source(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Err(ApiError::bad_request("magnet_link is required"))
    } else {
        Ok(trimmed.to_string())
    }
}
