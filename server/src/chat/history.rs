//! REST endpoints around the hub: user list, conversation history and
//! dispatcher stats.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::SessionUser;
use crate::db::models::{ChatMessageRow, UserRow};
use crate::hub::HubStats;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub companion_id: Option<String>,
}

/// GET /api/messages?companion_id=<id>
/// All messages between the caller and `companion_id`, oldest first.
/// `companion_id=0` returns the broadcast channel. JWT auth required.
pub async fn message_history(
    State(state): State<AppState>,
    user: SessionUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessageRow>>, StatusCode> {
    let companion: u64 = query
        .companion_id
        .as_deref()
        .and_then(|raw| raw.trim().parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let store = state.store.clone();
    let user_id = user.user_id;

    let messages = tokio::task::spawn_blocking(move || store.conversation(user_id, companion))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!(user_id, companion, error = %e, "Failed to load message history");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}

/// GET /api/users
/// Every user the caller can chat with, by id. JWT auth required.
pub async fn list_users(
    State(state): State<AppState>,
    user: SessionUser,
) -> Result<Json<Vec<UserRow>>, StatusCode> {
    let store = state.store.clone();

    let users = tokio::task::spawn_blocking(move || store.list_users())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::error!(user_id = user.user_id, error = %e, "Failed to list users");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(users))
}

/// GET /api/hub/stats: live connection and user counts. JWT auth required.
pub async fn hub_stats(
    State(state): State<AppState>,
    _user: SessionUser,
) -> Result<Json<HubStats>, StatusCode> {
    state
        .hub
        .stats()
        .await
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}
