//! Operational queries over the live hub: counters, presence, and history.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::events::HubMessage;
use crate::gateway::stats::StatsSnapshot;
use crate::AppState;

/// History size returned when the query names no limit.
const DEFAULT_HISTORY_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/hub/stats", get(get_stats))
        .route("/hub/online", get(list_online))
        .route("/hub/history", get(list_history))
        .route("/hub/messages/{message_id}", get(get_message))
}

/// A live session as seen by operators.
#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineSession {
    pub user_id: String,
    pub username: String,
    pub online: bool,
    pub session_id: u64,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<OnlineSession>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub messages: Vec<HubMessage>,
}

#[utoipa::path(
    get,
    path = "/api/v1/hub/stats",
    tag = "Hub",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Connection counters", body = StatsSnapshot),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn get_stats(_auth: AuthUser, State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.hub.stats_snapshot())
}

#[utoipa::path(
    get,
    path = "/api/v1/hub/online",
    tag = "Hub",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Users with a live session", body = OnlineUsersResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_online(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Json<OnlineUsersResponse> {
    let mut users: Vec<OnlineSession> = state
        .hub
        .sessions()
        .iter()
        .map(|s| OnlineSession {
            user_id: s.user_id.clone(),
            username: s.username.clone(),
            online: true,
            session_id: s.id,
            joined_at: s.joined_at,
            last_active_at: s.last_active_at(),
        })
        .collect();
    users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    Json(OnlineUsersResponse { users })
}

#[utoipa::path(
    get,
    path = "/api/v1/hub/history",
    tag = "Hub",
    security(("bearer" = [])),
    params(
        ("limit" = Option<i64>, Query, description = "Number of messages (clamped to the history cap, default 50)"),
    ),
    responses(
        (status = 200, description = "Recent chat messages, oldest first", body = HistoryResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_history(
    _auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(HistoryResponse {
        messages: state.hub.history(limit),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/hub/messages/{message_id}",
    tag = "Hub",
    security(("bearer" = [])),
    params(("message_id" = i64, Path, description = "Chat message ID")),
    responses(
        (status = 200, description = "Stored chat message", body = HubMessage),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not in history", body = ApiErrorBody),
    ),
)]
pub async fn get_message(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
) -> Result<Json<HubMessage>, ApiError> {
    state
        .hub
        .message_by_id(message_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Message not found"))
}
