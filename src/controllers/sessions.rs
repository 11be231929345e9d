use axum::{
    extract::{Path, Query, State},
    http::header::HeaderName,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::ApiResult;
use crate::models::SessionId;
use crate::services::LockOutcome;
use crate::AppState;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/{session_id}/seats", get(seat_map))
        .route("/sessions/{session_id}/lock", post(lock_session))
}

#[derive(Debug, Deserialize)]
pub struct LockQuery {
    #[serde(default)]
    pub force: bool,
}

/// GET /api/sessions/{session_id}/seats
pub async fn seat_map(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<impl IntoResponse> {
    if let Some(snapshot) = state.cache.get(session_id).await {
        return Ok(([(X_CACHE, "HIT")], Json(snapshot)));
    }

    let version = state.cache.version(session_id).await;
    let snapshot = state.booking.inventory(session_id).snapshot().await?;
    state.cache.put(&snapshot, version).await;
    Ok(([(X_CACHE, "MISS")], Json(snapshot)))
}

/// POST /api/sessions/{session_id}/lock?force=true
pub async fn lock_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Json<LockOutcome>> {
    let outcome = state.locker.lock_session(session_id, query.force).await?;
    Ok(Json(outcome))
}
