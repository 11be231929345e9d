pub mod orders;
pub mod sessions;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::{error::BookingError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(orders::routes())
        .merge(sessions::routes())
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    code: &'static str,
    message: String,
}

pub type ApiResult<T> = Result<T, BookingError>;

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = match &self {
            BookingError::SeatNotFound(_)
            | BookingError::ZoneNotFound(_)
            | BookingError::OrderNotFound(_)
            | BookingError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            BookingError::SeatUnavailable(_)
            | BookingError::ZoneSoldOut { .. }
            | BookingError::InvalidStatusTransition { .. } => StatusCode::CONFLICT,
            BookingError::ReservationExpired(_) => StatusCode::GONE,
            BookingError::PromoCodeInvalid { .. } | BookingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Детали ошибок хранилища наружу не отдаём
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "storage failure");
            "internal storage error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiError { success: false, code: self.code(), message })).into_response()
    }
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match &state.db {
        Some(db) => sqlx::query("SELECT 1").execute(&db.pool).await.is_ok(),
        None => true,
    };
    let redis = match &state.redis {
        Some(redis) => redis.ping().await.is_ok(),
        None => true,
    };

    let status = if database && redis { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "store": state.config.app.store,
            "database": database,
            "redis": redis,
        })),
    )
}
