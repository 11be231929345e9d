use crate::models::{OrderId, OrderStatus, SeatId, SessionId, ZoneId};
use thiserror::Error;

pub type BookingResult<T> = Result<T, BookingError>;

/// Ошибки бронирования. Все возвращаются синхронно на границе операции.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("seat {0} not found")]
    SeatNotFound(SeatId),

    #[error("zone {0} not found")]
    ZoneNotFound(ZoneId),

    #[error("seat {0} is not available")]
    SeatUnavailable(SeatId),

    #[error("zone {zone_id} has {available} free places, {requested} requested")]
    ZoneSoldOut { zone_id: ZoneId, requested: u32, available: u32 },

    #[error("reservation of order {0} has expired")]
    ReservationExpired(OrderId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("order status cannot change from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("promo code '{code}' rejected: {reason}")]
    PromoCodeInvalid { code: String, reason: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BookingError {
    /// Машиночитаемый код для ответа API и логов.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::SeatNotFound(_) => "SEAT_NOT_FOUND",
            BookingError::ZoneNotFound(_) => "ZONE_NOT_FOUND",
            BookingError::SeatUnavailable(_) => "SEAT_UNAVAILABLE",
            BookingError::ZoneSoldOut { .. } => "ZONE_SOLD_OUT",
            BookingError::ReservationExpired(_) => "RESERVATION_EXPIRED",
            BookingError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            BookingError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            BookingError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            BookingError::PromoCodeInvalid { .. } => "PROMO_CODE_INVALID",
            BookingError::Validation(_) => "VALIDATION_FAILED",
            BookingError::Database(_) => "STORAGE_FAILURE",
        }
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}
