use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiResult;
use crate::models::{Customer, LineItem, Order, OrderId, OrderStatus};
use crate::services::CreateOrderRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/cleanup", post(cleanup_expired))
        .route("/orders/{order_id}", get(get_order))
        .route("/orders/{order_id}/customer", patch(upgrade_to_pending))
        .route("/orders/{order_id}/pay", post(pay_order))
        .route("/orders/{order_id}/status", patch(update_status))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
    pub order_number: i64,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderCreatedResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number,
            line_items: order.line_items,
            subtotal: order.subtotal,
            discount: order.discount,
            total: order.total,
            status: order.status,
            expires_at: order.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    let order = state.booking.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(OrderCreatedResponse::from(order))))
}

/// GET /api/orders/{order_id}
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.booking.get_order(order_id).await?))
}

/// PATCH /api/orders/{order_id}/customer
pub async fn upgrade_to_pending(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
    Json(customer): Json<Customer>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let order = state.booking.upgrade_to_pending(order_id, customer).await?;
    Ok(Json(OrderStatusResponse { status: order.status, expires_at: order.expires_at }))
}

/// POST /api/orders/{order_id}/pay
pub async fn pay_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let order = state.booking.pay_order(order_id).await?;
    Ok(Json(OrderStatusResponse { status: order.status, expires_at: None }))
}

/// PATCH /api/orders/{order_id}/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
    Json(req): Json<StatusUpdateRequest>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let order = state.booking.update_order_status(order_id, req.status).await?;
    Ok(Json(OrderStatusResponse { status: order.status, expires_at: order.expires_at }))
}

/// POST /api/orders/cleanup - один проход зачистки вручную
pub async fn cleanup_expired(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.sweeper.sweep_once().await;
    Json(serde_json::json!({
        "count": report.expired,
        "releasedSeats": report.released_seats,
        "abandonedSeats": report.abandoned_seats,
        "failed": report.failed,
    }))
}
