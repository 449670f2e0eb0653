//! Order API Handlers
//!
//! Thin HTTP shell over the order controller: body in, typed result
//! out. All balance and book mutation happens inside
//! `OrderService::place` / `OrderService::cancel`.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ExchangeError;
use crate::models::{CreateOrderResponse, Order, OrderOut, PlaceOrderBody};
use crate::services::orders::OrderService;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub success: bool,
}

/// Place a limit or market order; matching runs before the response.
/// POST /order
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<PlaceOrderBody>,
) -> Result<Json<CreateOrderResponse>, ExchangeError> {
    let placed = OrderService::place(&state.db.pool, &state.config, auth_user.id, body).await?;
    Ok(Json(CreateOrderResponse {
        success: true,
        order_id: placed.order.id,
    }))
}

/// All orders of the caller, newest first.
/// GET /orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<OrderOut>>, ExchangeError> {
    let orders: Vec<Order> = sqlx::query_as(
        r#"
        SELECT id, user_id, order_type, direction, ticker, qty, price, status, filled, created_at
        FROM orders
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(auth_user.id)
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(orders.into_iter().map(OrderOut::from).collect()))
}

/// One order of the caller.
/// GET /order/{id}
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderOut>, ExchangeError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
        SELECT id, user_id, order_type, direction, ticker, qty, price, status, filled, created_at
        FROM orders
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(order_id)
    .bind(auth_user.id)
    .fetch_optional(&state.db.pool)
    .await?;
    let order = order.ok_or(ExchangeError::OrderNotFound)?;
    Ok(Json(order.into()))
}

/// Cancel an open order and release its unfilled reservation.
/// DELETE /order/{id}
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Accepted>, ExchangeError> {
    OrderService::cancel(&state.db.pool, auth_user.id, order_id).await?;
    Ok(Json(Accepted { success: true }))
}
