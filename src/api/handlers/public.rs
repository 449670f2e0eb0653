//! Public API Handlers
//!
//! Registration, instrument listing, the L2 order book and the public
//! trade tape. None of these require authentication.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ExchangeError;
use crate::models::{Instrument, RegisterRequest, Trade, User, UserOut, CASH_TICKER};
use crate::services::book::{self, OrderBookSnapshot};
use crate::services::ledger;
use crate::AppState;

const DEFAULT_DEPTH: usize = 10;
const MAX_DEPTH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub limit: Option<usize>,
}

/// Register a new user and seed its initial CASH balance.
/// POST /public/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<UserOut>, ExchangeError> {
    req.validate()?;

    let mut tx = state.db.pool.begin().await?;

    let api_key = format!("key-{}", Uuid::new_v4());
    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, role, api_key)
        VALUES ($1, $2, 'USER', $3)
        RETURNING id, name, role, api_key, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(&api_key)
    .fetch_one(&mut *tx)
    .await?;

    ledger::credit(&mut tx, user.id, CASH_TICKER, state.config.initial_cash).await?;

    tx.commit().await?;
    tracing::info!("registered user {} ({})", user.name, user.id);
    Ok(Json(user.into()))
}

/// List all tradable instruments.
/// GET /public/instrument
pub async fn list_instruments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Instrument>>, ExchangeError> {
    let instruments: Vec<Instrument> =
        sqlx::query_as("SELECT ticker, name FROM instruments ORDER BY ticker")
            .fetch_all(&state.db.pool)
            .await?;
    Ok(Json(instruments))
}

/// L2 book snapshot for one instrument.
/// GET /public/orderbook/{ticker}
pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<OrderBookSnapshot>, ExchangeError> {
    ensure_listed(&state, &ticker).await?;
    let depth = query.limit.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH);
    let snapshot = book::snapshot(&state.db.pool, &ticker, depth).await?;
    Ok(Json(snapshot))
}

/// Most recent trades for one instrument, newest first.
/// GET /public/transactions/{ticker}
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<Vec<Trade>>, ExchangeError> {
    ensure_listed(&state, &ticker).await?;
    let limit = query.limit.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH);
    let trades: Vec<Trade> = sqlx::query_as(
        r#"
        SELECT id, ticker, qty, price, created_at
        FROM trades
        WHERE ticker = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(&ticker)
    .bind(limit as i64)
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(trades))
}

async fn ensure_listed(state: &AppState, ticker: &str) -> Result<(), ExchangeError> {
    let listed: Option<(String,)> =
        sqlx::query_as("SELECT ticker FROM instruments WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(&state.db.pool)
            .await?;
    match listed {
        Some(_) => Ok(()),
        None => Err(ExchangeError::UnknownTicker(ticker.to_string())),
    }
}
