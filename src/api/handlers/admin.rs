//! Admin API Handlers
//!
//! Instrument listing CRUD, balance deposit/withdraw and user deletion.
//! All routes here sit behind the admin gate; deposits and withdrawals
//! go through the ledger and therefore can never touch funds that are
//! reserved against an open order (a reservation is already a debit).

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::models::{is_valid_ticker, BalanceOp, Instrument, User, UserOut, CASH_TICKER};
use crate::services::ledger;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub success: bool,
}

/// List a new instrument.
/// POST /admin/instrument
pub async fn add_instrument(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Instrument>,
) -> Result<Json<Accepted>, ExchangeError> {
    if !is_valid_ticker(&body.ticker) {
        return Err(ExchangeError::Validation(
            "ticker must be a short uppercase symbol and not the cash ticker".into(),
        ));
    }
    if body.name.trim().is_empty() {
        return Err(ExchangeError::Validation("name must not be empty".into()));
    }

    let inserted = sqlx::query("INSERT INTO instruments (ticker, name) VALUES ($1, $2) ON CONFLICT (ticker) DO NOTHING")
        .bind(&body.ticker)
        .bind(body.name.trim())
        .execute(&state.db.pool)
        .await?;
    if inserted.rows_affected() == 0 {
        return Err(ExchangeError::Validation(format!(
            "ticker {} is already listed",
            body.ticker
        )));
    }

    tracing::info!("instrument listed: {} ({})", body.ticker, body.name);
    Ok(Json(Accepted { success: true }))
}

/// Delist an instrument.
/// DELETE /admin/instrument/{ticker}
pub async fn delete_instrument(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<Accepted>, ExchangeError> {
    let deleted = sqlx::query("DELETE FROM instruments WHERE ticker = $1")
        .bind(&ticker)
        .execute(&state.db.pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ExchangeError::UnknownTicker(ticker));
    }
    tracing::info!("instrument delisted: {}", ticker);
    Ok(Json(Accepted { success: true }))
}

/// Credit a user's balance.
/// POST /admin/balance/deposit
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BalanceOp>,
) -> Result<Json<Accepted>, ExchangeError> {
    validate_balance_op(&state, &body).await?;

    let mut tx = state.db.pool.begin().await?;
    ledger::credit(&mut tx, body.user_id, &body.ticker, body.amount).await?;
    tx.commit().await?;

    tracing::info!(
        "deposit: {} {} to user {}",
        body.amount,
        body.ticker,
        body.user_id
    );
    Ok(Json(Accepted { success: true }))
}

/// Debit a user's balance; fails when the free balance cannot cover it.
/// POST /admin/balance/withdraw
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BalanceOp>,
) -> Result<Json<Accepted>, ExchangeError> {
    validate_balance_op(&state, &body).await?;

    let mut tx = state.db.pool.begin().await?;
    ledger::debit(&mut tx, body.user_id, &body.ticker, body.amount).await?;
    tx.commit().await?;

    tracing::info!(
        "withdraw: {} {} from user {}",
        body.amount,
        body.ticker,
        body.user_id
    );
    Ok(Json(Accepted { success: true }))
}

/// Delete a user and return a snapshot of the deleted row. Balances and
/// orders cascade.
/// DELETE /admin/user/{user_id}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserOut>, ExchangeError> {
    let user: Option<User> = sqlx::query_as(
        "DELETE FROM users WHERE id = $1 RETURNING id, name, role, api_key, created_at",
    )
    .bind(user_id)
    .fetch_optional(&state.db.pool)
    .await?;
    let user = user.ok_or(ExchangeError::UserNotFound)?;
    tracing::info!("user deleted: {} ({})", user.name, user.id);
    Ok(Json(user.into()))
}

async fn validate_balance_op(state: &AppState, body: &BalanceOp) -> Result<(), ExchangeError> {
    if body.amount < 1 {
        return Err(ExchangeError::Validation("amount must be >= 1".into()));
    }

    let user_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
        .bind(body.user_id)
        .fetch_optional(&state.db.pool)
        .await?;
    if user_exists.is_none() {
        return Err(ExchangeError::UserNotFound);
    }

    if body.ticker != CASH_TICKER {
        let listed: Option<(String,)> =
            sqlx::query_as("SELECT ticker FROM instruments WHERE ticker = $1")
                .bind(&body.ticker)
                .fetch_optional(&state.db.pool)
                .await?;
        if listed.is_none() {
            return Err(ExchangeError::UnknownTicker(body.ticker.clone()));
        }
    }
    Ok(())
}
