//! Balance API Handler

use axum::{extract::State, Extension, Json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::error::ExchangeError;
use crate::models::Balance;
use crate::AppState;

/// All balances of the caller as a `{ticker: amount}` map. Reserved
/// amounts are already debited, so this is the freely usable balance.
/// GET /balance
pub async fn get_balances(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<BTreeMap<String, i64>>, ExchangeError> {
    let rows: Vec<Balance> =
        sqlx::query_as("SELECT user_id, ticker, amount FROM balances WHERE user_id = $1")
            .bind(auth_user.id)
            .fetch_all(&state.db.pool)
            .await?;
    Ok(Json(rows.into_iter().map(|b| (b.ticker, b.amount)).collect()))
}
