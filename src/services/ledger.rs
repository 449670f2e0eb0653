//! Ledger Service
//!
//! The only writer of balance rows. Enforces non-negative integer
//! balances; reservations are immediate debits, refunds are credits.
//! Every function runs on the caller's connection so reserve/credit
//! sequences stay inside the caller's transaction.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::ExchangeError;

/// Current balance, zero when the row does not exist. Does not
/// materialize a row and takes no lock.
pub async fn get(conn: &mut PgConnection, user_id: Uuid, ticker: &str) -> Result<i64, ExchangeError> {
    let (amount,): (i64,) = sqlx::query_as(
        "SELECT COALESCE((SELECT amount FROM balances WHERE user_id = $1 AND ticker = $2), 0)",
    )
    .bind(user_id)
    .bind(ticker)
    .fetch_one(conn)
    .await?;
    Ok(amount)
}

/// Load the balance under an exclusive row lock, held until the
/// enclosing transaction ends. Absent rows read as zero.
pub async fn lock(
    conn: &mut PgConnection,
    user_id: Uuid,
    ticker: &str,
) -> Result<i64, ExchangeError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT amount FROM balances WHERE user_id = $1 AND ticker = $2 FOR UPDATE")
            .bind(user_id)
            .bind(ticker)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(amount,)| amount).unwrap_or(0))
}

/// Decrement under lock; fails without touching the row when the
/// balance cannot cover the amount.
pub async fn debit(
    conn: &mut PgConnection,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
) -> Result<(), ExchangeError> {
    if amount == 0 {
        return Ok(());
    }
    let available = lock(&mut *conn, user_id, ticker).await?;
    if available < amount {
        return Err(ExchangeError::InsufficientFunds {
            ticker: ticker.to_string(),
            needed: amount,
            available,
        });
    }
    sqlx::query("UPDATE balances SET amount = amount - $3 WHERE user_id = $1 AND ticker = $2")
        .bind(user_id)
        .bind(ticker)
        .bind(amount)
        .execute(conn)
        .await?;
    Ok(())
}

/// Debit taken at order entry; the amount stays attached to the order
/// until it is spent by fills or released by cancel/leftover.
pub async fn reserve(
    conn: &mut PgConnection,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
) -> Result<(), ExchangeError> {
    tracing::debug!("reserve {} {} for user {}", amount, ticker, user_id);
    debit(conn, user_id, ticker, amount).await
}

/// Increment, creating the row when absent. Never fails for a valid
/// non-negative amount.
pub async fn credit(
    conn: &mut PgConnection,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
) -> Result<(), ExchangeError> {
    if amount == 0 {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO balances (user_id, ticker, amount)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, ticker) DO UPDATE SET
            amount = balances.amount + EXCLUDED.amount
        "#,
    )
    .bind(user_id)
    .bind(ticker)
    .bind(amount)
    .execute(conn)
    .await?;
    Ok(())
}

/// Credit releasing a reservation (cancel, market leftover). Same
/// effect as `credit`, kept separate for observability.
pub async fn refund(
    conn: &mut PgConnection,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
) -> Result<(), ExchangeError> {
    tracing::debug!("refund {} {} to user {}", amount, ticker, user_id);
    credit(conn, user_id, ticker, amount).await
}
