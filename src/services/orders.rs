//! Order Controller
//!
//! The only writer that touches balances, orders and trades in one
//! transaction. A place is: reserve at entry, insert NEW, match, close
//! market leftover, commit; a cancel is: load under lock, refund the
//! unfilled reservation, mark CANCELLED. Store-level contention is
//! retried a bounded number of times with jitter before surfacing as a
//! conflict.

use rand::Rng;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ExchangeError;
use crate::metrics;
use crate::models::{
    Direction, Order, OrderStatus, OrderType, PlaceOrderBody, Trade, CASH_TICKER,
};
use crate::services::{ledger, matching};

const MAX_ATTEMPTS: u32 = 3;

/// Tagged place command, constructed from the wire body before any
/// state change. The presence of `price` discriminates LIMIT from
/// MARKET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceCommand {
    LimitBuy {
        ticker: String,
        qty: i64,
        price: i64,
    },
    LimitSell {
        ticker: String,
        qty: i64,
        price: i64,
    },
    MarketBuy {
        ticker: String,
        qty: i64,
        max_notional: Option<i64>,
    },
    MarketSell {
        ticker: String,
        qty: i64,
    },
}

impl PlaceCommand {
    pub fn parse(
        body: PlaceOrderBody,
        require_market_buy_notional: bool,
    ) -> Result<Self, ExchangeError> {
        if body.qty < 1 {
            return Err(ExchangeError::Validation("qty must be >= 1".into()));
        }
        match (body.direction, body.price) {
            (direction, Some(price)) => {
                if price < 1 {
                    return Err(ExchangeError::Validation("price must be >= 1".into()));
                }
                if body.max_notional.is_some() {
                    return Err(ExchangeError::Validation(
                        "max_notional is only valid for market buy orders".into(),
                    ));
                }
                body.qty.checked_mul(price).ok_or_else(|| {
                    ExchangeError::Validation("order notional overflows".into())
                })?;
                Ok(match direction {
                    Direction::Buy => PlaceCommand::LimitBuy {
                        ticker: body.ticker,
                        qty: body.qty,
                        price,
                    },
                    Direction::Sell => PlaceCommand::LimitSell {
                        ticker: body.ticker,
                        qty: body.qty,
                        price,
                    },
                })
            }
            (Direction::Buy, None) => {
                if let Some(max_notional) = body.max_notional {
                    if max_notional < 1 {
                        return Err(ExchangeError::Validation(
                            "max_notional must be >= 1".into(),
                        ));
                    }
                } else if require_market_buy_notional {
                    return Err(ExchangeError::Validation(
                        "market buy orders must supply max_notional".into(),
                    ));
                }
                Ok(PlaceCommand::MarketBuy {
                    ticker: body.ticker,
                    qty: body.qty,
                    max_notional: body.max_notional,
                })
            }
            (Direction::Sell, None) => {
                if body.max_notional.is_some() {
                    return Err(ExchangeError::Validation(
                        "max_notional is only valid for market buy orders".into(),
                    ));
                }
                Ok(PlaceCommand::MarketSell {
                    ticker: body.ticker,
                    qty: body.qty,
                })
            }
        }
    }

    pub fn ticker(&self) -> &str {
        match self {
            PlaceCommand::LimitBuy { ticker, .. }
            | PlaceCommand::LimitSell { ticker, .. }
            | PlaceCommand::MarketBuy { ticker, .. }
            | PlaceCommand::MarketSell { ticker, .. } => ticker,
        }
    }

    pub fn qty(&self) -> i64 {
        match self {
            PlaceCommand::LimitBuy { qty, .. }
            | PlaceCommand::LimitSell { qty, .. }
            | PlaceCommand::MarketBuy { qty, .. }
            | PlaceCommand::MarketSell { qty, .. } => *qty,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            PlaceCommand::LimitBuy { .. } | PlaceCommand::MarketBuy { .. } => Direction::Buy,
            PlaceCommand::LimitSell { .. } | PlaceCommand::MarketSell { .. } => Direction::Sell,
        }
    }

    pub fn order_type(&self) -> OrderType {
        match self {
            PlaceCommand::LimitBuy { .. } | PlaceCommand::LimitSell { .. } => OrderType::Limit,
            PlaceCommand::MarketBuy { .. } | PlaceCommand::MarketSell { .. } => OrderType::Market,
        }
    }

    pub fn price(&self) -> Option<i64> {
        match self {
            PlaceCommand::LimitBuy { price, .. } | PlaceCommand::LimitSell { price, .. } => {
                Some(*price)
            }
            _ => None,
        }
    }

    pub fn max_notional(&self) -> Option<i64> {
        match self {
            PlaceCommand::MarketBuy { max_notional, .. } => *max_notional,
            _ => None,
        }
    }

    /// Balance reserved at order entry: a limit buy locks cash for the
    /// full notional, every sell locks the instrument, a market buy
    /// locks nothing (each fill is capped against live cash instead).
    pub fn entry_reservation(&self) -> Option<(&str, i64)> {
        match self {
            // The notional multiplication was overflow-checked at parse.
            PlaceCommand::LimitBuy { qty, price, .. } => {
                Some((CASH_TICKER, qty.saturating_mul(*price)))
            }
            PlaceCommand::LimitSell { ticker, qty, .. }
            | PlaceCommand::MarketSell { ticker, qty } => Some((ticker, *qty)),
            PlaceCommand::MarketBuy { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct PlacedOrder {
    pub order: Order,
    pub trades: Vec<Trade>,
}

pub struct OrderService;

impl OrderService {
    pub async fn place(
        pool: &PgPool,
        config: &AppConfig,
        user_id: Uuid,
        body: PlaceOrderBody,
    ) -> Result<PlacedOrder, ExchangeError> {
        let cmd = PlaceCommand::parse(body, config.require_market_buy_notional)?;
        Self::ensure_listed(pool, cmd.ticker()).await?;

        // Advisory fast-fail before opening the transaction; the
        // authoritative check is the reservation inside it.
        if let Some((asset, amount)) = cmd.entry_reservation() {
            let mut conn = pool.acquire().await?;
            let available = ledger::get(&mut conn, user_id, asset).await?;
            if available < amount {
                return Err(ExchangeError::InsufficientFunds {
                    ticker: asset.to_string(),
                    needed: amount,
                    available,
                });
            }
        }

        metrics::record_order_submitted(
            &cmd.direction().to_string(),
            &cmd.order_type().to_string(),
        );

        let mut attempt = 0;
        loop {
            match Self::try_place(pool, config, user_id, &cmd).await {
                Err(err) if err.is_retriable() => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        tracing::warn!("place gave up after {} contended attempts", attempt);
                        return Err(ExchangeError::Conflict);
                    }
                    backoff(attempt).await;
                }
                other => return other,
            }
        }
    }

    pub async fn cancel(
        pool: &PgPool,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Order, ExchangeError> {
        let mut attempt = 0;
        let order = loop {
            match Self::try_cancel(pool, user_id, order_id).await {
                Err(err) if err.is_retriable() => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        tracing::warn!("cancel gave up after {} contended attempts", attempt);
                        return Err(ExchangeError::Conflict);
                    }
                    backoff(attempt).await;
                }
                other => break other?,
            }
        };
        metrics::record_order_cancelled();
        Ok(order)
    }

    async fn ensure_listed(pool: &PgPool, ticker: &str) -> Result<(), ExchangeError> {
        let listed: Option<(String,)> =
            sqlx::query_as("SELECT ticker FROM instruments WHERE ticker = $1")
                .bind(ticker)
                .fetch_optional(pool)
                .await?;
        match listed {
            Some(_) => Ok(()),
            None => Err(ExchangeError::UnknownTicker(ticker.to_string())),
        }
    }

    async fn try_place(
        pool: &PgPool,
        config: &AppConfig,
        user_id: Uuid,
        cmd: &PlaceCommand,
    ) -> Result<PlacedOrder, ExchangeError> {
        let mut tx = pool.begin().await?;

        // The taker's own balance row is the first lock this
        // transaction takes.
        if let Some((asset, amount)) = cmd.entry_reservation() {
            ledger::reserve(&mut tx, user_id, asset, amount).await?;
        }

        let mut order: Order = sqlx::query_as(
            r#"
            INSERT INTO orders (id, user_id, order_type, direction, ticker, qty, price, status, filled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'NEW', 0)
            RETURNING id, user_id, order_type, direction, ticker, qty, price, status, filled, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(cmd.order_type())
        .bind(cmd.direction())
        .bind(cmd.ticker())
        .bind(cmd.qty())
        .bind(cmd.price())
        .fetch_one(&mut *tx)
        .await?;

        let policy = matching::MatchPolicy {
            prevent_self_trade: config.prevent_self_trade,
            max_notional: cmd.max_notional(),
        };
        let trades = matching::run(&mut tx, &mut order, policy).await?;

        // Market leftover never rests on the book: close the order and
        // release whatever part of the reservation was not consumed.
        if order.order_type == OrderType::Market && order.filled < order.qty {
            if order.direction == Direction::Sell {
                ledger::refund(&mut tx, user_id, &order.ticker, order.remaining()).await?;
            }
            sqlx::query("UPDATE orders SET status = 'CANCELLED' WHERE id = $1")
                .bind(order.id)
                .execute(&mut *tx)
                .await?;
            order.status = OrderStatus::Cancelled;
        }

        tx.commit().await?;
        tracing::info!(
            "order placed: {} {} {} x{} ({} trades, status {:?})",
            order.id,
            order.direction,
            order.ticker,
            order.qty,
            trades.len(),
            order.status
        );
        Ok(PlacedOrder { order, trades })
    }

    async fn try_cancel(
        pool: &PgPool,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Order, ExchangeError> {
        let mut tx = pool.begin().await?;

        let order: Option<Order> = sqlx::query_as(
            r#"
            SELECT id, user_id, order_type, direction, ticker, qty, price, status, filled, created_at
            FROM orders
            WHERE id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut order = order.ok_or(ExchangeError::OrderNotFound)?;
        if order.status.is_terminal() {
            return Err(ExchangeError::CannotCancel);
        }

        if let Some((asset, amount)) = cancel_refund(&order) {
            ledger::refund(&mut tx, user_id, asset, amount).await?;
        }

        sqlx::query("UPDATE orders SET status = 'CANCELLED' WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        order.status = OrderStatus::Cancelled;

        tx.commit().await?;
        tracing::info!("order cancelled: {}", order.id);
        Ok(order)
    }
}

/// What cancelling an open order gives back: a buy limit releases cash
/// for the unfilled notional, a sell releases the unfilled instrument
/// quantity, a market buy reserved nothing.
fn cancel_refund(order: &Order) -> Option<(&str, i64)> {
    let unfilled = order.remaining();
    if unfilled <= 0 {
        return None;
    }
    match (order.direction, order.order_type, order.price) {
        (Direction::Buy, OrderType::Limit, Some(price)) => {
            Some((CASH_TICKER, unfilled.saturating_mul(price)))
        }
        (Direction::Sell, _, _) => Some((order.ticker.as_str(), unfilled)),
        _ => None,
    }
}

async fn backoff(attempt: u32) {
    let jitter: u64 = rand::thread_rng().gen_range(0..25);
    tokio::time::sleep(Duration::from_millis(attempt as u64 * 10 + jitter)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn body(direction: Direction, qty: i64, price: Option<i64>) -> PlaceOrderBody {
        PlaceOrderBody {
            direction,
            ticker: "BTC".into(),
            qty,
            price,
            max_notional: None,
        }
    }

    fn order(
        direction: Direction,
        order_type: OrderType,
        qty: i64,
        price: Option<i64>,
        filled: i64,
    ) -> Order {
        Order {
            id: Uuid::from_u128(1),
            user_id: Uuid::from_u128(2),
            order_type,
            direction,
            ticker: "BTC".into(),
            qty,
            price,
            status: if filled > 0 {
                OrderStatus::PartiallyExecuted
            } else {
                OrderStatus::New
            },
            filled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_price_presence_discriminates_type() {
        let limit = PlaceCommand::parse(body(Direction::Buy, 1, Some(100)), false).unwrap();
        assert_eq!(limit.order_type(), OrderType::Limit);
        let market = PlaceCommand::parse(body(Direction::Buy, 1, None), false).unwrap();
        assert_eq!(market.order_type(), OrderType::Market);
    }

    #[test]
    fn test_rejects_non_positive_qty_and_price() {
        assert!(PlaceCommand::parse(body(Direction::Buy, 0, Some(100)), false).is_err());
        assert!(PlaceCommand::parse(body(Direction::Sell, -3, None), false).is_err());
        assert!(PlaceCommand::parse(body(Direction::Buy, 1, Some(0)), false).is_err());
    }

    #[test]
    fn test_rejects_overflowing_notional() {
        let huge = body(Direction::Buy, i64::MAX, Some(2));
        assert!(PlaceCommand::parse(huge, false).is_err());
    }

    #[test]
    fn test_market_buy_notional_requirement() {
        assert!(PlaceCommand::parse(body(Direction::Buy, 1, None), true).is_err());

        let mut with_budget = body(Direction::Buy, 1, None);
        with_budget.max_notional = Some(500);
        let cmd = PlaceCommand::parse(with_budget, true).unwrap();
        assert_eq!(cmd.max_notional(), Some(500));
    }

    #[test]
    fn test_max_notional_rejected_outside_market_buy() {
        let mut limit = body(Direction::Buy, 1, Some(100));
        limit.max_notional = Some(500);
        assert!(PlaceCommand::parse(limit, false).is_err());

        let mut sell = body(Direction::Sell, 1, None);
        sell.max_notional = Some(500);
        assert!(PlaceCommand::parse(sell, false).is_err());
    }

    #[test]
    fn test_entry_reservation_amounts() {
        let limit_buy = PlaceCommand::parse(body(Direction::Buy, 4, Some(50)), false).unwrap();
        assert_eq!(limit_buy.entry_reservation(), Some((CASH_TICKER, 200)));

        let limit_sell = PlaceCommand::parse(body(Direction::Sell, 4, Some(50)), false).unwrap();
        assert_eq!(limit_sell.entry_reservation(), Some(("BTC", 4)));

        let market_sell = PlaceCommand::parse(body(Direction::Sell, 4, None), false).unwrap();
        assert_eq!(market_sell.entry_reservation(), Some(("BTC", 4)));

        let market_buy = PlaceCommand::parse(body(Direction::Buy, 4, None), false).unwrap();
        assert_eq!(market_buy.entry_reservation(), None);
    }

    #[test]
    fn test_cancel_refund_buy_limit_unfilled_notional() {
        // 4 @ 50 with 1 filled: 150 cash comes back.
        let order = order(Direction::Buy, OrderType::Limit, 4, Some(50), 1);
        assert_eq!(cancel_refund(&order), Some((CASH_TICKER, 150)));
    }

    #[test]
    fn test_cancel_refund_sell_unfilled_quantity() {
        let order = order(Direction::Sell, OrderType::Limit, 5, Some(100), 2);
        assert_eq!(cancel_refund(&order), Some(("BTC", 3)));
    }

    #[test]
    fn test_cancel_refund_market_buy_is_empty() {
        let order = order(Direction::Buy, OrderType::Market, 3, None, 0);
        assert_eq!(cancel_refund(&order), None);
    }

    #[test]
    fn test_cancel_refund_fully_filled_is_empty() {
        let order = order(Direction::Buy, OrderType::Limit, 4, Some(50), 4);
        assert_eq!(cancel_refund(&order), None);
    }
}
