//! Matching Engine
//!
//! Taker-initiated price-time-priority matching over the persistent
//! book. The engine runs entirely inside the controller's transaction:
//! it walks the opposing side best-first, locking one maker row at a
//! time, and for each fill settles both balances, bumps both fill
//! states and appends a trade row. Because every transaction walks the
//! book in the same canonical order, lock acquisition on maker rows is
//! cycle-free; the two balance rows of a fill are touched in a fixed
//! global order for the same reason.

use sqlx::PgConnection;
use std::time::Instant;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::metrics;
use crate::models::{Direction, Order, OrderStatus, OrderType, Trade, CASH_TICKER};
use crate::services::ledger;

/// Policy knobs resolved from configuration and the incoming command.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchPolicy {
    /// Skip makers owned by the taker.
    pub prevent_self_trade: bool,
    /// Cumulative spend budget for a MARKET BUY taker.
    pub max_notional: Option<i64>,
}

/// Match `taker` against the book until it is filled, the book is
/// exhausted, or no further fill is fundable. The taker must already be
/// persisted; its fill state is kept in sync with the store.
pub async fn run(
    conn: &mut PgConnection,
    taker: &mut Order,
    policy: MatchPolicy,
) -> Result<Vec<Trade>, ExchangeError> {
    let started = Instant::now();
    let mut trades = Vec::new();
    let mut spent: i64 = 0;

    while taker.remaining() > 0 {
        let maker = match next_maker(&mut *conn, taker, policy.prevent_self_trade).await? {
            Some(maker) => maker,
            None => break,
        };
        debug_assert!(maker.remaining() > 0);

        let price = match trade_price(maker.price, taker.price) {
            Some(price) => price,
            // Two market orders cannot discover a price.
            None => break,
        };

        let mut trade_qty = taker.remaining().min(maker.remaining());

        // A market buyer has no reservation; it pays out of live cash,
        // so the fill is capped by what it can fund right now (and by
        // any client-supplied notional budget).
        let market_buyer = buy_side(taker, &maker).order_type == OrderType::Market;
        if market_buyer {
            let buyer = buy_side(taker, &maker).user_id;
            let mut budget = ledger::lock(&mut *conn, buyer, CASH_TICKER).await?;
            if let Some(max_notional) = policy.max_notional {
                budget = budget.min(max_notional - spent);
            }
            trade_qty = trade_qty.min(budget / price);
        }
        if trade_qty <= 0 {
            break;
        }

        let notional = trade_qty
            .checked_mul(price)
            .ok_or_else(|| ExchangeError::Validation("trade notional overflows".into()))?;

        settle_fill(&mut *conn, taker, &maker, trade_qty, price, notional, market_buyer).await?;

        update_fill(&mut *conn, maker.id, trade_qty).await?;
        update_fill(&mut *conn, taker.id, trade_qty).await?;
        taker.filled += trade_qty;
        taker.status = if taker.filled == taker.qty {
            OrderStatus::Executed
        } else {
            OrderStatus::PartiallyExecuted
        };
        spent += notional;

        let trade = insert_trade(&mut *conn, &taker.ticker, trade_qty, price).await?;
        tracing::info!(
            "trade executed: {} {} @ {} (maker {}, taker {})",
            trade.qty,
            trade.ticker,
            trade.price,
            maker.id,
            taker.id
        );
        metrics::record_trade_executed(&trade.ticker, notional);
        trades.push(trade);
    }

    metrics::record_order_match_duration(started.elapsed().as_secs_f64());
    Ok(trades)
}

/// The printed price is the maker's limit; a market maker trades at the
/// taker's limit (price improvement always accrues to the taker). Two
/// market orders have no price and must not trade.
pub fn trade_price(maker_price: Option<i64>, taker_price: Option<i64>) -> Option<i64> {
    maker_price.or(taker_price)
}

fn buy_side<'a>(taker: &'a Order, maker: &'a Order) -> &'a Order {
    match taker.direction {
        Direction::Buy => taker,
        Direction::Sell => maker,
    }
}

fn sell_side<'a>(taker: &'a Order, maker: &'a Order) -> &'a Order {
    match taker.direction {
        Direction::Sell => taker,
        Direction::Buy => maker,
    }
}

/// Best opposing open maker under an exclusive row lock: best price
/// first, then oldest, then id for full determinism. Price-less
/// (market) makers sort behind every priced maker. A limit taker's own
/// price caps (BUY) or floors (SELL) the acceptable maker price, while
/// still admitting price-less makers, which trade at the taker's limit.
async fn next_maker(
    conn: &mut PgConnection,
    taker: &Order,
    prevent_self_trade: bool,
) -> Result<Option<Order>, ExchangeError> {
    let (price_cmp, price_order) = match taker.direction {
        Direction::Buy => ("<=", "ASC"),
        Direction::Sell => (">=", "DESC"),
    };
    let sql = format!(
        r#"
        SELECT id, user_id, order_type, direction, ticker, qty, price, status, filled, created_at
        FROM orders
        WHERE ticker = $1
          AND direction = $2
          AND status IN ('NEW', 'PARTIALLY_EXECUTED')
          AND filled < qty
          AND ($3::BIGINT IS NULL OR price IS NULL OR price {price_cmp} $3)
          AND ($4::UUID IS NULL OR user_id <> $4)
        ORDER BY price {price_order} NULLS LAST, created_at ASC, id ASC
        LIMIT 1
        FOR UPDATE
        "#
    );

    let excluded_user = if prevent_self_trade {
        Some(taker.user_id)
    } else {
        None
    };

    let maker: Option<Order> = sqlx::query_as(&sql)
        .bind(&taker.ticker)
        .bind(taker.direction.opposite())
        .bind(taker.price)
        .bind(excluded_user)
        .fetch_optional(conn)
        .await?;
    Ok(maker)
}

/// Cash returned to a limit buyer whose reservation was taken at its
/// own limit price but whose fill printed better. Zero when the buyer
/// is the maker (a fill always prints at the maker's price) or a market
/// order (nothing was reserved).
fn reservation_excess(buyer: &Order, fill_price: i64, trade_qty: i64) -> i64 {
    match (buyer.order_type, buyer.price) {
        (OrderType::Limit, Some(limit)) if limit > fill_price => {
            (limit - fill_price).saturating_mul(trade_qty)
        }
        _ => 0,
    }
}

/// Settle one fill: the buyer receives the instrument, the seller
/// receives the cash notional, a limit buyer gets back the spread
/// between its reserved price and the printed price, and a market buyer
/// pays the notional out of its live cash (reserved buyers paid at
/// order entry). Balance rows are touched in `(ticker, user)` order so
/// two concurrent mirrored fills cannot deadlock on them.
async fn settle_fill(
    conn: &mut PgConnection,
    taker: &Order,
    maker: &Order,
    trade_qty: i64,
    price: i64,
    notional: i64,
    market_buyer: bool,
) -> Result<(), ExchangeError> {
    let buyer_order = buy_side(taker, maker);
    let buyer = buyer_order.user_id;
    let seller = sell_side(taker, maker).user_id;

    let mut moves: Vec<(&str, Uuid, i64)> = Vec::with_capacity(4);
    moves.push((taker.ticker.as_str(), buyer, trade_qty));
    moves.push((CASH_TICKER, seller, notional));
    if market_buyer {
        moves.push((CASH_TICKER, buyer, -notional));
    }
    let excess = reservation_excess(buyer_order, price, trade_qty);
    if excess > 0 {
        moves.push((CASH_TICKER, buyer, excess));
    }
    moves.sort();

    for (ticker, user_id, delta) in moves {
        if delta < 0 {
            ledger::debit(&mut *conn, user_id, ticker, -delta).await?;
        } else {
            ledger::credit(&mut *conn, user_id, ticker, delta).await?;
        }
    }
    Ok(())
}

/// Bump an order's fill state; EXECUTED exactly when filled reaches
/// qty. Only called for open orders inside a fill, so it never touches
/// a terminal status.
async fn update_fill(
    conn: &mut PgConnection,
    order_id: Uuid,
    delta: i64,
) -> Result<(), ExchangeError> {
    sqlx::query(
        r#"
        UPDATE orders
        SET filled = filled + $2,
            status = CASE
                WHEN filled + $2 >= qty THEN 'EXECUTED'::order_status
                ELSE 'PARTIALLY_EXECUTED'::order_status
            END
        WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(delta)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_trade(
    conn: &mut PgConnection,
    ticker: &str,
    qty: i64,
    price: i64,
) -> Result<Trade, ExchangeError> {
    let trade: Trade = sqlx::query_as(
        r#"
        INSERT INTO trades (id, ticker, qty, price)
        VALUES ($1, $2, $3, $4)
        RETURNING id, ticker, qty, price, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(ticker)
    .bind(qty)
    .bind(price)
    .fetch_one(conn)
    .await?;
    Ok(trade)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maker_limit_price_wins() {
        // Resting ask at 90, taker bid at 100: prints at 90.
        assert_eq!(trade_price(Some(90), Some(100)), Some(90));
    }

    #[test]
    fn test_market_maker_trades_at_taker_limit() {
        assert_eq!(trade_price(None, Some(100)), Some(100));
    }

    #[test]
    fn test_limit_maker_vs_market_taker() {
        assert_eq!(trade_price(Some(90), None), Some(90));
    }

    #[test]
    fn test_two_market_orders_never_price() {
        assert_eq!(trade_price(None, None), None);
    }

    #[test]
    fn test_market_buy_cap_is_floor_division() {
        // 250 cash at price 100 funds exactly 2 units.
        let budget: i64 = 250;
        let price: i64 = 100;
        assert_eq!(budget / price, 2);
        // Below one unit the fill is capped to zero and matching exits.
        assert_eq!(99 / price, 0);
    }

    #[test]
    fn test_settlement_moves_sort_in_global_order() {
        let buyer = Uuid::from_u128(2);
        let seller = Uuid::from_u128(1);
        let mut moves: Vec<(&str, Uuid, i64)> = vec![
            ("BTC", buyer, 3),
            (CASH_TICKER, seller, 300),
            (CASH_TICKER, buyer, -300),
        ];
        moves.sort();
        // Ordered by asset, then user; a debit sorts before a credit on
        // the same row.
        assert_eq!(moves[0], ("BTC", buyer, 3));
        assert_eq!(moves[1], (CASH_TICKER, seller, 300));
        assert_eq!(moves[2], (CASH_TICKER, buyer, -300));
    }

    #[test]
    fn test_reservation_excess_refunds_the_spread() {
        use chrono::Utc;
        let buyer = Order {
            id: Uuid::from_u128(1),
            user_id: Uuid::from_u128(2),
            order_type: OrderType::Limit,
            direction: Direction::Buy,
            ticker: "BTC".into(),
            qty: 10,
            price: Some(100),
            status: OrderStatus::New,
            filled: 0,
            created_at: Utc::now(),
        };
        // Reserved at 100, filled at 90: 10 per unit comes back.
        assert_eq!(reservation_excess(&buyer, 90, 10), 100);
        // Filled at its own limit: nothing to return.
        assert_eq!(reservation_excess(&buyer, 100, 10), 0);

        let market_buyer = Order {
            order_type: OrderType::Market,
            price: None,
            ..buyer
        };
        assert_eq!(reservation_excess(&market_buyer, 90, 10), 0);
    }

    #[test]
    fn test_self_trade_debit_sorts_before_credit() {
        let user = Uuid::from_u128(7);
        let mut moves: Vec<(&str, Uuid, i64)> =
            vec![(CASH_TICKER, user, 300), (CASH_TICKER, user, -300)];
        moves.sort();
        assert_eq!(moves[0].2, -300);
    }
}
