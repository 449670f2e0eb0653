//! Order Book View
//!
//! Read-only L2 projection of the resting limit orders: open quantity
//! grouped by price, bids descending, asks ascending. Plain snapshot
//! reads only; this path must never hold locks that would block
//! matching, so a view taken during a concurrent fill may trail it by
//! one commit.

use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::error::ExchangeError;
use crate::models::Direction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Level {
    pub price: i64,
    pub qty: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderBookSnapshot {
    pub bid_levels: Vec<Level>,
    pub ask_levels: Vec<Level>,
}

pub async fn snapshot(
    pool: &PgPool,
    ticker: &str,
    depth: usize,
) -> Result<OrderBookSnapshot, ExchangeError> {
    let bids = open_limit_quantities(pool, ticker, Direction::Buy).await?;
    let asks = open_limit_quantities(pool, ticker, Direction::Sell).await?;
    Ok(OrderBookSnapshot {
        bid_levels: aggregate_levels(&bids, depth, true),
        ask_levels: aggregate_levels(&asks, depth, false),
    })
}

async fn open_limit_quantities(
    pool: &PgPool,
    ticker: &str,
    side: Direction,
) -> Result<Vec<(i64, i64)>, ExchangeError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT price, qty - filled
        FROM orders
        WHERE ticker = $1
          AND direction = $2
          AND order_type = 'LIMIT'
          AND status IN ('NEW', 'PARTIALLY_EXECUTED')
          AND filled < qty
          AND price IS NOT NULL
        "#,
    )
    .bind(ticker)
    .bind(side)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sum open quantity per price and return the top `depth` levels, best
/// price first.
pub fn aggregate_levels(rows: &[(i64, i64)], depth: usize, descending: bool) -> Vec<Level> {
    let mut by_price: BTreeMap<i64, i64> = BTreeMap::new();
    for (price, qty) in rows {
        *by_price.entry(*price).or_insert(0) += qty;
    }
    let to_level = |(price, qty): (i64, i64)| Level { price, qty };
    if descending {
        by_price.into_iter().rev().map(to_level).take(depth).collect()
    } else {
        by_price.into_iter().map(to_level).take(depth).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_sums_same_price() {
        let rows = vec![(100, 5), (100, 2), (90, 1)];
        let levels = aggregate_levels(&rows, 10, false);
        assert_eq!(
            levels,
            vec![Level { price: 90, qty: 1 }, Level { price: 100, qty: 7 }]
        );
    }

    #[test]
    fn test_bids_descend_asks_ascend() {
        let rows = vec![(90, 1), (110, 2), (100, 3)];
        let bids = aggregate_levels(&rows, 10, true);
        assert_eq!(
            bids.iter().map(|l| l.price).collect::<Vec<_>>(),
            vec![110, 100, 90]
        );
        let asks = aggregate_levels(&rows, 10, false);
        assert_eq!(
            asks.iter().map(|l| l.price).collect::<Vec<_>>(),
            vec![90, 100, 110]
        );
    }

    #[test]
    fn test_depth_truncates_worst_levels() {
        let rows = vec![(90, 1), (110, 2), (100, 3), (120, 4)];
        let bids = aggregate_levels(&rows, 2, true);
        assert_eq!(
            bids.iter().map(|l| l.price).collect::<Vec<_>>(),
            vec![120, 110]
        );
        let asks = aggregate_levels(&rows, 2, false);
        assert_eq!(
            asks.iter().map(|l| l.price).collect::<Vec<_>>(),
            vec![90, 100]
        );
    }

    #[test]
    fn test_empty_book() {
        assert!(aggregate_levels(&[], 10, true).is_empty());
    }
}
