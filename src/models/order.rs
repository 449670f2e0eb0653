use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// Lifecycle: NEW -> PARTIALLY_EXECUTED -> EXECUTED, or any open state
/// -> CANCELLED. Terminal states are frozen; `filled` never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyExecuted,
    Executed,
    Cancelled,
}

impl OrderStatus {
    /// Open orders are the only ones visible to the book and the
    /// matching walk.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyExecuted)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_type: OrderType,
    pub direction: Direction,
    pub ticker: String,
    pub qty: i64,
    pub price: Option<i64>,
    pub status: OrderStatus,
    pub filled: i64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> i64 {
        self.qty - self.filled
    }
}

/// Incoming order body. The presence of `price` discriminates LIMIT from
/// MARKET; `max_notional` is only meaningful for MARKET BUY.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderBody {
    pub direction: Direction,
    pub ticker: String,
    pub qty: i64,
    pub price: Option<i64>,
    pub max_notional: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderBodyOut {
    pub direction: Direction,
    pub ticker: String,
    pub qty: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderOut {
    pub id: Uuid,
    pub status: OrderStatus,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub body: OrderBodyOut,
    pub filled: i64,
}

impl From<Order> for OrderOut {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            user_id: order.user_id,
            timestamp: order.created_at,
            body: OrderBodyOut {
                direction: order.direction,
                ticker: order.ticker,
                qty: order.qty,
                price: order.price,
            },
            filled: order.filled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_wire_names() {
        assert_eq!(serde_json::to_string(&Direction::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&Direction::Sell).unwrap(), "\"SELL\"");
        let parsed: Direction = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(parsed, Direction::Sell);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyExecuted).unwrap(),
            "\"PARTIALLY_EXECUTED\""
        );
        assert_eq!(
            serde_json::to_string(&OrderStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn test_open_vs_terminal() {
        assert!(OrderStatus::New.is_open());
        assert!(OrderStatus::PartiallyExecuted.is_open());
        assert!(OrderStatus::Executed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_body_discriminant_deserializes_both_forms() {
        let limit: PlaceOrderBody = serde_json::from_str(
            r#"{"direction": "BUY", "ticker": "BTC", "qty": 2, "price": 100}"#,
        )
        .unwrap();
        assert_eq!(limit.price, Some(100));

        let market: PlaceOrderBody =
            serde_json::from_str(r#"{"direction": "SELL", "ticker": "BTC", "qty": 2}"#).unwrap();
        assert!(market.price.is_none());
        assert!(market.max_notional.is_none());
    }

    #[test]
    fn test_order_out_omits_absent_price() {
        let out = OrderOut {
            id: Uuid::nil(),
            status: OrderStatus::New,
            user_id: Uuid::nil(),
            timestamp: Utc::now(),
            body: OrderBodyOut {
                direction: Direction::Buy,
                ticker: "BTC".into(),
                qty: 3,
                price: None,
            },
            filled: 0,
        };
        let json = serde_json::to_string(&out).unwrap();
        assert!(!json.contains("price"));
    }
}
