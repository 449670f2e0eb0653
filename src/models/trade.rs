use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single execution. Immutable once written; the trade log is the
/// exchange's public tape and deliberately carries no party identities.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub ticker: String,
    pub qty: i64,
    pub price: i64,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}
