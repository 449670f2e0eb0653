use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub user_id: Uuid,
    pub ticker: String,
    pub amount: i64,
}

/// Body of the admin deposit/withdraw endpoints.
#[derive(Debug, Deserialize)]
pub struct BalanceOp {
    pub user_id: Uuid,
    pub ticker: String,
    pub amount: i64,
}
