//! Exchange Error Types
//!
//! Single error enum shared by the ledger, matching engine, order
//! controller and HTTP handlers. Each variant maps to a stable error
//! code and an HTTP status; the JSON body shape is `{error, code}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("admin privileges required")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("insufficient funds: need {needed} {ticker}, have {available}")]
    InsufficientFunds {
        ticker: String,
        needed: i64,
        available: i64,
    },

    #[error("order not found")]
    OrderNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("order is already in a terminal state")]
    CannotCancel,

    #[error("conflicting concurrent update, please retry")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ExchangeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ExchangeError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ExchangeError::Forbidden => StatusCode::FORBIDDEN,
            ExchangeError::Validation(_)
            | ExchangeError::InsufficientFunds { .. }
            | ExchangeError::CannotCancel => StatusCode::BAD_REQUEST,
            ExchangeError::UnknownTicker(_)
            | ExchangeError::OrderNotFound
            | ExchangeError::UserNotFound => StatusCode::NOT_FOUND,
            // Contention that survived the bounded retry is a server
            // condition, not a client error.
            ExchangeError::Conflict => StatusCode::SERVICE_UNAVAILABLE,
            ExchangeError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Unauthenticated => "UNAUTHENTICATED",
            ExchangeError::Forbidden => "FORBIDDEN",
            ExchangeError::Validation(_) => "VALIDATION",
            ExchangeError::UnknownTicker(_) => "UNKNOWN_TICKER",
            ExchangeError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ExchangeError::OrderNotFound => "ORDER_NOT_FOUND",
            ExchangeError::UserNotFound => "USER_NOT_FOUND",
            ExchangeError::CannotCancel => "CANNOT_CANCEL",
            ExchangeError::Conflict => "CONFLICT",
            ExchangeError::Database(_) => "INTERNAL",
        }
    }

    /// Whether the failure came from store-level contention that a fresh
    /// transaction attempt can resolve (serialization failure, deadlock,
    /// lock timeout).
    pub fn is_retriable(&self) -> bool {
        match self {
            ExchangeError::Database(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                Some("40001") | Some("40P01") | Some("55P03")
            ),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for ExchangeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ExchangeError::Validation(errors.to_string())
    }
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ExchangeError::Unauthenticated.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ExchangeError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ExchangeError::Validation("qty must be >= 1".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ExchangeError::UnknownTicker("DOGE".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ExchangeError::InsufficientFunds {
                ticker: "CASH".into(),
                needed: 100,
                available: 7,
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ExchangeError::OrderNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ExchangeError::CannotCancel.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ExchangeError::Conflict.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ExchangeError::Unauthenticated.code(), "UNAUTHENTICATED");
        assert_eq!(
            ExchangeError::UnknownTicker("X".into()).code(),
            "UNKNOWN_TICKER"
        );
        assert_eq!(ExchangeError::CannotCancel.code(), "CANNOT_CANCEL");
        assert_eq!(ExchangeError::Conflict.code(), "CONFLICT");
    }

    #[test]
    fn test_non_database_errors_are_not_retriable() {
        assert!(!ExchangeError::Conflict.is_retriable());
        assert!(!ExchangeError::OrderNotFound.is_retriable());
        assert!(!ExchangeError::Validation("x".into()).is_retriable());
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = ExchangeError::InsufficientFunds {
            ticker: "BTC".into(),
            needed: 5,
            available: 2,
        };
        assert_eq!(err.to_string(), "insufficient funds: need 5 BTC, have 2");
    }
}
