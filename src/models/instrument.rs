use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The reserved cash ticker. Prices are denominated in it, every trade
/// settles instrument units against `qty * price` units of it, and it is
/// neither listable nor tradable as an instrument.
pub const CASH_TICKER: &str = "CASH";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Instrument {
    pub ticker: String,
    pub name: String,
}

/// Ticker validity for newly listed instruments: short uppercase
/// alphanumeric symbol, not the reserved cash ticker.
pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker.len() <= 12
        && ticker != CASH_TICKER
        && ticker
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_validity() {
        assert!(is_valid_ticker("BTC"));
        assert!(is_valid_ticker("MEMES2"));
        assert!(!is_valid_ticker(""));
        assert!(!is_valid_ticker("btc"));
        assert!(!is_valid_ticker("BTC-USD"));
        assert!(!is_valid_ticker("VERYLONGTICKER"));
    }

    #[test]
    fn test_cash_ticker_is_reserved() {
        assert!(!is_valid_ticker(CASH_TICKER));
    }
}
