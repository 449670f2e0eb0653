//! Application Configuration
//!
//! Loaded once at startup from environment variables (with `.env` support
//! via dotenvy in `main`). Everything except `DATABASE_URL` has a default.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string.
    pub database_url: String,

    /// HTTP listen port.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// If set, a user with this api key is created (or promoted) as ADMIN
    /// before the listener starts.
    #[serde(default)]
    pub admin_api_key: Option<String>,

    #[serde(default = "defaults::admin_name")]
    pub admin_name: String,

    /// Opt-in: also create the admin user lazily on first authenticated
    /// use of `ADMIN_API_KEY`. Off by default; the startup bootstrap is
    /// the recommended path.
    #[serde(default)]
    pub admin_auto_create: bool,

    /// CASH seeded to every newly registered user.
    #[serde(default = "defaults::initial_cash")]
    pub initial_cash: i64,

    /// When enabled, the matching walk skips makers owned by the taker.
    #[serde(default)]
    pub prevent_self_trade: bool,

    /// When enabled, MARKET BUY orders must carry an explicit
    /// `max_notional`; otherwise the per-fill cash cap applies.
    #[serde(default)]
    pub require_market_buy_notional: bool,
}

mod defaults {
    pub fn port() -> u16 {
        8080
    }

    pub fn admin_name() -> String {
        "admin".to_string()
    }

    pub fn initial_cash() -> i64 {
        100_000
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let cfg: AppConfig = serde_json::from_value(serde_json::json!({
            "database_url": "postgres://localhost/exchange"
        }))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.admin_name, "admin");
        assert_eq!(cfg.initial_cash, 100_000);
        assert!(!cfg.admin_auto_create);
        assert!(!cfg.prevent_self_trade);
        assert!(!cfg.require_market_buy_notional);
        assert!(cfg.admin_api_key.is_none());
    }
}
