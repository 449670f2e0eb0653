//! Database Access
//!
//! Owns the Postgres connection pool and the idempotent schema bootstrap.
//! All balances, prices and quantities are integer (BIGINT) columns; the
//! enum columns use Postgres enum types mirrored by the model enums.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// One DDL statement per entry; each is safe to re-run.
const SCHEMA: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE user_role AS ENUM ('USER', 'ADMIN');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE order_side AS ENUM ('BUY', 'SELL');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE order_type AS ENUM ('LIMIT', 'MARKET');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE order_status AS ENUM ('NEW', 'PARTIALLY_EXECUTED', 'EXECUTED', 'CANCELLED');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        role user_role NOT NULL DEFAULT 'USER',
        api_key TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        ticker TEXT PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS balances (
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        ticker TEXT NOT NULL,
        amount BIGINT NOT NULL DEFAULT 0 CHECK (amount >= 0),
        PRIMARY KEY (user_id, ticker)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        order_type order_type NOT NULL,
        direction order_side NOT NULL,
        ticker TEXT NOT NULL,
        qty BIGINT NOT NULL CHECK (qty > 0),
        price BIGINT CHECK (price IS NULL OR price > 0),
        status order_status NOT NULL DEFAULT 'NEW',
        filled BIGINT NOT NULL DEFAULT 0 CHECK (filled >= 0 AND filled <= qty),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_book
        ON orders (ticker, direction, status, price, created_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trades (
        id UUID PRIMARY KEY,
        ticker TEXT NOT NULL,
        qty BIGINT NOT NULL CHECK (qty > 0),
        price BIGINT NOT NULL CHECK (price > 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_trades_ticker_time
        ON trades (ticker, created_at DESC)
    "#,
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create enum types, tables and indexes if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("database schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }
}
