use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, middleware as axum_middleware, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod db;
mod error;
mod metrics;
mod models;
mod services;

use crate::config::AppConfig;
use crate::db::Database;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spot_exchange_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting spot exchange backend v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.init_schema().await?;
    tracing::info!("Database connected");

    // One-shot admin bootstrap, before the listener starts
    auth::bootstrap_admin(&db.pool, &config).await?;

    // Install the Prometheus recorder
    let metrics_handle = metrics::init_metrics();

    // Build application state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        metrics: metrics_handle,
    });

    // Build router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(api::middleware::metrics_middleware))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Spot Exchange API. All endpoints live under /api/v1."
    }))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}
