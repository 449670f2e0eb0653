//! API Middleware
//!
//! HTTP metrics recording; authentication lives in `crate::auth`.

pub mod metrics;

pub use metrics::metrics_middleware;
