//! HTTP Metrics Middleware
//!
//! Records Prometheus metrics for every request: count and duration by
//! method, matched route and status, plus an in-flight gauge.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics;

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().to_string();
    // Prefer the matched route template over the raw path so ids do not
    // explode label cardinality.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    metrics::incr_http_requests_in_flight(1);
    let response = next.run(request).await;
    metrics::incr_http_requests_in_flight(-1);

    let duration = start.elapsed().as_secs_f64();
    metrics::record_http_request(&method, &path, response.status().as_u16(), duration);

    response
}
