//! Per-route fixed-window rate limiting.
//!
//! Each HTTP-exposed entry point declares its own (limit, window) pair; the
//! admission key is `route:client`, so one abusive caller cannot exhaust a
//! route for everyone else. Over-budget callers fail fast with 429 and a
//! Retry-After covering the full window.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};

use super::ip_extractor::ClientIp;
use crate::kernel::rate_limit::RateLimiter;

/// Admission policy for one route.
#[derive(Debug, Clone)]
pub struct RouteLimit {
    pub route: &'static str,
    pub limit: u32,
    pub window: Duration,
}

/// Middleware function for fixed-window rate limiting.
pub async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    policy: RouteLimit,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("{}:{}", policy.route, client);

    let decision = limiter.admit(&key, policy.limit, policy.window);
    if !decision.limited {
        return next.run(request).await;
    }

    tracing::warn!(route = policy.route, client = %client, "rate limit exceeded");

    let retry_after = policy.window.as_secs().max(1).to_string();
    let mut response = Response::new(Body::from("Too many requests"));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from_str(&retry_after).unwrap_or_else(|_| HeaderValue::from_static("60")),
    );
    response
}
