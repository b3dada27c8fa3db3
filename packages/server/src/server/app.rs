//! Application setup and server configuration.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    middleware,
    routing::get,
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::domains::jobs::store::{JobPostingStore, PostgresJobPostingStore};
use crate::domains::jobs::verification::{HttpLinkProber, LinkVerifier};
use crate::kernel::rate_limit::RateLimiter;
use crate::kernel::resilient_http::ResilientClient;
use crate::server::middleware::{extract_client_ip, rate_limit_middleware, RouteLimit};
use crate::server::routes::{health_handler, verify_links_handler};

/// Verification holds connections open for most of a minute at worst;
/// anything beyond this is cut off.
const VERIFY_ROUTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: Arc<dyn JobPostingStore>,
    pub verifier: Arc<LinkVerifier>,
}

/// Build the Axum application router
pub fn build_app(pool: PgPool) -> Router {
    let store: Arc<dyn JobPostingStore> = Arc::new(PostgresJobPostingStore::new(pool.clone()));
    let prober = Arc::new(HttpLinkProber::new(ResilientClient::default()));
    let verifier = Arc::new(LinkVerifier::new(prober, store.clone()));

    let app_state = AppState {
        db_pool: pool,
        store,
        verifier,
    };

    // One process-wide limiter; admission keys carry the route name.
    let limiter = Arc::new(RateLimiter::new());
    let verify_policy = RouteLimit {
        route: "verify-links",
        limit: 10,
        window: Duration::from_secs(300),
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route(
            "/api/verify-links",
            get(verify_links_handler)
                .layer::<_, Infallible>(middleware::from_fn(move |request, next| {
                    rate_limit_middleware(limiter.clone(), verify_policy.clone(), request, next)
                }))
                .layer(TimeoutLayer::new(VERIFY_ROUTE_TIMEOUT)),
        )
        // Health check (no rate limit)
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(extract_client_ip))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
