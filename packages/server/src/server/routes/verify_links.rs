use axum::{
    extract::{Extension, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::domains::jobs::verification::VerifyOptions;
use crate::server::app::AppState;

/// Hard cap on candidates per request; the route runs under a 60 second
/// budget.
const MAX_LIMIT: i64 = 200;
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLinksParams {
    pub company: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub mark_dead: Option<bool>,
}

/// Trigger link verification for a slice of the active postings.
///
/// Always answers 200 with per-record verdicts - partial failure is the
/// normal case, not an error state of the endpoint. Only an unreachable
/// store produces a 500.
pub async fn verify_links_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<VerifyLinksParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let candidates = match state
        .store
        .load_candidates(params.company.as_deref(), limit, offset)
        .await
    {
        Ok(candidates) => candidates,
        Err(error) => {
            tracing::error!(error = %error, "failed to load verification candidates");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let report = state
        .verifier
        .verify(
            candidates,
            VerifyOptions {
                mark_dead: params.mark_dead.unwrap_or(false),
                ..VerifyOptions::default()
            },
        )
        .await;

    // Verification results must never be served from a cache.
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(report),
    )
        .into_response()
}
