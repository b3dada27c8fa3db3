//! Resilient outbound HTTP.
//!
//! Wraps a single outbound call with a bounded per-attempt timeout,
//! cooperative cancellation, exponential backoff with jitter across retries,
//! and coalescing of identical in-flight idempotent requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Browser-like user agent: many corporate career sites reject obvious
/// non-browser clients outright.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Base delay before the first retry; doubles each attempt.
const BACKOFF_BASE_MS: u64 = 500;

/// Error taxonomy for a resilient request.
///
/// `Clone` so coalesced callers can each receive their own copy of a shared
/// attempt's failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Every attempt exceeded the per-attempt timeout.
    #[error("request timed out")]
    Timeout,
    /// The caller's cancellation signal fired. Never retried.
    #[error("request canceled by caller")]
    Canceled,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// DNS failure, refused connection, TLS failure and friends.
    #[error("request failed: {0}")]
    Request(String),
}

/// Owned snapshot of a settled response, taken after redirects resolve.
///
/// Cheap to clone, so one in-flight probe can satisfy many coalesced
/// callers. Callers that need bodies or streaming go through
/// [`ResilientClient::inner`].
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: Url,
}

/// Options for a single resilient request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Retries after the first attempt; only transient failures consume them.
    pub retries: u32,
    /// Budget for each individual attempt.
    pub timeout: Duration,
    /// Coalesce with an identical in-flight GET instead of issuing a second
    /// network call.
    pub dedupe: bool,
    /// Caller-initiated cancellation; always wins over retry logic.
    pub cancel: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            retries: 2,
            timeout: Duration::from_millis(10_000),
            dedupe: true,
            cancel: None,
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<FetchedResponse, FetchError>>>;

/// HTTP client with retry, per-attempt timeout, cancellation and request
/// coalescing.
///
/// The in-flight map is process-wide mutable state; the mutex matters on a
/// multi-threaded runtime and is never held across an await point.
#[derive(Clone)]
pub struct ResilientClient {
    client: reqwest::Client,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl ResilientClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Access to the raw client for callers that need bodies or streaming.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Issue one resilient request against `target`.
    ///
    /// Identical idempotent requests already in flight are joined rather
    /// than repeated (the first caller's options drive the shared attempt).
    /// Caller cancellation propagates immediately and is never retried;
    /// attempt timeouts are transient and retried within budget.
    pub async fn request(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<FetchedResponse, FetchError> {
        let url = Url::parse(target)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", target, e)))?;

        if options.method == Method::GET && options.dedupe {
            return self.request_coalesced(url, options).await;
        }

        let cancel = options.cancel.clone();
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(FetchError::Canceled),
                    result = self.request_with_retries(url, options) => result,
                }
            }
            None => self.request_with_retries(url, options).await,
        }
    }

    /// Join an identical in-flight GET, or start one on a detached task.
    ///
    /// The task survives any individual caller's cancellation and clears its
    /// own map entry once settled, so a later call issues a fresh request.
    async fn request_coalesced(
        &self,
        url: Url,
        options: RequestOptions,
    ) -> Result<FetchedResponse, FetchError> {
        let key = url.to_string();
        let cancel = options.cancel.clone();

        let shared = {
            let mut in_flight = self.in_flight.lock().expect("in-flight map mutex poisoned");
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let this = self.clone();
                    let task_url = url.clone();
                    let task_key = key.clone();
                    let task_options = RequestOptions {
                        cancel: None,
                        ..options.clone()
                    };
                    let handle = tokio::spawn(async move {
                        let result = this.request_with_retries(task_url, task_options).await;
                        this.in_flight
                            .lock()
                            .expect("in-flight map mutex poisoned")
                            .remove(&task_key);
                        result
                    });

                    let fetch: SharedFetch = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(FetchError::Request(format!("request task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), fetch.clone());
                    fetch
                }
            }
        };

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(FetchError::Canceled),
                    result = shared => result,
                }
            }
            None => shared.await,
        }
    }

    async fn request_with_retries(
        &self,
        url: Url,
        options: RequestOptions,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let last = attempt >= options.retries;
            match self.attempt(&url, &options).await {
                // 5xx is transient; anything below 500 goes back to the
                // caller as-is, including 4xx rejections.
                Ok(response) if response.status.is_server_error() && !last => {
                    tracing::debug!(
                        url = %url,
                        status = %response.status,
                        attempt,
                        "server error, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(error @ FetchError::Canceled) | Err(error @ FetchError::InvalidUrl(_)) => {
                    return Err(error)
                }
                Err(error) => {
                    if last {
                        return Err(error);
                    }
                    tracing::debug!(url = %url, error = %error, attempt, "transient failure, retrying");
                }
            }

            tokio::time::sleep(backoff_delay(attempt)).await;
            attempt += 1;
        }
    }

    /// One bounded attempt: send, follow redirects, snapshot the outcome.
    async fn attempt(
        &self,
        url: &Url,
        options: &RequestOptions,
    ) -> Result<FetchedResponse, FetchError> {
        let response = self
            .client
            .request(options.method.clone(), url.clone())
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Request(error.to_string())
                }
            })?;

        Ok(FetchedResponse {
            status: response.status(),
            final_url: response.url().clone(),
        })
    }
}

impl Default for ResilientClient {
    fn default() -> Self {
        Self::new().expect("Failed to create ResilientClient")
    }
}

/// Exponential backoff with a uniform ±25% jitter, so synchronized callers
/// hitting the same downstream host spread their retries out.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt));
    let jitter = 0.75 + fastrand::f64() * 0.5;
    Duration::from_millis(((base as f64) * jitter).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        format!("http://{}", addr)
    }

    fn counting_route(
        path: &str,
        hits: Arc<AtomicUsize>,
        respond: impl Fn(usize) -> StatusCode + Clone + Send + Sync + 'static,
    ) -> Router {
        Router::new().route(
            path,
            get(move || {
                let hits = hits.clone();
                let respond = respond.clone();
                async move {
                    let hit = hits.fetch_add(1, Ordering::SeqCst);
                    respond(hit)
                }
            }),
        )
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = counting_route("/flaky", hits.clone(), |hit| {
            if hit < 2 {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            }
        });
        let base = serve(app).await;

        let client = ResilientClient::default();
        let response = client
            .request(&format!("{}/flaky", base), RequestOptions::default())
            .await
            .expect("succeeds on final attempt");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = counting_route("/forbidden", hits.clone(), |_| StatusCode::FORBIDDEN);
        let base = serve(app).await;

        let client = ResilientClient::default();
        let response = client
            .request(&format!("{}/forbidden", base), RequestOptions::default())
            .await
            .expect("4xx is a response, not an error");

        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_server_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = counting_route("/down", hits.clone(), |_| StatusCode::BAD_GATEWAY);
        let base = serve(app).await;

        let client = ResilientClient::default();
        let response = client
            .request(
                &format!("{}/down", base),
                RequestOptions {
                    retries: 1,
                    ..RequestOptions::default()
                },
            )
            .await
            .expect("HTTP-level failures surface as the last response");

        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_consumes_the_full_retry_budget() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/hang",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    StatusCode::OK
                }
            }),
        );
        let base = serve(app).await;

        let client = ResilientClient::default();
        let error = client
            .request(
                &format!("{}/hang", base),
                RequestOptions {
                    timeout: Duration::from_millis(100),
                    retries: 2,
                    dedupe: false,
                    ..RequestOptions::default()
                },
            )
            .await
            .expect_err("every attempt times out");

        assert_eq!(error, FetchError::Timeout);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn coalesces_identical_in_flight_gets() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/slow",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    StatusCode::OK
                }
            }),
        );
        let base = serve(app).await;
        let url = format!("{}/slow", base);

        let client = ResilientClient::default();
        let (first, second) = tokio::join!(
            client.request(&url, RequestOptions::default()),
            client.request(&url, RequestOptions::default()),
        );

        assert_eq!(first.expect("first caller resolves").status, StatusCode::OK);
        assert_eq!(second.expect("second caller resolves").status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The entry is gone once the shared attempt settles: a fresh call
        // issues a fresh request.
        client
            .request(&url, RequestOptions::default())
            .await
            .expect("fresh request after settle");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_wins_and_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/hang",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    StatusCode::OK
                }
            }),
        );
        let base = serve(app).await;

        let client = ResilientClient::default();
        let token = CancellationToken::new();
        let trigger = token.clone();

        let hang_url = format!("{}/hang", base);
        let (result, _) = tokio::join!(
            client.request(
                &hang_url,
                RequestOptions {
                    retries: 3,
                    dedupe: false,
                    cancel: Some(token),
                    ..RequestOptions::default()
                },
            ),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            },
        );

        assert_eq!(result.expect_err("canceled"), FetchError::Canceled);
        // No retry fires after cancellation.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_detaches_one_caller_from_a_shared_probe() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/slow",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    StatusCode::OK
                }
            }),
        );
        let base = serve(app).await;
        let url = format!("{}/slow", base);

        let client = ResilientClient::default();
        let token = CancellationToken::new();
        let trigger = token.clone();

        let (canceled, survivor, _) = tokio::join!(
            client.request(
                &url,
                RequestOptions {
                    cancel: Some(token),
                    ..RequestOptions::default()
                },
            ),
            client.request(&url, RequestOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            },
        );

        assert_eq!(canceled.expect_err("canceled caller"), FetchError::Canceled);
        assert_eq!(
            survivor.expect("shared probe keeps running").status,
            StatusCode::OK
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_any_attempt() {
        let client = ResilientClient::default();
        let error = client
            .request("not a url", RequestOptions::default())
            .await
            .expect_err("unparseable target");
        assert!(matches!(error, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        for attempt in 0..4 {
            let base = BACKOFF_BASE_MS * 2u64.pow(attempt);
            let delay = backoff_delay(attempt).as_millis() as u64;
            assert!(delay >= base * 3 / 4, "attempt {} too short", attempt);
            assert!(delay <= base * 5 / 4, "attempt {} too long", attempt);
        }
    }
}
