//! HEAD-first probing of candidate URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::kernel::resilient_http::{
    FetchError, FetchedResponse, RequestOptions, ResilientClient,
};

/// Retries per probe request (two attempts). Dead hosts are common here; a
/// long retry tail on one record would stall its whole batch.
const PROBE_RETRIES: u32 = 1;

/// Raw result of probing a URL, before classification.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Response(FetchedResponse),
    Failed(FetchError),
}

/// Seam over the network probe so orchestration is testable offline.
#[async_trait]
pub trait LinkProber: Send + Sync {
    async fn probe(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> ProbeOutcome;
}

/// Probes with a cheap HEAD first and falls back to GET when the server
/// rejects or fails the HEAD. Misconfigured career sites commonly 405 or
/// drop HEAD requests while serving GET fine.
pub struct HttpLinkProber {
    client: ResilientClient,
}

impl HttpLinkProber {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    fn options(
        method: Method,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> RequestOptions {
        RequestOptions {
            method,
            retries: PROBE_RETRIES,
            timeout,
            dedupe: true,
            cancel,
        }
    }
}

#[async_trait]
impl LinkProber for HttpLinkProber {
    async fn probe(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> ProbeOutcome {
        let head = self
            .client
            .request(url.as_str(), Self::options(Method::HEAD, timeout, cancel.clone()))
            .await;

        let fall_back_to_get = match &head {
            // 404/410 from a HEAD is already a definitive answer.
            Ok(response) => {
                let code = response.status.as_u16();
                code >= 400 && code != 404 && code != 410
            }
            // The retry budget was already spent waiting; and cancellation
            // must not spawn new work.
            Err(FetchError::Timeout) | Err(FetchError::Canceled) => false,
            Err(_) => true,
        };

        if !fall_back_to_get {
            return match head {
                Ok(response) => ProbeOutcome::Response(response),
                Err(error) => ProbeOutcome::Failed(error),
            };
        }

        tracing::debug!(url = %url, "HEAD rejected, falling back to GET");
        match self
            .client
            .request(url.as_str(), Self::options(Method::GET, timeout, cancel))
            .await
        {
            Ok(response) => ProbeOutcome::Response(response),
            Err(error) => ProbeOutcome::Failed(error),
        }
    }
}
