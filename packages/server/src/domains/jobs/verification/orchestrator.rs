//! Batch verification of candidate URLs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use url::Url;

use super::classifier::{classify, LivenessStatus};
use super::probe::LinkProber;
use super::{LivenessVerdict, VerificationCandidate};
use crate::domains::jobs::store::JobPostingStore;

/// Progress hook for operator tooling; called once per settled verdict with
/// (index, total, candidate, verdict).
pub type ProgressFn = dyn Fn(usize, usize, &VerificationCandidate, &LivenessVerdict) + Send + Sync;

pub struct VerifyOptions {
    /// Probes in flight at once; the next batch never starts before every
    /// probe of the current one has settled.
    pub batch_size: usize,
    /// Pause between batches, polite to downstream hosts and to our own
    /// outbound connection budget.
    pub inter_batch_delay: Duration,
    /// Per-attempt budget handed to the prober.
    pub per_request_timeout: Duration,
    /// Write a removal timestamp for every dead record.
    pub mark_dead: bool,
    /// Case-insensitive company-name substring filter, applied before
    /// batching.
    pub company: Option<String>,
    pub on_verdict: Option<Box<ProgressFn>>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay: Duration::from_millis(500),
            per_request_timeout: Duration::from_millis(12_000),
            mark_dead: false,
            company: None,
            on_verdict: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
    pub checked: usize,
    pub alive: usize,
    pub dead: usize,
    pub redirect: usize,
    pub error: usize,
    pub timeout: usize,
    pub dead_marked: usize,
}

impl VerificationSummary {
    /// Per-record verdicts keep the fine-grained status; the summary folds
    /// dead-redirect into dead and fetch-error into error.
    fn tally(&mut self, status: LivenessStatus) {
        match status {
            LivenessStatus::Alive => self.alive += 1,
            LivenessStatus::Dead | LivenessStatus::DeadRedirect => self.dead += 1,
            LivenessStatus::Redirect => self.redirect += 1,
            LivenessStatus::Error | LivenessStatus::FetchError => self.error += 1,
            LivenessStatus::Timeout => self.timeout += 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationReport {
    pub summary: VerificationSummary,
    pub results: Vec<LivenessVerdict>,
}

/// Drives the prober and classifier over a candidate list, one batch at a
/// time, and aggregates the verdicts.
pub struct LinkVerifier {
    prober: Arc<dyn LinkProber>,
    store: Arc<dyn JobPostingStore>,
}

impl LinkVerifier {
    pub fn new(prober: Arc<dyn LinkProber>, store: Arc<dyn JobPostingStore>) -> Self {
        Self { prober, store }
    }

    /// Verify every candidate: exactly one verdict each, in input order.
    ///
    /// Probes run concurrently within a fixed-size batch, so at most one
    /// batch's worth of outbound connections exists at any instant. A
    /// failing record is classified into its verdict and never aborts the
    /// run.
    pub async fn verify(
        &self,
        candidates: Vec<VerificationCandidate>,
        options: VerifyOptions,
    ) -> VerificationReport {
        let candidates: Vec<VerificationCandidate> = match &options.company {
            Some(needle) => {
                let needle = needle.to_lowercase();
                candidates
                    .into_iter()
                    .filter(|candidate| {
                        candidate.company_name.to_lowercase().contains(&needle)
                    })
                    .collect()
            }
            None => candidates,
        };

        let total = candidates.len();
        tracing::info!(
            candidates = total,
            batch_size = options.batch_size,
            mark_dead = options.mark_dead,
            "starting link verification"
        );

        let mut summary = VerificationSummary::default();
        let mut verdicts: Vec<LivenessVerdict> = Vec::with_capacity(total);

        let batch_size = options.batch_size.max(1);
        for (batch_index, batch) in candidates.chunks(batch_size).enumerate() {
            if batch_index > 0 && !options.inter_batch_delay.is_zero() {
                tokio::time::sleep(options.inter_batch_delay).await;
            }

            let probes = batch
                .iter()
                .map(|candidate| self.verify_one(candidate, options.per_request_timeout));
            let batch_verdicts = join_all(probes).await;

            for (candidate, verdict) in batch.iter().zip(batch_verdicts) {
                summary.tally(verdict.status);

                if options.mark_dead
                    && matches!(
                        verdict.status,
                        LivenessStatus::Dead | LivenessStatus::DeadRedirect
                    )
                {
                    // Fire-and-forget per candidate: a failed write-back is
                    // recovered by the next verification run.
                    match self.store.mark_removed(candidate.id, Utc::now()).await {
                        Ok(()) => summary.dead_marked += 1,
                        Err(error) => tracing::warn!(
                            candidate_id = %candidate.id,
                            error = %error,
                            "failed to mark posting removed"
                        ),
                    }
                }

                if let Some(on_verdict) = &options.on_verdict {
                    on_verdict(verdicts.len(), total, candidate, &verdict);
                }
                verdicts.push(verdict);
            }

            tracing::debug!(
                batch = batch_index + 1,
                settled = verdicts.len(),
                total,
                "batch settled"
            );
        }

        summary.checked = verdicts.len();
        tracing::info!(
            checked = summary.checked,
            alive = summary.alive,
            dead = summary.dead,
            redirect = summary.redirect,
            error = summary.error,
            timeout = summary.timeout,
            dead_marked = summary.dead_marked,
            "link verification complete"
        );

        VerificationReport {
            summary,
            results: verdicts,
        }
    }

    async fn verify_one(
        &self,
        candidate: &VerificationCandidate,
        timeout: Duration,
    ) -> LivenessVerdict {
        let normalized = normalize_url(&candidate.raw_url);
        let url = match Url::parse(&normalized) {
            Ok(url) => url,
            Err(error) => {
                return LivenessVerdict {
                    candidate_id: candidate.id,
                    status: LivenessStatus::FetchError,
                    http_status: None,
                    final_url: None,
                    error_detail: Some(format!("invalid url {}: {}", candidate.raw_url, error)),
                }
            }
        };

        let outcome = self.prober.probe(&url, timeout, None).await;
        let classification = classify(&url, &outcome);
        LivenessVerdict {
            candidate_id: candidate.id,
            status: classification.status,
            http_status: classification.http_status,
            final_url: classification.final_url,
            error_detail: classification.error_detail,
        }
    }
}

/// Prefix scheme-less URLs with https:// before probing.
fn normalize_url(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}
