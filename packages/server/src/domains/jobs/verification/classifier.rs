//! Pure classification of one probe outcome into a liveness status.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::probe::ProbeOutcome;
use crate::kernel::resilient_http::FetchError;

/// Liveness states for a probed application URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessStatus {
    /// Resolved on the requested path.
    Alive,
    /// 404 or 410: the posting is gone.
    Dead,
    /// Redirected onto a generic landing page; the specific posting
    /// disappeared and the site bounced the visitor to a catch-all.
    DeadRedirect,
    /// Redirected to a specific destination; moved, not necessarily dead.
    Redirect,
    /// An HTTP status outside the recognized ranges.
    Error,
    /// Every attempt timed out.
    Timeout,
    /// DNS failure, refused connection, malformed URL, TLS failure.
    FetchError,
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessStatus::Alive => write!(f, "alive"),
            LivenessStatus::Dead => write!(f, "dead"),
            LivenessStatus::DeadRedirect => write!(f, "dead-redirect"),
            LivenessStatus::Redirect => write!(f, "redirect"),
            LivenessStatus::Error => write!(f, "error"),
            LivenessStatus::Timeout => write!(f, "timeout"),
            LivenessStatus::FetchError => write!(f, "fetch-error"),
        }
    }
}

lazy_static! {
    /// Ordered path rules for generic landing pages, evaluated top to
    /// bottom. Extend this list rather than branching inside `classify`.
    static ref GENERIC_LANDING_PATHS: Vec<Regex> = vec![
        Regex::new(r"(?i)^/$").expect("valid landing-page pattern"),
        Regex::new(r"(?i)^/careers?/?$").expect("valid landing-page pattern"),
        Regex::new(r"(?i)^/search-jobs/?$").expect("valid landing-page pattern"),
        Regex::new(r"(?i)^/job-search/?$").expect("valid landing-page pattern"),
        Regex::new(r"(?i)^/404/?$").expect("valid landing-page pattern"),
        Regex::new(r"(?i)^/not-found/?$").expect("valid landing-page pattern"),
    ];
}

/// Classifier output, not yet attached to a candidate.
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: LivenessStatus,
    pub http_status: Option<u16>,
    pub final_url: Option<String>,
    pub error_detail: Option<String>,
}

impl Classification {
    fn status_only(status: LivenessStatus) -> Self {
        Self {
            status,
            http_status: None,
            final_url: None,
            error_detail: None,
        }
    }
}

fn is_generic_landing_path(path: &str) -> bool {
    GENERIC_LANDING_PATHS.iter().any(|rule| rule.is_match(path))
}

/// Map one raw probe outcome to a liveness status.
///
/// Decision order: timeout/cancellation, other fetch errors, definitive
/// 404/410, successful statuses (with redirect-path analysis), everything
/// else. A redirect that lands on the requested path (scheme upgrade, query
/// rewrite) counts as alive - it is not a liveness signal.
pub fn classify(requested: &Url, outcome: &ProbeOutcome) -> Classification {
    match outcome {
        ProbeOutcome::Failed(FetchError::Timeout) | ProbeOutcome::Failed(FetchError::Canceled) => {
            Classification::status_only(LivenessStatus::Timeout)
        }
        ProbeOutcome::Failed(error) => Classification {
            error_detail: Some(error.to_string()),
            ..Classification::status_only(LivenessStatus::FetchError)
        },
        ProbeOutcome::Response(response) => {
            let code = response.status.as_u16();
            let final_url = Some(response.final_url.to_string());
            match code {
                404 | 410 => Classification {
                    http_status: Some(code),
                    final_url,
                    ..Classification::status_only(LivenessStatus::Dead)
                },
                200..=399 => {
                    let final_path = response.final_url.path();
                    let status = if requested.path() == final_path {
                        LivenessStatus::Alive
                    } else if is_generic_landing_path(final_path) {
                        LivenessStatus::DeadRedirect
                    } else {
                        LivenessStatus::Redirect
                    };
                    Classification {
                        http_status: Some(code),
                        final_url,
                        ..Classification::status_only(status)
                    }
                }
                _ => Classification {
                    http_status: Some(code),
                    final_url,
                    ..Classification::status_only(LivenessStatus::Error)
                },
            }
        }
    }
}
