//! External-link liveness verification.
//!
//! Decides whether a third-party job application URL still points at a real
//! posting. Status codes alone are not enough: many applicant-tracking
//! systems answer dead posting URLs with a 200 after bouncing the visitor to
//! a generic careers hub, so classification also compares redirect paths.

pub mod classifier;
pub mod orchestrator;
pub mod probe;

pub use classifier::*;
pub use orchestrator::*;
pub use probe::*;

use serde::{Deserialize, Serialize};

use crate::common::JobPostingId;

/// One record to verify: a posting id plus the URL we hold for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCandidate {
    pub id: JobPostingId,
    pub title: String,
    pub company_name: String,
    pub raw_url: String,
}

/// The classified outcome of probing one candidate URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessVerdict {
    pub candidate_id: JobPostingId,
    pub status: LivenessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}
