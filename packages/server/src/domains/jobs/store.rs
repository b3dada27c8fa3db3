//! Seam to the posting store consumed by verification.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::JobPosting;
use super::verification::VerificationCandidate;
use crate::common::JobPostingId;

/// The slice of the data store verification needs: candidates in, removal
/// timestamps out. Swappable for tests and for other backing stores.
#[async_trait]
pub trait JobPostingStore: Send + Sync {
    async fn load_candidates(
        &self,
        company: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VerificationCandidate>>;

    async fn mark_removed(&self, id: JobPostingId, detected_at: DateTime<Utc>) -> Result<()>;
}

pub struct PostgresJobPostingStore {
    pool: PgPool,
}

impl PostgresJobPostingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobPostingStore for PostgresJobPostingStore {
    async fn load_candidates(
        &self,
        company: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VerificationCandidate>> {
        let postings = JobPosting::find_active(company, limit, offset, &self.pool).await?;
        Ok(postings
            .into_iter()
            .map(|posting| VerificationCandidate {
                id: posting.id,
                title: posting.title,
                company_name: posting.company_name,
                raw_url: posting.url,
            })
            .collect())
    }

    async fn mark_removed(&self, id: JobPostingId, detected_at: DateTime<Utc>) -> Result<()> {
        JobPosting::mark_removed(id, detected_at, &self.pool).await
    }
}
