use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::JobPostingId;

/// JobPosting - a tracked listing whose external application URL we verify
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobPosting {
    pub id: JobPostingId,
    pub title: String,
    pub company_name: String,
    pub url: String,

    /// Set once a verification run classifies the link as dead.
    pub removal_detected_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl JobPosting {
    /// Find posting by ID
    pub async fn find_by_id(id: JobPostingId, pool: &PgPool) -> Result<Self> {
        let posting = sqlx::query_as::<_, JobPosting>("SELECT * FROM job_postings WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(posting)
    }

    /// Find postings not yet flagged as removed, oldest first.
    pub async fn find_active(
        company: Option<&str>,
        limit: i64,
        offset: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let postings = sqlx::query_as::<_, JobPosting>(
            "SELECT * FROM job_postings \
             WHERE removal_detected_at IS NULL \
               AND ($1::text IS NULL OR company_name ILIKE '%' || $1 || '%') \
             ORDER BY created_at \
             LIMIT $2 OFFSET $3",
        )
        .bind(company)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(postings)
    }

    /// Record that the posting's external link no longer resolves.
    pub async fn mark_removed(
        id: JobPostingId,
        detected_at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query("UPDATE job_postings SET removal_detected_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(detected_at)
            .execute(pool)
            .await?;
        Ok(())
    }
}
