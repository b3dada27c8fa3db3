//! Offline link verification driver.
//!
//! Reads the active posting set and probes every application URL in batches,
//! printing one line per record. Unless --mark-dead is set nothing is
//! written: the run ends with a ready-to-paste bulk UPDATE for the dead ids.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use server_core::config::Config;
use server_core::domains::jobs::store::{JobPostingStore, PostgresJobPostingStore};
use server_core::domains::jobs::verification::{
    HttpLinkProber, LinkVerifier, LivenessStatus, VerifyOptions,
};
use server_core::kernel::resilient_http::ResilientClient;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "verify_links")]
#[command(about = "Probe every active posting URL and report dead links")]
struct Cli {
    /// Only check postings whose company name contains this substring
    #[arg(long)]
    company: Option<String>,

    /// Write removal timestamps for dead links instead of printing SQL
    #[arg(long)]
    mark_dead: bool,

    /// Concurrent probes per batch
    #[arg(long, default_value_t = 10)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let store: Arc<dyn JobPostingStore> = Arc::new(PostgresJobPostingStore::new(pool));
    let verifier = LinkVerifier::new(
        Arc::new(HttpLinkProber::new(ResilientClient::default())),
        store.clone(),
    );

    // Load the whole active set; the company filter runs in the verifier so
    // the progress total reflects what is actually probed.
    let candidates = store
        .load_candidates(None, i64::MAX, 0)
        .await
        .context("Failed to load candidates")?;

    println!(
        "Checking {} active postings (batches of {})...",
        candidates.len(),
        cli.batch_size
    );
    println!();

    let options = VerifyOptions {
        batch_size: cli.batch_size,
        mark_dead: cli.mark_dead,
        company: cli.company.clone(),
        on_verdict: Some(Box::new(|index, total, candidate, verdict| {
            let label = match verdict.status {
                LivenessStatus::Alive => "alive".green(),
                LivenessStatus::Dead | LivenessStatus::DeadRedirect => {
                    verdict.status.to_string().red()
                }
                LivenessStatus::Redirect => "redirect".yellow(),
                _ => verdict.status.to_string().dimmed(),
            };
            println!(
                "[{}/{}] {:<14} {} - {} ({})",
                index + 1,
                total,
                label,
                candidate.company_name.bold(),
                candidate.title,
                verdict.final_url.as_deref().unwrap_or(&candidate.raw_url),
            );
        })),
        ..VerifyOptions::default()
    };

    let report = verifier.verify(candidates, options).await;
    let summary = &report.summary;

    println!();
    println!("{}", "Verification complete".bold());
    println!(
        "  checked {}  alive {}  dead {}  redirect {}  error {}  timeout {}  marked {}",
        summary.checked,
        summary.alive,
        summary.dead,
        summary.redirect,
        summary.error,
        summary.timeout,
        summary.dead_marked,
    );

    let dead_ids: Vec<String> = report
        .results
        .iter()
        .filter(|verdict| {
            matches!(
                verdict.status,
                LivenessStatus::Dead | LivenessStatus::DeadRedirect
            )
        })
        .map(|verdict| format!("'{}'", verdict.candidate_id))
        .collect();

    if !cli.mark_dead && !dead_ids.is_empty() {
        println!();
        println!("{}", "-- Run to flag the dead postings:".dimmed());
        println!(
            "UPDATE job_postings SET removal_detected_at = NOW(), updated_at = NOW() WHERE id IN ({});",
            dead_ids.join(", ")
        );
    }

    Ok(())
}
