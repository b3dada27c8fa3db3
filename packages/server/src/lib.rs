// Job posting tracker - link verification core
//
// This crate provides the external-link liveness verification subsystem:
// resilient outbound probing, liveness classification, batch orchestration,
// and the HTTP surface that triggers it. The posting store itself is an
// external collaborator reached through the JobPostingStore seam.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
