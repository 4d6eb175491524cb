//! Workflow trigger infrastructure.
//!
//! - `git_poller` -- shallow-clone polling with SHA-256 fingerprints
//! - `webhook` -- GitHub hook installation and signature verification
//! - `triggers` -- wiring of discovered workflows to cron, polling and webhooks

pub mod git_poller;
pub mod triggers;
pub mod webhook;
