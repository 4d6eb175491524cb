//! Workflow engine and coordination subsystems for Flowgate.
//!
//! This crate defines the repository traits the infrastructure layer
//! implements. It depends only on `flowgate-types`, never on
//! `flowgate-infra` or any filesystem-backed store.

pub mod repository;
pub mod workflow;
