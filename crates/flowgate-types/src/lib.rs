//! Shared domain types for Flowgate.
//!
//! Workflow documents, lifetime records, control commands, approval messages,
//! module manifests and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod control;
pub mod error;
pub mod lifetime;
pub mod manifest;
pub mod workflow;
