//! Infrastructure layer for Flowgate.
//!
//! Concrete implementations of the ports defined in `flowgate-core`:
//! YAML lifetime storage, configuration loading, capability modules, and the
//! repository-change trigger plumbing (git polling, GitHub webhooks).

pub mod capability;
pub mod config;
pub mod filesystem;
pub mod workflow;
