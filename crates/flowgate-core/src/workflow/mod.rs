//! Workflow engine core: step flow, run state, coordination and triggers.
//!
//! - `definition` -- YAML parsing, validation, discovery
//! - `path` / `template` / `matcher` -- payload paths, placeholders, the restricted evaluator
//! - `context` -- Run context owned by one run loop
//! - `flow` -- Step ordering, gating, jumps
//! - `control` -- Pause/resume/cancel/skip/jump inbox
//! - `approval` -- Blocking approval and webform coordination
//! - `lifetime` -- Single-writer checkpoint store
//! - `capability` -- Module actions and manifests
//! - `engine` -- The run loop
//! - `registry` -- Live runs and the launcher
//! - `recovery` -- Boot-time resume from checkpoints
//! - `scheduler` -- Cron trigger table

pub mod approval;
pub mod capability;
pub mod context;
pub mod control;
pub mod definition;
pub mod engine;
pub mod flow;
pub mod lifetime;
pub mod matcher;
pub mod path;
pub mod recovery;
pub mod registry;
pub mod scheduler;
pub mod template;
