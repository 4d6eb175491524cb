//! HTTP transport for Flowgate.
//!
//! Axum routes for run starts, workflow uploads, approval links, webform
//! submissions, control commands and status reads. Errors render as
//! `{ "status": "error", "message": ... }`.

pub mod error;
pub mod handlers;
pub mod router;
