//! HTTP request handlers, one module per resource.

pub mod approval;
pub mod control;
pub mod runs;
pub mod status;
