//! Observability bootstrap for Flowgate: tracing subscriber and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
