//! Axum router configuration with middleware.
//!
//! Static `/api/...` segments take priority over the `{repo}/{workflow}`
//! parameters, so repositories named `approve`, `agent`, `status` or
//! `system` cannot be started over HTTP.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Approvals
        .route("/approve/{uid}/{step_id}", get(handlers::approval::approve))
        // Control
        .route("/agent/{run_id}/{action}", post(handlers::control::control_run))
        .route(
            "/agent/{run_id}/{action}/{step_id}",
            post(handlers::control::control_step),
        )
        // Status
        .route("/status/{uid}", get(handlers::status::run_status))
        .route("/system/status", get(handlers::status::system_status))
        // Run start / upload
        .route(
            "/{repo}/{workflow}",
            post(handlers::runs::start_run).put(handlers::runs::upload_workflow),
        );

    Router::new()
        .nest("/api", api_routes)
        .route(
            "/{module}/{uid}/{step_id}/submit",
            post(handlers::approval::submit_form),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
