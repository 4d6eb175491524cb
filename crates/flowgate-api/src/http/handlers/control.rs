//! Control commands for live runs.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use uuid::Uuid;

use flowgate_types::control::ControlCommand;

use crate::http::error::AppError;
use crate::state::AppState;

/// POST /api/agent/{run_id}/{action} - pause, resume or cancel a run.
pub async fn control_run(
    State(state): State<AppState>,
    Path((run_id, action)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let command = match action.as_str() {
        "pause" => ControlCommand::Pause,
        "resume" => ControlCommand::Resume,
        "cancel" => ControlCommand::Cancel,
        other => return Err(AppError::NotFound(format!("Unknown control action '{other}'"))),
    };
    queue(&state, &run_id, &action, command)
}

/// POST /api/agent/{run_id}/{action}/{step_id} - skip or jump to a step.
pub async fn control_step(
    State(state): State<AppState>,
    Path((run_id, action, step_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    let command = match action.as_str() {
        "skip" => ControlCommand::Skip { step_id },
        "jump" => ControlCommand::Jump { step_id },
        other => return Err(AppError::NotFound(format!("Unknown control action '{other}'"))),
    };
    queue(&state, &run_id, &action, command)
}

fn queue(state: &AppState, run_id: &str, action: &str, command: ControlCommand) -> Result<Json<Value>, AppError> {
    let run_id: Uuid = run_id
        .parse()
        .map_err(|_| AppError::NotFound(format!("Run '{run_id}' is not live")))?;
    state.launcher.registry().send(run_id, command)?;
    tracing::info!(%run_id, %action, "control command accepted");
    Ok(Json(json!({
        "status": "queued",
        "workflow_uid": run_id,
        "command": action,
    })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use flowgate_core::workflow::definition::parse_workflow_yaml;
    use flowgate_core::repository::lifetime::LifetimeRepository;
    use flowgate_types::lifetime::RunStatus;

    use crate::http::router::build_router;
    use crate::state::test_support::test_app;

    use super::*;

    const GATED: &str = "workflow:\n  name: gated\n  steps:\n    - { id: gate, type: approval, timeout_minutes: 5 }\n    - { id: log, type: action, action: logger.Logger.info, input: { message: after } }\n";

    fn post(uri: String) -> Request<Body> {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn commands_for_unknown_runs_are_not_found() {
        let app = test_app();
        let router = build_router(app.state.clone());
        let id = Uuid::now_v7();

        for uri in [
            format!("/api/agent/{id}/pause"),
            format!("/api/agent/{id}/skip/gate"),
            format!("/api/agent/not-a-uid/cancel"),
            format!("/api/agent/{id}/explode"),
        ] {
            let response = router.clone().oneshot(post(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn cancel_reaches_a_waiting_run() {
        let app = test_app();
        let definition = parse_workflow_yaml(GATED).unwrap();
        let started = app.state.launcher.start(definition, json!({})).unwrap();
        let run_id = started.run_id;

        for _ in 0..200 {
            if app.state.transport.is_open(run_id, "gate") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app.state.transport.is_open(run_id, "gate"));

        let router = build_router(app.state.clone());
        let response = router.oneshot(post(format!("/api/agent/{run_id}/cancel"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "queued");

        // The command lands at the next loop boundary, after the approval.
        assert!(app.state.transport.resolve(run_id, "gate", flowgate_types::approval::ApprovalResult::Approved));
        let registry = app.state.launcher.registry();
        for _ in 0..200 {
            if !registry.is_live(run_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.is_live(run_id));
        app.lifetime.flush().await;

        let stored = app.state.lifetimes.get(run_id).await.unwrap().unwrap();
        assert_eq!(stored.record.status(), RunStatus::Completed);
        assert!(stored.record.context["step_results"].get("log").is_none());
    }
}
