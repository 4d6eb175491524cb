//! Run status and system status handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use flowgate_core::repository::lifetime::LifetimeRepository;
use flowgate_types::lifetime::RunStatusView;

use crate::http::error::AppError;
use crate::state::AppState;

/// Header carrying the access key of agent-initiated runs.
pub const ACCESS_KEY_HEADER: &str = "X-Access-Key";

/// GET /api/status/{uid} - Status of a run, active or completed.
pub async fn run_status(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RunStatusView>, AppError> {
    let not_found = || AppError::NotFound(format!("Workflow run '{uid}' not found"));
    let run_id: Uuid = uid.parse().map_err(|_| not_found())?;
    let stored = state.lifetimes.get(run_id).await?.ok_or_else(not_found)?;

    if let Some(expected) = stored.record.access_key.as_deref() {
        let provided = headers
            .get(ACCESS_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {ACCESS_KEY_HEADER} header")))?;
        if !access_key_matches(provided, expected) {
            tracing::warn!(%run_id, "status request with wrong access key");
            return Err(AppError::Forbidden("Invalid access key".to_string()));
        }
    }

    Ok(Json(RunStatusView::from(&stored.record)))
}

/// Compare access keys in constant time.
fn access_key_matches(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

/// GET /api/system/status - Live runs, open approval routes and cron entries.
pub async fn system_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "live_runs": state.launcher.registry().live_runs(),
        "pending_approvals": state.transport.pending(),
        "scheduled": state.cron.len(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use flowgate_core::workflow::definition::parse_workflow_yaml;

    use crate::http::router::build_router;
    use crate::state::test_support::{TestApp, test_app};

    use super::*;

    async fn get(router: axum::Router, uri: String, key: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header(ACCESS_KEY_HEADER, key);
        }
        let response = router.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn wait_until_done(app: &TestApp, run_id: Uuid) {
        let registry = app.state.launcher.registry();
        for _ in 0..200 {
            if !registry.is_live(run_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        app.lifetime.flush().await;
    }

    #[tokio::test]
    async fn completed_run_reports_results() {
        let app = test_app();
        let definition = parse_workflow_yaml(
            "workflow:\n  name: s\n  steps:\n    - { id: log, type: action, action: logger.Logger.info, input: { message: hi } }\n",
        )
        .unwrap();
        let started = app.state.launcher.start(definition, json!({})).unwrap();
        wait_until_done(&app, started.run_id).await;

        let router = build_router(app.state.clone());
        let (status, json) = get(router.clone(), format!("/api/status/{}", started.run_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["step_results"]["log"]["status"], "ok");

        let (status, _) = get(router, format!("/api/status/{}", Uuid::now_v7()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn agent_runs_require_their_access_key() {
        let app = test_app();
        let definition = parse_workflow_yaml(
            "workflow:\n  name: a\n  trigger: { type: aiagent }\n  steps:\n    - { id: log, type: action, action: logger.Logger.info, input: { message: hi } }\n",
        )
        .unwrap();
        let started = app.state.launcher.start(definition, json!({})).unwrap();
        let key = started.access_key.clone().unwrap();
        wait_until_done(&app, started.run_id).await;

        let router = build_router(app.state.clone());
        let uri = format!("/api/status/{}", started.run_id);
        assert_eq!(get(router.clone(), uri.clone(), None).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(get(router.clone(), uri.clone(), Some("agent-00000000")).await.0, StatusCode::FORBIDDEN);
        let (status, json) = get(router, uri, Some(&key)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn access_keys_compare_exactly() {
        assert!(access_key_matches("agent-1a2b3c4d", "agent-1a2b3c4d"));
        assert!(!access_key_matches("agent-1a2b3c4e", "agent-1a2b3c4d"));
        assert!(!access_key_matches("agent-1a2b3c4", "agent-1a2b3c4d"));
        assert!(!access_key_matches("", "agent-1a2b3c4d"));
    }

    #[tokio::test]
    async fn system_status_counts() {
        let app = test_app();
        let (status, json) = get(build_router(app.state.clone()), "/api/system/status".into(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["live_runs"], json!([]));
        assert_eq!(json["pending_approvals"], json!([]));
        assert_eq!(json["scheduled"], 0);
    }
}
