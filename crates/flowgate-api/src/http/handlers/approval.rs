//! Approval link and webform submission handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use flowgate_types::approval::ApprovalResult;

use crate::http::error::AppError;
use crate::state::AppState;

const EXPIRED: &str = "Approval link is invalid or has expired";

/// GET /api/approve/{uid}/{step_id} - Approve a waiting step.
pub async fn approve(
    State(state): State<AppState>,
    Path((uid, step_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let run_id = parse_uid(&uid)?;
    if !state.transport.resolve(run_id, &step_id, ApprovalResult::Approved) {
        return Err(AppError::NotFound(EXPIRED.to_string()));
    }
    tracing::info!(%run_id, %step_id, "approval granted");
    Ok(Json(json!({
        "status": "approved",
        "workflow_uid": run_id,
        "step_id": step_id,
    })))
}

/// POST /{module}/{uid}/{step_id}/submit - Submit a webform.
///
/// The JSON body becomes the step's form data; an empty body submits `{}`.
pub async fn submit_form(
    State(state): State<AppState>,
    Path((module, uid, step_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let run_id = parse_uid(&uid)?;
    let form_data = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid form data: {e}")))?
    };

    if !state
        .transport
        .resolve(run_id, &step_id, ApprovalResult::Submitted { form_data })
    {
        return Err(AppError::NotFound(EXPIRED.to_string()));
    }
    tracing::info!(%run_id, %step_id, %module, "webform submitted");
    Ok(Json(json!({
        "status": "submitted",
        "workflow_uid": run_id,
        "step_id": step_id,
    })))
}

fn parse_uid(uid: &str) -> Result<Uuid, AppError> {
    uid.parse()
        .map_err(|_| AppError::NotFound(EXPIRED.to_string()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use flowgate_types::approval::ApprovalRequest;

    use crate::http::router::build_router;
    use crate::state::test_support::test_app;

    use super::*;

    fn register(state: &AppState, run_id: Uuid, step_id: &str) {
        state.transport.register(&ApprovalRequest {
            run_id,
            step_id: step_id.into(),
            timeout_minutes: 30,
            message: "ok?".into(),
            approval_link: String::new(),
            delivery_step: None,
            context_snapshot: Map::new(),
        });
    }

    #[tokio::test]
    async fn approve_link_works_once() {
        let app = test_app();
        let run_id = Uuid::now_v7();
        register(&app.state, run_id, "gate");
        let router = build_router(app.state.clone());

        let uri = format!("/api/approve/{run_id}/gate");
        let response = router
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "approved");

        let again = router
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_or_malformed_links_are_not_found() {
        let app = test_app();
        let router = build_router(app.state.clone());
        for uri in [format!("/api/approve/{}/gate", Uuid::now_v7()), "/api/approve/not-a-uid/gate".to_string()] {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["status"], "error");
        }
    }

    #[tokio::test]
    async fn form_submission_closes_the_route() {
        let app = test_app();
        let run_id = Uuid::now_v7();
        register(&app.state, run_id, "details");
        let router = build_router(app.state.clone());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/forms/{run_id}/details/submit"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"size":"large"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!app.state.transport.is_open(run_id, "details"));

        register(&app.state, run_id, "details");
        let bad = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/forms/{run_id}/details/submit"))
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert!(app.state.transport.is_open(run_id, "details"));
    }
}
