//! Run start and workflow upload handlers.
//!
//! `POST /api/{repo}/{workflow}` is also the delivery URL registered for
//! GitHub push webhooks, so signature checks and payload matching happen
//! here before a run is started.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Map, Value, json};

use flowgate_core::workflow::definition::{load_workflow_file, parse_workflow_yaml, validate_definition, workflow_path};
use flowgate_core::workflow::matcher::match_trigger;
use flowgate_infra::workflow::webhook::{SIGNATURE_HEADER, verify_github_signature};
use flowgate_types::workflow::{GitTriggerMethod, TriggerSpec, WorkflowDefinition};

use crate::http::error::AppError;
use crate::state::AppState;

/// POST /api/{repo}/{workflow} - Start a run with the request body as payload.
pub async fn start_run(
    State(state): State<AppState>,
    Path((repo, workflow)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let path = workflow_path(&state.workflows_dir, &repo, &workflow)
        .ok_or_else(|| AppError::NotFound(format!("Workflow '{repo}/{workflow}' not found")))?;
    let definition = load_workflow_file(&path)?;

    if let Some(secret) = webhook_secret(&definition) {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        verify_github_signature(secret, &body, signature).inspect_err(|e| {
            tracing::warn!(workflow = %definition.name, error = %e, "webhook signature rejected");
        })?;
    }

    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid JSON payload: {e}")))?
    };

    // Condition paths share the run context's `payload.` root.
    let document = json!({ "payload": &payload });
    if requires_match(&definition) && !match_trigger(&definition, &document) {
        tracing::info!(workflow = %definition.name, "payload did not match, run not started");
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "ignored", "message": "Payload did not match workflow conditions" })),
        ));
    }

    let started = state
        .launcher
        .start(definition, payload)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    tracing::info!(%repo, %workflow, run_id = %started.run_id, "run accepted");

    let mut response = json!({
        "status": "accepted",
        "workflow_uid": started.run_id,
    });
    if let Some(key) = started.access_key {
        response["access_key"] = json!(key);
    }
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// PUT /api/{repo}/{workflow} - Store an uploaded workflow document.
///
/// The document is validated first; an invalid upload is never written.
pub async fn upload_workflow(
    State(state): State<AppState>,
    Path((repo, workflow)): Path<(String, String)>,
    body: String,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if [&repo, &workflow]
        .iter()
        .any(|p| p.is_empty() || p.contains("..") || p.contains('/') || p.contains('\\'))
    {
        return Err(AppError::BadRequest("Invalid repository or workflow name".to_string()));
    }

    let definition = parse_workflow_yaml(&body)?;
    validate_definition(&definition)?;

    let dir = state.workflows_dir.join(&repo);
    let path = dir.join(format!("{workflow}.yaml"));
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create {}: {e}", dir.display())))?;
    tokio::fs::write(&path, body.as_bytes())
        .await
        .map_err(|e| AppError::Internal(format!("Failed to write {}: {e}", path.display())))?;

    tracing::info!(%repo, %workflow, name = %definition.name, "workflow uploaded");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "created",
            "repo": repo,
            "workflow": workflow,
            "name": definition.name,
        })),
    ))
}

fn webhook_secret(definition: &WorkflowDefinition) -> Option<&str> {
    match &definition.trigger {
        Some(TriggerSpec::Gitops(git)) if git.method == GitTriggerMethod::Webhook => {
            git.secret.as_deref().filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

/// Webhook deliveries and workflows with a `match` block must pass
/// `match_trigger`; plain API starts are unconditional.
fn requires_match(definition: &WorkflowDefinition) -> bool {
    matches!(
        &definition.trigger,
        Some(TriggerSpec::Gitops(git)) if git.method == GitTriggerMethod::Webhook
    ) || definition.match_block.is_some()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use flowgate_infra::workflow::webhook::compute_hmac_sha256_hex;

    use crate::http::router::build_router;
    use crate::state::test_support::test_app;

    use super::*;

    const DEPLOY: &str = "workflow:\n  name: deploy\n  trigger: { type: api }\n  steps:\n    - { id: log, type: action, action: logger.Logger.info, input: { message: hi } }\n";

    const AGENT: &str = "workflow:\n  name: agent\n  trigger: { type: aiagent }\n  steps:\n    - { id: log, type: action, action: logger.Logger.info, input: { message: hi } }\n";

    const HOOK: &str = r#"
workflow:
  name: push
  trigger: { type: gitops, method: webhook, repo: acme/infra, secret: s3cret }
  match:
    condition_logic: "is_main"
    conditions:
      - { id: is_main, path: payload.ref, operator: equals, value: refs/heads/main }
  steps:
    - { id: log, type: action, action: logger.Logger.info, input: { message: push } }
"#;

    async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn start_returns_accepted_with_run_id() {
        let app = test_app();
        app.write_workflow("ops", "deploy", DEPLOY);
        let router = build_router(app.state.clone());

        let (status, json) = send(router, post("/api/ops/deploy", r#"{"env":"prod"}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "accepted");
        assert!(json["workflow_uid"].is_string());
        assert!(json.get("access_key").is_none());
    }

    #[tokio::test]
    async fn agent_runs_get_an_access_key() {
        let app = test_app();
        app.write_workflow("ops", "agent", AGENT);
        let router = build_router(app.state.clone());

        let (status, json) = send(router, post("/api/ops/agent", "")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(json["access_key"].as_str().unwrap().starts_with("agent-"));
    }

    #[tokio::test]
    async fn missing_workflow_and_bad_payload() {
        let app = test_app();
        app.write_workflow("ops", "deploy", DEPLOY);
        let router = build_router(app.state.clone());

        let (status, _) = send(router.clone(), post("/api/ops/nope", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(router, post("/api/ops/deploy", "{oops")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn webhook_deliveries_are_verified_and_matched() {
        let app = test_app();
        app.write_workflow("infra", "push", HOOK);
        let router = build_router(app.state.clone());

        let main = r#"{"ref":"refs/heads/main"}"#;
        let (status, _) = send(router.clone(), post("/api/infra/push", main)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let signed = |body: &str| {
            let sig = compute_hmac_sha256_hex(b"s3cret", body.as_bytes()).unwrap();
            let mut request = post("/api/infra/push", body);
            request
                .headers_mut()
                .insert(SIGNATURE_HEADER, format!("sha256={sig}").parse().unwrap());
            request
        };

        let feature = r#"{"ref":"refs/heads/feature"}"#;
        let (status, json) = send(router.clone(), signed(feature)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");

        let (status, json) = send(router, signed(main)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "accepted");
    }

    #[tokio::test]
    async fn match_paths_resolve_under_payload() {
        let app = test_app();
        let guarded = "workflow:\n  name: guarded\n  trigger: { type: api }\n  match:\n    condition_logic: prod\n    conditions:\n      - { id: prod, path: payload.env, operator: equals, value: prod }\n  steps:\n    - { id: log, type: action, action: logger.Logger.info, input: { message: hi } }\n";
        let bare = guarded.replace("path: payload.env", "path: env").replace("name: guarded", "name: bare");
        app.write_workflow("ops", "guarded", guarded);
        app.write_workflow("ops", "bare", &bare);
        let router = build_router(app.state.clone());

        let (status, json) = send(router.clone(), post("/api/ops/guarded", r#"{"env":"prod"}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{json}");

        let (status, json) = send(router.clone(), post("/api/ops/guarded", r#"{"env":"dev"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");

        let (status, json) = send(router, post("/api/ops/bare", r#"{"env":"prod"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
    }

    #[tokio::test]
    async fn upload_validates_before_writing() {
        let app = test_app();
        let router = build_router(app.state.clone());
        let put = |uri: &str, body: &str| {
            Request::builder()
                .method("PUT")
                .uri(uri)
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let (status, json) = send(router.clone(), put("/api/ops/deploy", DEPLOY)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["name"], "deploy");
        assert!(app.state.workflows_dir.join("ops/deploy.yaml").is_file());

        let dupes = "workflow:\n  name: d\n  steps:\n    - { id: a, type: action, action: logger.Logger.info }\n    - { id: a, type: action, action: logger.Logger.info }\n";
        let (status, _) = send(router.clone(), put("/api/ops/dupes", dupes)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!app.state.workflows_dir.join("ops/dupes.yaml").exists());

        let (status, _) = send(router, put("/api/ops/..hidden", DEPLOY)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
