//! Startup wiring of discovered workflows to their triggers.
//!
//! - `scheduled` -- an entry in the cron table
//! - `gitops` + `poll` -- a git poll loop
//! - `gitops` + `webhook` -- a push hook installed once; deliveries arrive
//!   through the HTTP start route
//!
//! `api`, `aiagent` and `ad-hoc` workflows need no wiring.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flowgate_core::workflow::definition::DiscoveredWorkflow;
use flowgate_core::workflow::registry::RunLauncher;
use flowgate_core::workflow::scheduler::{CronCallback, CronTable};
use flowgate_types::workflow::{GitTriggerMethod, TriggerSpec, WorkflowDefinition};

use super::git_poller::GitPoller;
use super::webhook::WebhookInstaller;

/// What `TriggerService::install` wired up, by workflow key (`repo/name`).
#[derive(Debug, Default)]
pub struct TriggerSummary {
    pub scheduled: Vec<String>,
    pub polled: Vec<String>,
    pub webhooks: Vec<String>,
    /// Workflows whose trigger could not be wired, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Owns the cron table, the git poller and the webhook installer.
pub struct TriggerService {
    launcher: RunLauncher,
    cron: Arc<CronTable>,
    poller: Arc<GitPoller>,
    installer: WebhookInstaller,
    base_url: String,
    cancel: CancellationToken,
}

impl TriggerService {
    pub fn new(launcher: RunLauncher, base_url: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            launcher,
            cron: Arc::new(CronTable::new()),
            poller: Arc::new(GitPoller::new()),
            installer: WebhookInstaller::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cancel,
        }
    }

    pub fn with_installer(mut self, installer: WebhookInstaller) -> Self {
        self.installer = installer;
        self
    }

    pub fn cron(&self) -> &Arc<CronTable> {
        &self.cron
    }

    /// Wire every workflow's trigger. Poll loops are returned so the caller
    /// can await them after cancelling.
    pub async fn install(&self, workflows: &[DiscoveredWorkflow]) -> (TriggerSummary, Vec<JoinHandle<()>>) {
        let mut summary = TriggerSummary::default();
        let mut handles = Vec::new();

        for wf in workflows {
            let key = format!("{}/{}", wf.repo, wf.name);
            match &wf.definition.trigger {
                Some(TriggerSpec::Scheduled { cron }) => {
                    let callback = cron_callback(self.launcher.clone(), wf.definition.clone());
                    match self.cron.schedule(key.clone(), cron, callback) {
                        Ok(_) => summary.scheduled.push(key),
                        Err(e) => {
                            tracing::warn!(workflow = %key, error = %e, "invalid schedule");
                            summary.failed.push((key, e.to_string()));
                        }
                    }
                }
                Some(TriggerSpec::Gitops(git)) if git.method == GitTriggerMethod::Poll => {
                    let launcher = self.launcher.clone();
                    let definition = wf.definition.clone();
                    let (repo, branch) = (git.repo.clone(), git.branch.clone());
                    let on_change = move |hash: String| {
                        start_run(
                            &launcher,
                            &definition,
                            json!({ "mode": "gitops", "repo": repo, "branch": branch, "fingerprint": hash }),
                        );
                    };
                    handles.push(Arc::clone(&self.poller).spawn_poll_loop(
                        key.clone(),
                        git.clone(),
                        on_change,
                        self.cancel.child_token(),
                    ));
                    summary.polled.push(key);
                }
                Some(TriggerSpec::Gitops(git)) => {
                    let callback_url = format!("{}/api/{}/{}", self.base_url, wf.repo, wf.name);
                    match self.installer.install(git, &callback_url).await {
                        Ok(_) => summary.webhooks.push(key),
                        Err(e) => {
                            tracing::warn!(workflow = %key, error = %e, "webhook installation failed");
                            summary.failed.push((key, e.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }

        tracing::info!(
            scheduled = summary.scheduled.len(),
            polled = summary.polled.len(),
            webhooks = summary.webhooks.len(),
            failed = summary.failed.len(),
            "triggers installed"
        );
        (summary, handles)
    }

    /// Start the cron tick loop.
    pub fn spawn_cron_loop(&self, tick: Duration) -> JoinHandle<()> {
        Arc::clone(&self.cron).spawn_tick_loop(tick, self.cancel.child_token())
    }
}

/// Start a run of `definition` each time the schedule fires.
pub fn cron_callback(launcher: RunLauncher, definition: WorkflowDefinition) -> CronCallback {
    Arc::new(move |_key: String, fired_at: chrono::DateTime<chrono::Utc>| {
        let launcher = launcher.clone();
        let definition = definition.clone();
        Box::pin(async move {
            start_run(
                &launcher,
                &definition,
                json!({ "mode": "scheduled", "fired_at": fired_at.to_rfc3339() }),
            );
        }) as BoxFuture<'static, ()>
    })
}

fn start_run(launcher: &RunLauncher, definition: &WorkflowDefinition, body: Value) {
    match launcher.start(definition.clone(), body) {
        Ok(started) => tracing::info!(workflow = %definition.name, run_id = %started.run_id, "triggered run started"),
        Err(e) => tracing::error!(workflow = %definition.name, error = %e, "failed to start triggered run"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::Utc;
    use tempfile::TempDir;

    use flowgate_core::repository::lifetime::{LifetimeRepository, RecordLocation};
    use flowgate_core::workflow::approval::ApprovalCoordinator;
    use flowgate_core::workflow::definition::parse_workflow_yaml;
    use flowgate_core::workflow::engine::{EngineDeps, EngineSettings};
    use flowgate_core::workflow::lifetime::{LifetimeStore, WriterSettings};
    use flowgate_core::workflow::registry::RunRegistry;
    use flowgate_types::lifetime::RunStatus;

    use crate::capability::builtin_registry;
    use crate::filesystem::YamlLifetimeRepository;

    fn discovered(name: &str, yaml: &str) -> DiscoveredWorkflow {
        DiscoveredWorkflow {
            repo: "ops".into(),
            name: name.into(),
            path: PathBuf::from(format!("ops/{name}.yaml")),
            definition: parse_workflow_yaml(yaml).unwrap(),
        }
    }

    fn launcher(dir: &TempDir) -> (RunLauncher, Arc<YamlLifetimeRepository>, LifetimeStore) {
        let repo = Arc::new(YamlLifetimeRepository::new(dir.path()));
        let (lifetime, _writer) = LifetimeStore::spawn(
            Arc::clone(&repo),
            WriterSettings {
                settle_delay: Duration::from_millis(1),
                archive_retry: Duration::from_secs(1),
            },
        );
        let (approvals, _requests) = ApprovalCoordinator::channel();
        let deps = EngineDeps {
            lifetime: lifetime.clone(),
            approvals: Arc::new(approvals),
            capabilities: Arc::new(builtin_registry("modules")),
            settings: Arc::new(EngineSettings::default()),
        };
        (RunLauncher::new(deps, Arc::new(RunRegistry::new())), repo, lifetime)
    }

    const NIGHTLY: &str = "workflow:\n  name: nightly\n  trigger: { type: scheduled, cron: \"0 3 * * *\" }\n  payload_parser:\n    - { path: payload.mode, var: mode }\n  steps:\n    - { id: log, type: action, action: logger.Logger.info, input: { message: tick } }\n";

    #[tokio::test]
    async fn wires_each_trigger_kind() {
        let dir = TempDir::new().unwrap();
        let (launcher, _repo, _lifetime) = launcher(&dir);
        let cancel = CancellationToken::new();
        let service = TriggerService::new(launcher, "http://localhost:5000/", cancel.clone());

        let workflows = vec![
            discovered("nightly", NIGHTLY),
            discovered(
                "broken",
                "workflow:\n  name: broken\n  trigger: { type: scheduled, cron: \"every fortnight\" }\n  steps:\n    - { id: a, type: action, action: logger.Logger.info }\n",
            ),
            discovered(
                "hook",
                "workflow:\n  name: hook\n  trigger: { type: gitops, method: webhook, repo: acme/infra }\n  steps:\n    - { id: a, type: action, action: logger.Logger.info }\n",
            ),
            discovered(
                "manual",
                "workflow:\n  name: manual\n  trigger: { type: api }\n  steps:\n    - { id: a, type: action, action: logger.Logger.info }\n",
            ),
        ];

        let (summary, handles) = service.install(&workflows).await;
        assert_eq!(summary.scheduled, vec!["ops/nightly".to_string()]);
        assert!(summary.polled.is_empty());
        assert!(summary.webhooks.is_empty());
        let failed: Vec<&str> = summary.failed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(failed, vec!["ops/broken", "ops/hook"]);
        assert!(handles.is_empty());
        assert_eq!(service.cron().expression("ops/nightly").as_deref(), Some("0 0 3 * * *"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn cron_callback_starts_a_run() {
        let dir = TempDir::new().unwrap();
        let (launcher, repo, lifetime) = launcher(&dir);
        let definition = parse_workflow_yaml(NIGHTLY).unwrap();

        let callback = cron_callback(launcher.clone(), definition);
        callback("ops/nightly".into(), Utc::now()).await;

        let registry = Arc::clone(launcher.registry());
        for _ in 0..200 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
        lifetime.flush().await;

        let entries = std::fs::read_dir(dir.path().join("completed")).unwrap();
        let names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        let uid = names[0].trim_end_matches(".yaml").parse().unwrap();
        let stored = repo.get(uid).await.unwrap().unwrap();
        assert_eq!(stored.location, RecordLocation::Completed);
        assert_eq!(stored.record.status(), RunStatus::Completed);
        assert_eq!(stored.record.context["mode"], "scheduled");
    }
}
