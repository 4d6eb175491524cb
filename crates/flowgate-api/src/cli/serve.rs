//! `flowgate serve`: boot the engine stack and the HTTP transport.
//!
//! Boot order:
//! 1. config and directories
//! 2. lifetime writer over the YAML repository
//! 3. approval coordinator, result listener, transport
//! 4. capability registry (built-ins plus module manifests)
//! 5. recovery of in-flight runs
//! 6. trigger wiring and the cron tick loop
//! 7. axum server until Ctrl+C / SIGTERM

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flowgate_core::workflow::approval::ApprovalCoordinator;
use flowgate_core::workflow::definition::discover_workflows;
use flowgate_core::workflow::engine::{EngineDeps, EngineSettings};
use flowgate_core::workflow::lifetime::{LifetimeStore, WriterSettings};
use flowgate_core::workflow::recovery::{RecoveryReport, recover_runs};
use flowgate_core::workflow::registry::{RunLauncher, RunRegistry};
use flowgate_infra::capability::{builtin_registry, load_module_manifests};
use flowgate_infra::config::load_config;
use flowgate_infra::filesystem::YamlLifetimeRepository;
use flowgate_infra::workflow::triggers::{TriggerService, TriggerSummary};

use crate::http::router::build_router;
use crate::state::AppState;
use crate::transport::ApprovalTransport;

/// Everything `boot` started, so it can be served and then stopped.
pub struct Runtime {
    pub state: AppState,
    pub lifetime: LifetimeStore,
    pub recovery: RecoveryReport,
    pub triggers: TriggerSummary,
    cancel: CancellationToken,
    /// Cron and poll loops; they stop on `cancel`.
    loops: Vec<JoinHandle<()>>,
    /// Channel consumers; aborted once everything is flushed.
    consumers: Vec<JoinHandle<()>>,
}

/// Wire every service under `home` and recover in-flight runs.
pub async fn boot(home: &Path) -> anyhow::Result<Runtime> {
    let config = load_config(home).await;
    let dirs = config.directories.resolve(home);
    for dir in [&dirs.workflows, &dirs.modules, &dirs.lifetimes] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    tracing::info!(home = %home.display(), "flowgate home resolved");

    let lifetimes = Arc::new(YamlLifetimeRepository::new(&dirs.lifetimes));
    let (lifetime, _writer) = LifetimeStore::spawn(Arc::clone(&lifetimes), WriterSettings::from(&config.engine));

    let (coordinator, requests) = ApprovalCoordinator::channel();
    let coordinator = Arc::new(
        coordinator.with_ceiling(config.engine.approval_ceiling()),
    );
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let listener = Arc::clone(&coordinator).spawn_result_listener(results_rx);
    let transport = Arc::new(ApprovalTransport::new(results_tx));
    let registrations = Arc::clone(&transport).spawn(requests);

    let mut capabilities = builtin_registry(&dirs.modules);
    let manifests = load_module_manifests(&mut capabilities, &dirs.modules).await;
    tracing::info!(manifests, modules = ?capabilities.modules(), "capability modules registered");

    let deps = EngineDeps {
        lifetime: lifetime.clone(),
        approvals: coordinator,
        capabilities: Arc::new(capabilities),
        settings: Arc::new(EngineSettings::from(&config)),
    };
    let launcher = RunLauncher::new(deps, Arc::new(RunRegistry::new()));

    let recovery = recover_runs(&*lifetimes, &launcher)
        .await
        .context("failed to recover runs")?;

    let cancel = CancellationToken::new();
    let workflows = discover_workflows(&dirs.workflows, &config.app.ignored_workflow_dirs);
    tracing::info!(count = workflows.len(), "workflows discovered");
    let service = TriggerService::new(launcher.clone(), config.app.base_url.clone(), cancel.clone());
    let (triggers, mut loops) = service.install(&workflows).await;
    loops.push(service.spawn_cron_loop(Duration::from_secs(config.engine.cron_tick_secs.max(1))));

    let state = AppState {
        config: Arc::new(config),
        workflows_dir: dirs.workflows,
        launcher,
        transport,
        lifetimes,
        cron: Arc::clone(service.cron()),
    };

    Ok(Runtime {
        state,
        lifetime,
        recovery,
        triggers,
        cancel,
        loops,
        consumers: vec![listener, registrations],
    })
}

impl Runtime {
    /// Stop trigger loops and flush pending checkpoints.
    ///
    /// Live runs are not awaited; their last checkpoint is what the next
    /// boot recovers from.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.loops {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "trigger loop ended abnormally");
            }
        }
        self.lifetime.flush().await;
        for handle in self.consumers {
            handle.abort();
        }
        tracing::info!(live_runs = self.state.launcher.registry().len(), "flowgate stopped");
    }
}

/// Serve HTTP until `shutdown` resolves.
pub async fn serve(
    home: &Path,
    host: Option<String>,
    port: Option<u16>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let runtime = boot(home).await?;
    let app = &runtime.state.config.app;
    let addr = format!(
        "{}:{}",
        host.as_deref().unwrap_or(&app.host),
        port.unwrap_or(app.port)
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        resumed = runtime.recovery.resumed.len(),
        scheduled = runtime.triggers.scheduled.len(),
        polled = runtime.triggers.polled.len(),
        webhooks = runtime.triggers.webhooks.len(),
        "flowgate listening"
    );
    println!("  Flowgate listening on http://{addr}");
    println!("  Press Ctrl+C to stop");

    let router = build_router(runtime.state.clone());
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await;

    runtime.shutdown().await;
    println!("\n  Server stopped.");
    result.context("HTTP server failed")
}
