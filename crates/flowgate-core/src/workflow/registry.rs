//! Live-run registry and the launcher that feeds it.
//!
//! Every spawned run is entered into [`RunRegistry`] with its control sender
//! and removed when its loop returns, so control endpoints can only reach
//! runs that are actually executing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use uuid::Uuid;

use flowgate_types::control::ControlCommand;
use flowgate_types::lifetime::LifetimeRecord;
use flowgate_types::workflow::{TriggerKind, WorkflowDefinition};

use super::control::ControlSender;
use super::engine::{EngineDeps, EngineError, RunOptions, RunOutcome, WorkflowEngine};

const ACCESS_KEY_PREFIX: &str = "agent-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("run {0} is not live")]
    NotRunning(Uuid),

    #[error("run {0} stopped accepting control commands")]
    Closed(Uuid),
}

/// A live run as seen from outside its loop.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub control: ControlSender,
}

/// Process-wide table of live runs.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<Uuid, RunHandle>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: RunHandle) {
        self.runs.insert(handle.run_id, handle);
    }

    pub fn remove(&self, run_id: Uuid) -> Option<RunHandle> {
        self.runs.remove(&run_id).map(|(_, handle)| handle)
    }

    pub fn is_live(&self, run_id: Uuid) -> bool {
        self.runs.contains_key(&run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Ids of all live runs, sorted.
    pub fn live_runs(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.runs.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Forward a control command to a live run.
    pub fn send(&self, run_id: Uuid, command: ControlCommand) -> Result<(), RegistryError> {
        let control = self
            .runs
            .get(&run_id)
            .map(|h| h.control.clone())
            .ok_or(RegistryError::NotRunning(run_id))?;
        control
            .send(command)
            .map_err(|_| RegistryError::Closed(run_id))?;
        tracing::info!(%run_id, "control command queued");
        Ok(())
    }

    /// Register `engine` and run it on its own task. The entry is removed
    /// when the run loop returns.
    pub fn spawn(self: &Arc<Self>, engine: WorkflowEngine) -> JoinHandle<RunOutcome> {
        let run_id = engine.run_id();
        self.insert(RunHandle {
            run_id,
            workflow: engine.definition().name.clone(),
            started_at: Utc::now(),
            control: engine.control_handle(),
        });

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = engine.run().await;
            registry.remove(run_id);
            outcome
        })
    }
}

/// `agent-` followed by eight hex characters taken from the random tail of
/// a v7 uuid.
pub fn generate_access_key() -> String {
    let simple = Uuid::now_v7().simple().to_string();
    format!("{ACCESS_KEY_PREFIX}{}", &simple[simple.len() - 8..])
}

/// The document a run's payload rules are evaluated against.
pub fn payload_envelope(run_id: Uuid, body: Value) -> Value {
    json!({
        "payload": body,
        "workflow_uid": run_id.to_string(),
    })
}

/// Identity of a run that has just been started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRun {
    pub run_id: Uuid,
    pub access_key: Option<String>,
}

/// Builds engines from trigger input and hands them to the registry.
#[derive(Clone)]
pub struct RunLauncher {
    deps: EngineDeps,
    registry: Arc<RunRegistry>,
}

impl RunLauncher {
    pub fn new(deps: EngineDeps, registry: Arc<RunRegistry>) -> Self {
        Self { deps, registry }
    }

    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Construct and spawn a run of `definition` for a trigger `body`.
    ///
    /// Construction errors are returned to the caller; everything after
    /// that surfaces through the lifetime record.
    pub fn start(&self, definition: WorkflowDefinition, body: Value) -> Result<StartedRun, EngineError> {
        let run_id = Uuid::now_v7();
        let access_key =
            (definition.trigger_kind() == TriggerKind::Aiagent).then(generate_access_key);
        let payload = payload_envelope(run_id, body);
        let engine = WorkflowEngine::new(
            self.deps.clone(),
            definition,
            &payload,
            RunOptions {
                run_id: Some(run_id),
                access_key: access_key.clone(),
            },
        )?;
        self.registry.spawn(engine);
        Ok(StartedRun { run_id, access_key })
    }

    /// Rebuild a run from its checkpoint and spawn it.
    pub fn resume(&self, record: LifetimeRecord) -> Result<Uuid, EngineError> {
        let engine = WorkflowEngine::recover(self.deps.clone(), record)?;
        let run_id = engine.run_id();
        self.registry.spawn(engine);
        Ok(run_id)
    }
}
