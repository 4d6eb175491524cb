//! Workflow engine: one run of one workflow definition.
//!
//! `WorkflowEngine` owns the run's context, step flow controller and control
//! inbox. Construction seeds the context, validates capability manifests and
//! writes the `initialized` checkpoint; [`WorkflowEngine::run`] consumes the
//! engine and drives the step loop to a terminal state. Everything the run
//! shares with other runs (lifetime writer, approval coordinator, capability
//! registry) arrives through [`EngineDeps`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use flowgate_types::approval::{
    ApprovalRequest, ApprovalResult, DEFAULT_APPROVAL_MINUTES, MAX_APPROVAL_MINUTES,
};
use flowgate_types::config::FlowgateConfig;
use flowgate_types::lifetime::{
    CheckpointReason, FailureDetail, LifetimeRecord, RunStatus, STEP_RESULTS_KEY,
};
use flowgate_types::workflow::{
    AbsentAction, FailureHandler, RegisterVar, StepDefinition, StepType, WorkflowDefinition,
};

use super::approval::{ApprovalCoordinator, ApprovalError};
use super::capability::{
    self, ActionRef, Capability, CapabilityError, CapabilityRegistry, ManifestError,
};
use super::context::RunContext;
use super::control::{ControlInbox, ControlSender, control_channel};
use super::flow::{FlowError, StepFlowController};
use super::lifetime::LifetimeStore;
use super::matcher;
use super::path;
use super::template::{self, TemplateError};

/// Poll interval of the pre-action context wait.
const CONTEXT_POLL: Duration = Duration::from_millis(100);

const DEFAULT_WEBFORM_CONFIG: &str = "configs/reference_config.js";
const DEFAULT_WEBFORM_CSS: &str = "custom.css";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("timed out waiting for context keys: {missing:?}")]
    ContextTimeout { missing: Vec<String> },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("step '{step_id}' failed according to module result: {message}")]
    StepFailed { step_id: String, message: String },

    #[error("failed to assign variable '{name}': {reason}")]
    RegisterVar { name: String, reason: String },
}

// ---------------------------------------------------------------------------
// Dependencies and options
// ---------------------------------------------------------------------------

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Prefix of approval and webform links.
    pub base_url: String,
    /// Bound on the wait for referenced context keys.
    pub context_wait: Duration,
    /// Idle interval while a run is paused.
    pub pause_poll: Duration,
    /// Per-module defaults merged under step input.
    pub module_defaults: BTreeMap<String, Value>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&FlowgateConfig::default())
    }
}

impl From<&FlowgateConfig> for EngineSettings {
    fn from(config: &FlowgateConfig) -> Self {
        Self {
            base_url: config.app.base_url.trim_end_matches('/').to_string(),
            context_wait: Duration::from_secs(config.engine.context_wait_secs),
            pause_poll: Duration::from_millis(config.engine.pause_poll_millis),
            module_defaults: config.module_defaults.clone(),
        }
    }
}

/// Shared services every run uses.
#[derive(Clone)]
pub struct EngineDeps {
    pub lifetime: LifetimeStore,
    pub approvals: Arc<ApprovalCoordinator>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub settings: Arc<EngineSettings>,
}

/// Per-run options supplied by the trigger.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run id; a fresh v7 uuid when absent.
    pub run_id: Option<Uuid>,
    /// Access key of agent-initiated runs.
    pub access_key: Option<String>,
}

/// Terminal summary returned by [`WorkflowEngine::run`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub cancelled: bool,
    pub failure: Option<FailureDetail>,
    pub context: Map<String, Value>,
}

/// What the control flags say to do with the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    Cancel,
    Pause,
    Skip,
    Jump(String),
    Execute,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine {
    run_id: Uuid,
    definition: WorkflowDefinition,
    deps: EngineDeps,
    context: RunContext,
    flow: StepFlowController,
    control: ControlInbox,
    control_tx: ControlSender,
    context_modules: HashMap<String, Arc<dyn Capability>>,
    current_step: Option<String>,
    started_at: DateTime<Utc>,
    access_key: Option<String>,
    /// Blocking step whose ticket was re-registered during recovery.
    rehydrated: Option<String>,
}

impl WorkflowEngine {
    /// Build a new run from a definition and the trigger payload.
    ///
    /// Fails when a required payload path is absent, when a referenced
    /// capability module has no valid manifest, or when a context module
    /// cannot be instantiated.
    pub fn new(
        deps: EngineDeps,
        definition: WorkflowDefinition,
        payload: &Value,
        options: RunOptions,
    ) -> Result<Self, EngineError> {
        let mut context = RunContext::new();
        for var in &definition.context_variables {
            context.set(var.name.clone(), var.default.clone());
        }
        apply_payload_rules(&definition, payload, &mut context)?;

        let run_id = options.run_id.unwrap_or_else(Uuid::now_v7);
        let flow = StepFlowController::new(&definition.steps)?;
        let engine = Self::assemble(
            deps,
            definition,
            context,
            flow,
            run_id,
            Utc::now(),
            options.access_key,
            None,
        )?;

        tracing::info!(
            run_id = %engine.run_id,
            workflow = %engine.definition.name,
            "workflow run initialized"
        );
        engine.checkpoint(CheckpointReason::Initialized);
        Ok(engine)
    }

    /// Rebuild a run from its last checkpoint.
    ///
    /// The saved context is injected verbatim and the payload rules are not
    /// re-applied. If the run stopped on an approval or webform step, its
    /// ticket is registered again before the engine is returned.
    pub fn recover(deps: EngineDeps, record: LifetimeRecord) -> Result<Self, EngineError> {
        let context = RunContext::from_snapshot(record.context);
        let log = match context.get(STEP_RESULTS_KEY) {
            Some(Value::Object(results)) => results.clone(),
            _ => Map::new(),
        };
        let flow = StepFlowController::new(&record.workflow.steps)?.with_execution_log(log);
        if let Some(step) = record.current_step.as_deref() {
            if !flow.contains(step) {
                return Err(FlowError::UnknownStep(step.to_string()).into());
            }
        }

        let mut engine = Self::assemble(
            deps,
            record.workflow,
            context,
            flow,
            record.uid,
            record.started_at,
            record.access_key,
            record.current_step,
        )?;
        engine.rehydrate_pending_approval();
        tracing::info!(
            run_id = %engine.run_id,
            workflow = %engine.definition.name,
            current_step = ?engine.current_step,
            "workflow run recovered"
        );
        Ok(engine)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        deps: EngineDeps,
        definition: WorkflowDefinition,
        context: RunContext,
        flow: StepFlowController,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        access_key: Option<String>,
        current_step: Option<String>,
    ) -> Result<Self, EngineError> {
        validate_modules(&definition, &deps.capabilities)?;
        let context_modules = load_context_modules(&definition, &deps, &context)?;
        let (control_tx, control) = control_channel();
        Ok(Self {
            run_id,
            definition,
            deps,
            context,
            flow,
            control,
            control_tx,
            context_modules,
            current_step,
            started_at,
            access_key,
            rehydrated: None,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn access_key(&self) -> Option<&str> {
        self.access_key.as_deref()
    }

    /// A sender for control commands to this run.
    pub fn control_handle(&self) -> ControlSender {
        self.control_tx.clone()
    }

    // -- Run loop -----------------------------------------------------------

    /// Drive the run to completion, cancellation or failure.
    pub async fn run(mut self) -> RunOutcome {
        tracing::info!(run_id = %self.run_id, workflow = %self.definition.name, "workflow started");

        let mut cancelled = false;
        let mut step_id = self
            .current_step
            .clone()
            .or_else(|| self.flow.first_step().map(str::to_string));

        while let Some(id) = step_id.clone() {
            match self.next_directive(&id) {
                Directive::Cancel => {
                    tracing::warn!(run_id = %self.run_id, step_id = %id, "workflow cancelled");
                    cancelled = true;
                    break;
                }
                Directive::Pause => {
                    tracing::debug!(run_id = %self.run_id, "workflow paused");
                    tokio::time::sleep(self.deps.settings.pause_poll).await;
                    continue;
                }
                Directive::Skip => {
                    tracing::info!(run_id = %self.run_id, step_id = %id, "skipping step");
                    step_id = self.flow.get_next_step(&id);
                    continue;
                }
                Directive::Jump(target) => {
                    if self.flow.contains(&target) {
                        tracing::info!(run_id = %self.run_id, from = %id, to = %target, "jumping to step");
                        step_id = Some(target);
                    } else {
                        tracing::warn!(run_id = %self.run_id, target = %target, "jump target not found, halting");
                        break;
                    }
                    continue;
                }
                Directive::Execute => {}
            }

            self.current_step = Some(id.clone());
            self.checkpoint(CheckpointReason::StepStart);

            let should_run = match self.flow.should_run_step(&id, &self.context) {
                Ok(run) => run,
                Err(e) => {
                    tracing::error!(run_id = %self.run_id, step_id = %id, error = %e, "step lookup failed");
                    break;
                }
            };
            if !should_run {
                tracing::info!(run_id = %self.run_id, step_id = %id, "step gated off");
                step_id = self.flow.get_next_step(&id);
                continue;
            }

            let Some(step) = self.flow.get_step(&id).cloned() else {
                break;
            };
            match self.run_step(&step).await {
                Ok(result) => {
                    self.flow.register_step_result(&id, result, &mut self.context);
                    self.checkpoint(CheckpointReason::StepResult);
                    step_id = self.flow.get_next_step(&id);
                    tracing::debug!(run_id = %self.run_id, step_id = %id, next = ?step_id, "step completed");
                }
                Err(e) => {
                    self.handle_step_failure(&step, &e).await;
                    break;
                }
            }
        }

        self.finish(cancelled).await
    }

    fn next_directive(&mut self, step_id: &str) -> Directive {
        let status = self.control.fetch_and_apply();
        if status.cancelled {
            Directive::Cancel
        } else if status.paused {
            Directive::Pause
        } else if status.skip.contains(step_id) {
            Directive::Skip
        } else if let Some(target) = status.jump_to.take() {
            Directive::Jump(target)
        } else {
            Directive::Execute
        }
    }

    async fn handle_step_failure(&mut self, step: &StepDefinition, error: &EngineError) {
        tracing::error!(run_id = %self.run_id, step_id = %step.id, error = %error, "step failed");
        self.context.mark_failed(&step.id, error.to_string());

        if let Some(handler) = step.step_failure_handler.as_deref() {
            tracing::info!(run_id = %self.run_id, step_id = %step.id, handler = %handler.id, "running step failure handler");
            if let Err(e) = self.run_inline_step(handler).await {
                tracing::error!(run_id = %self.run_id, handler = %handler.id, error = %e, "step failure handler failed");
            }
        }
    }

    async fn finish(mut self, cancelled: bool) -> RunOutcome {
        if self.context.is_failed() {
            if let Err(e) = self.run_global_failure_handler().await {
                tracing::error!(run_id = %self.run_id, error = %e, "global failure handler failed");
            }
        }

        self.checkpoint(CheckpointReason::Completed);
        self.deps.lifetime.mark_complete(self.run_id);

        let failure = self.context.failure();
        let status = if failure.is_some() {
            tracing::warn!(run_id = %self.run_id, failure = ?failure, "workflow completed with failure");
            RunStatus::Failed
        } else {
            tracing::info!(run_id = %self.run_id, cancelled, "workflow completed");
            RunStatus::Completed
        };

        RunOutcome {
            run_id: self.run_id,
            status,
            cancelled,
            failure,
            context: self.context.snapshot(),
        }
    }

    async fn run_global_failure_handler(&mut self) -> Result<(), EngineError> {
        let Some(handler) = self.definition.global_failure_handler.clone() else {
            return Ok(());
        };
        tracing::info!(run_id = %self.run_id, "running global failure handler");
        match handler {
            FailureHandler::Steps(ids) => {
                for id in ids {
                    let step = self
                        .flow
                        .get_step(&id)
                        .cloned()
                        .ok_or(FlowError::UnknownStep(id))?;
                    self.run_inline_step(&step).await?;
                }
            }
            FailureHandler::Inline(step) => {
                self.run_inline_step(&step).await?;
            }
        }
        Ok(())
    }

    // -- Steps --------------------------------------------------------------

    async fn run_step(&mut self, step: &StepDefinition) -> Result<Value, EngineError> {
        match step.step_type {
            StepType::Action => self.run_action_step(step).await,
            StepType::Webform | StepType::Approval => self.run_blocking_step(step).await,
        }
    }

    /// Failure handlers: rendered input, no context wait, no registration.
    async fn run_inline_step(&self, step: &StepDefinition) -> Result<Value, EngineError> {
        if step.step_type != StepType::Action {
            return Err(EngineError::Configuration(format!(
                "inline step '{}' must be an action step",
                step.id
            )));
        }
        tracing::info!(run_id = %self.run_id, step_id = %step.id, "running inline step");
        self.invoke_action(step).await
    }

    async fn run_action_step(&mut self, step: &StepDefinition) -> Result<Value, EngineError> {
        let wanted = template::referenced_keys(&Value::Object(step.input.clone()))?;
        self.wait_for_context_keys(&step.id, &wanted).await?;

        let result = self.invoke_action(step).await?;

        if let Some(key) = step.register_output.as_deref() {
            self.context.set(key, result.clone());
            self.checkpoint(CheckpointReason::RegisterOutput);
        }
        for var in &step.register_vars {
            self.register_variable(var)?;
        }
        Ok(result)
    }

    /// Wait (bounded) until every key in `keys` exists in the context.
    async fn wait_for_context_keys(
        &self,
        step_id: &str,
        keys: &BTreeSet<String>,
    ) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + self.deps.settings.context_wait;
        loop {
            let missing = self.context.missing(keys);
            if missing.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::ContextTimeout { missing });
            }
            tracing::debug!(run_id = %self.run_id, step_id, ?missing, "waiting for context keys");
            tokio::time::sleep(CONTEXT_POLL).await;
        }
    }

    /// Resolve, instantiate and call the capability behind an action step.
    async fn invoke_action(&self, step: &StepDefinition) -> Result<Value, EngineError> {
        let action: ActionRef = step
            .action
            .as_deref()
            .ok_or_else(|| EngineError::Configuration(format!("step '{}' has no action", step.id)))?
            .parse()?;
        let input = template::render_map(&step.input, self.context.as_map())?;

        let (instance, args) = match &action {
            ActionRef::Context { name, .. } => {
                let instance = self
                    .context_modules
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CapabilityError::UnknownContextModule(name.clone()))?;
                (instance, input)
            }
            ActionRef::Module { module, class, method } => {
                let merged =
                    capability::merge_module_config(self.deps.settings.module_defaults.get(module), &input);
                let manifest = self.deps.capabilities.manifest(module)?;
                let spec = manifest
                    .method(method)
                    .ok_or_else(|| CapabilityError::UnknownMethod {
                        module: module.clone(),
                        method: method.clone(),
                    })?;
                let instance = self.deps.capabilities.instantiate(
                    module,
                    class,
                    self.context.as_map(),
                    merged.clone(),
                )?;
                (instance, capability::accepted_args(spec, merged))
            }
        };

        tracing::debug!(run_id = %self.run_id, step_id = %step.id, %action, "invoking capability");
        let result = instance.invoke(action.method(), args).await?;

        if result.get("status").and_then(Value::as_str) == Some("fail") {
            let message = result
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Module reported failure.")
                .to_string();
            return Err(EngineError::StepFailed {
                step_id: step.id.clone(),
                message,
            });
        }
        Ok(result)
    }

    fn register_variable(&mut self, var: &RegisterVar) -> Result<(), EngineError> {
        let fail = var.absent_action == AbsentAction::Fail;
        let error = |reason: String| EngineError::RegisterVar {
            name: var.name.clone(),
            reason,
        };

        if let Some(value) = var.value.as_deref() {
            match template::render_str(value, self.context.as_map()) {
                Ok(rendered) => self.context.set(var.name.clone(), rendered),
                Err(e) if fail => return Err(error(e.to_string())),
                Err(e) => tracing::debug!(var = %var.name, error = %e, "variable skipped"),
            }
        } else if !var.conditional.is_empty() {
            let mut matched = false;
            for case in &var.conditional {
                let Some(condition) = case.condition() else {
                    continue;
                };
                let verdict = template::render_to_string(condition, self.context.as_map())
                    .map_err(|e| e.to_string())
                    .and_then(|expr| {
                        matcher::eval_logic(&expr, &HashMap::new()).map_err(|e| e.to_string())
                    });
                match verdict {
                    Ok(true) => {
                        self.context
                            .set(var.name.clone(), case.value.clone().unwrap_or(Value::Null));
                        matched = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(reason) if fail => return Err(error(reason)),
                    Err(reason) => tracing::debug!(var = %var.name, %reason, "condition skipped"),
                }
            }

            if !matched {
                let default = var
                    .conditional
                    .iter()
                    .find_map(|c| c.default.clone())
                    .filter(|d| !d.is_null());
                match default {
                    Some(d) => self.context.set(var.name.clone(), d),
                    None if fail => {
                        return Err(error("no condition matched and no default".to_string()));
                    }
                    None => {}
                }
            }
        }

        self.checkpoint(CheckpointReason::RegisterVar);
        Ok(())
    }

    /// Approval and webform steps.
    async fn run_blocking_step(&mut self, step: &StepDefinition) -> Result<Value, EngineError> {
        let timeout_minutes = blocking_timeout(step);
        let link = self.approval_link(step);
        self.context.set("approval_link", Value::String(link.clone()));
        if step.step_type == StepType::Webform {
            let (config_file, css_file) = webform_assets(step);
            self.context.set("webform_config_file", Value::String(config_file));
            self.context.set("webform_css_file", Value::String(css_file));
        }

        let recovered = self.rehydrated.take().as_deref() == Some(step.id.as_str())
            && self.deps.approvals.is_pending(self.run_id, &step.id);

        if recovered {
            tracing::info!(run_id = %self.run_id, step_id = %step.id, "resuming wait on recovered ticket");
        } else {
            let default_message = match step.step_type {
                StepType::Webform => format!("Form approval required for {}", step.id),
                _ => "Approval required".to_string(),
            };
            self.deps.approvals.request_approval(ApprovalRequest {
                run_id: self.run_id,
                step_id: step.id.clone(),
                timeout_minutes,
                message: step.message.clone().unwrap_or(default_message),
                approval_link: link,
                delivery_step: step.delivery_step.as_deref().cloned(),
                context_snapshot: self.context.snapshot(),
            });
            self.checkpoint(CheckpointReason::PreDeliveryContextSnapshot);

            if let Some(delivery) = step.delivery_step.as_deref() {
                tracing::info!(run_id = %self.run_id, step_id = %step.id, delivery = %delivery.id, "running delivery step");
                self.run_action_step(delivery).await?;
            }
        }

        let result = self
            .deps
            .approvals
            .wait_for_approval(self.run_id, &step.id)
            .await?;
        let value = result.to_value();

        if let Some(key) = step.register_output.as_deref() {
            self.context.set(key, value.clone());
            self.checkpoint(CheckpointReason::RegisterOutput);
        }
        match step.step_type {
            StepType::Webform => {
                self.context
                    .set(format!("webform_{}_data", step.id), result.form_data());
                self.checkpoint(CheckpointReason::WebformResult);
            }
            _ => self.checkpoint(CheckpointReason::ApprovalResult),
        }

        if result == ApprovalResult::Timeout {
            tracing::warn!(run_id = %self.run_id, step_id = %step.id, "approval timed out, continuing");
        }
        Ok(value)
    }

    fn approval_link(&self, step: &StepDefinition) -> String {
        let base = &self.deps.settings.base_url;
        match step.step_type {
            StepType::Webform => {
                let (config_file, _) = webform_assets(step);
                format!(
                    "{base}/{}/{}/{}/t.webform.html?config_file={config_file}",
                    step.module.as_deref().unwrap_or_default(),
                    self.run_id,
                    step.id
                )
            }
            _ => format!("{base}/api/approve/{}/{}", self.run_id, step.id),
        }
    }

    /// Re-register the ticket of the approval/webform step the run stopped on.
    fn rehydrate_pending_approval(&mut self) {
        let Some(step) = self
            .current_step
            .as_deref()
            .and_then(|id| self.flow.get_step(id))
            .cloned()
        else {
            return;
        };
        if !step.step_type.is_blocking() {
            tracing::debug!(run_id = %self.run_id, step_id = %step.id, "recovered step is not blocking");
            return;
        }

        let link = self.approval_link(&step);
        self.context.set("approval_link", Value::String(link.clone()));
        self.deps.approvals.request_approval(ApprovalRequest {
            run_id: self.run_id,
            step_id: step.id.clone(),
            timeout_minutes: blocking_timeout(&step),
            message: format!("Recovered approval: {}", step.id),
            approval_link: link,
            delivery_step: None,
            context_snapshot: self.context.snapshot(),
        });
        tracing::info!(run_id = %self.run_id, step_id = %step.id, "approval ticket rehydrated");
        self.rehydrated = Some(step.id);
    }

    // -- Persistence --------------------------------------------------------

    fn checkpoint(&self, reason: CheckpointReason) {
        self.deps.lifetime.update(LifetimeRecord {
            uid: self.run_id,
            workflow: self.definition.clone(),
            current_step: self.current_step.clone(),
            context: self.context.snapshot(),
            started_at: self.started_at,
            last_updated: Utc::now(),
            reason,
            access_key: self.access_key.clone(),
            failure: self.context.failure(),
        });
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

fn apply_payload_rules(
    definition: &WorkflowDefinition,
    payload: &Value,
    context: &mut RunContext,
) -> Result<(), EngineError> {
    for rule in &definition.payload_parser {
        let segments = path::parse_path(&rule.path).map_err(|e| {
            EngineError::Configuration(format!("invalid payload path '{}': {e}", rule.path))
        })?;
        match path::resolve(payload, &segments) {
            Some(value) => context.set(rule.var.clone(), value),
            None if rule.absent_action == AbsentAction::Fail => {
                return Err(EngineError::Configuration(format!(
                    "Path '{}' not found in payload for var '{}'",
                    rule.path, rule.var
                )));
            }
            None => tracing::debug!(path = %rule.path, var = %rule.var, "optional payload path absent"),
        }
    }
    Ok(())
}

/// Every action reachable from a definition: steps, delivery steps, handlers.
fn actions(definition: &WorkflowDefinition) -> Vec<&str> {
    fn collect<'a>(step: &'a StepDefinition, out: &mut Vec<&'a str>) {
        let nested = [step.delivery_step.as_deref(), step.step_failure_handler.as_deref()];
        for s in std::iter::once(step).chain(nested.into_iter().flatten()) {
            if let Some(action) = s.action.as_deref() {
                out.push(action);
            }
        }
    }

    let mut out = Vec::new();
    for step in &definition.steps {
        collect(step, &mut out);
    }
    if let Some(FailureHandler::Inline(step)) = &definition.global_failure_handler {
        collect(step, &mut out);
    }
    out
}

/// Preflight every referenced capability module against its manifest.
pub fn validate_modules(
    definition: &WorkflowDefinition,
    registry: &CapabilityRegistry,
) -> Result<(), EngineError> {
    for action in actions(definition) {
        if action.starts_with("context.") {
            continue;
        }
        let module = match action.parse::<ActionRef>()? {
            ActionRef::Module { module, .. } => module,
            ActionRef::Context { .. } => continue,
        };
        let validation = registry.validate_manifest(&module);
        if !validation.valid {
            return Err(EngineError::Configuration(format!(
                "Preflight validation failed for module '{module}': {}",
                validation.error.unwrap_or_default()
            )));
        }
    }
    Ok(())
}

fn load_context_modules(
    definition: &WorkflowDefinition,
    deps: &EngineDeps,
    context: &RunContext,
) -> Result<HashMap<String, Arc<dyn Capability>>, EngineError> {
    let mut modules = HashMap::with_capacity(definition.context_modules.len());
    for (name, spec) in &definition.context_modules {
        let (module, class) = capability::parse_module_class(&spec.module)?;
        let config = template::render_map(&spec.config, context.as_map())?;
        let instance = deps
            .capabilities
            .instantiate(&module, &class, context.as_map(), config)?;
        tracing::debug!(name = %name, module = %spec.module, "context module loaded");
        modules.insert(name.clone(), instance);
    }
    Ok(modules)
}

fn blocking_timeout(step: &StepDefinition) -> u64 {
    step.timeout_minutes
        .unwrap_or(DEFAULT_APPROVAL_MINUTES)
        .min(MAX_APPROVAL_MINUTES)
}

fn webform_assets(step: &StepDefinition) -> (String, String) {
    (
        step.config_file
            .clone()
            .unwrap_or_else(|| DEFAULT_WEBFORM_CONFIG.to_string()),
        step.css_file
            .clone()
            .unwrap_or_else(|| DEFAULT_WEBFORM_CSS.to_string()),
    )
}
