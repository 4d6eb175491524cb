//! Workflow document types for Flowgate.
//!
//! A workflow file is a YAML document with a single top-level `workflow` key.
//! `WorkflowDefinition` is immutable once a run is constructed from it: the
//! engine holds it read-only for the whole life of the run and snapshots it
//! into every lifetime record so the run can be rebuilt after a restart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// The on-disk shape of a workflow file: `{ workflow: { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub workflow: WorkflowDefinition,
}

/// A declaratively defined, multi-step workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How runs of this workflow are created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,
    /// Trigger-matching block evaluated against inbound payloads.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_block: Option<MatchBlock>,
    /// Steps in declaration order. Declaration order is the default traversal.
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_variables: Vec<ContextVariable>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_modules: BTreeMap<String, ContextModuleSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_parser: Vec<PayloadRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_failure_handler: Option<FailureHandler>,
}

impl WorkflowDefinition {
    /// The trigger kind, defaulting to `api` when none is declared.
    pub fn trigger_kind(&self) -> TriggerKind {
        self.trigger
            .as_ref()
            .map(TriggerSpec::kind)
            .unwrap_or(TriggerKind::Api)
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A typed unit of work within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within a workflow.
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// `module.Class.method`, or `context.<name>.<method>` for context modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Templated input map. String leaves are rendered against the run context.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub input: Map<String, Value>,
    /// Gating block `{ rules, logic }`. Kept raw: a malformed block means "run".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<Value>,
    /// Context key that receives the full step result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_output: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub register_vars: Vec<RegisterVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_failure_handler: Option<Box<StepDefinition>>,
    /// Action step run to notify a human before an approval/webform wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_step: Option<Box<StepDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Webform module serving the form assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_file: Option<String>,
}

/// The kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Action,
    Webform,
    Approval,
}

impl StepType {
    /// Whether the step blocks on an approval ticket.
    pub fn is_blocking(self) -> bool {
        matches!(self, StepType::Webform | StepType::Approval)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::Action => "action",
            StepType::Webform => "webform",
            StepType::Approval => "approval",
        };
        f.write_str(s)
    }
}

/// A single gating rule or trigger condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub id: String,
    /// Dot-separated path, optionally ending in a `[*]` wildcard segment.
    pub path: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Structured gating block on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingTerms {
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    #[serde(default)]
    pub logic: String,
}

/// Post-step variable assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterVar {
    pub name: String,
    /// Template rendered against the context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// First matching case wins; a `default` entry is the fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional: Vec<ConditionalCase>,
    #[serde(default)]
    pub absent_action: AbsentAction,
}

/// One arm of a conditional variable assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalCase {
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elif: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ConditionalCase {
    /// The condition template of an `if` or `elif` arm.
    pub fn condition(&self) -> Option<&str> {
        self.if_expr.as_deref().or(self.elif.as_deref())
    }
}

/// What to do when a path or template cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentAction {
    #[default]
    Fail,
    #[serde(other)]
    Skip,
}

/// `global_failure_handler`: an ordered list of step ids, or one inline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailureHandler {
    Steps(Vec<String>),
    Inline(Box<StepDefinition>),
}

// ---------------------------------------------------------------------------
// Context seeding
// ---------------------------------------------------------------------------

/// A context variable with its default value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextVariable {
    pub name: String,
    #[serde(default)]
    pub default: Value,
}

/// A capability instantiated once per run and addressable as `context.<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextModuleSpec {
    /// `module.Class`
    pub module: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

/// Payload extraction rule: copy `path` out of the payload into `var`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadRule {
    pub path: String,
    pub var: String,
    #[serde(default)]
    pub absent_action: AbsentAction,
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// How runs of a workflow are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Cron-scheduled runs.
    Scheduled {
        cron: String,
    },
    /// Repository-change runs, by polling or via a push webhook.
    Gitops(GitTrigger),
    /// Runs started through the HTTP endpoint.
    Api {},
    /// Agent-initiated runs; each run gets an access key.
    Aiagent {},
    #[serde(rename = "ad-hoc")]
    AdHoc {},
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Scheduled { .. } => TriggerKind::Scheduled,
            TriggerSpec::Gitops(_) => TriggerKind::Gitops,
            TriggerSpec::Api {} => TriggerKind::Api,
            TriggerSpec::Aiagent {} => TriggerKind::Aiagent,
            TriggerSpec::AdHoc {} => TriggerKind::AdHoc,
        }
    }
}

/// Fieldless view of [`TriggerSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Scheduled,
    Gitops,
    Api,
    Aiagent,
    AdHoc,
}

impl TriggerKind {
    /// Ad-hoc and agent-initiated workflows skip payload matching.
    pub fn bypasses_match(self) -> bool {
        matches!(self, TriggerKind::AdHoc | TriggerKind::Aiagent)
    }
}

/// Repository-change trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitTrigger {
    #[serde(default)]
    pub method: GitTriggerMethod,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub files: Vec<WatchedFile>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Token embedded in the clone URL for private repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Token used to install the push webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared secret for `X-Hub-Signature-256` verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitTriggerMethod {
    #[default]
    Poll,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedFile {
    pub path: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

/// Trigger matching block: `{ condition_logic, conditions }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_logic: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
workflow:
  name: deploy-review
  trigger:
    type: gitops
    repo: https://github.com/acme/infra.git
    files:
      - path: deploy/prod.yaml
  match:
    condition_logic: "c1 and c2"
    conditions:
      - id: c1
        path: payload.ref
        operator: equals
        value: refs/heads/main
      - id: c2
        path: payload.commits
        operator: present
  context_variables:
    - name: region
      default: eu-west-1
  payload_parser:
    - path: payload.pusher.name
      var: pusher
      absent_action: skip
  steps:
    - id: notify
      type: action
      action: logger.Logger.info
      input:
        message: "push by {{ context.pusher }}"
      register_vars:
        - name: severity
          conditional:
            - if: "{{ context.region }} == 'eu-west-1'"
              value: high
            - default: low
    - id: approve
      type: approval
      timeout_minutes: 60
      delivery_step:
        id: send-link
        type: action
        action: logger.Logger.info
        input:
          message: "{{ context.approval_link }}"
  global_failure_handler:
    - notify
"#;

    #[test]
    fn parses_full_document() {
        let doc: WorkflowDocument = serde_yaml_ng::from_str(SAMPLE).unwrap();
        let wf = doc.workflow;
        assert_eq!(wf.name, "deploy-review");
        assert_eq!(wf.trigger_kind(), TriggerKind::Gitops);
        match wf.trigger.as_ref().unwrap() {
            TriggerSpec::Gitops(git) => {
                assert_eq!(git.branch, "main");
                assert_eq!(git.method, GitTriggerMethod::Poll);
                assert_eq!(git.poll_interval_seconds, 60);
                assert_eq!(git.files[0].path, "deploy/prod.yaml");
            }
            other => panic!("unexpected trigger: {other:?}"),
        }
        assert_eq!(wf.match_block.as_ref().unwrap().conditions.len(), 2);
        assert_eq!(wf.payload_parser[0].absent_action, AbsentAction::Skip);
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[1].step_type, StepType::Approval);
        assert!(wf.steps[1].delivery_step.is_some());
        let var = &wf.steps[0].register_vars[0];
        assert_eq!(var.conditional.len(), 2);
        assert!(var.conditional[0].condition().is_some());
        assert!(matches!(
            wf.global_failure_handler,
            Some(FailureHandler::Steps(ref ids)) if ids == &["notify".to_string()]
        ));
    }

    #[test]
    fn unknown_absent_action_means_skip() {
        let rule: PayloadRule =
            serde_json::from_value(serde_json::json!({"path": "a", "var": "b", "absent_action": "ignore"}))
                .unwrap();
        assert_eq!(rule.absent_action, AbsentAction::Skip);
    }

    #[test]
    fn inline_failure_handler() {
        let handler: FailureHandler = serde_json::from_value(serde_json::json!({
            "id": "cleanup",
            "type": "action",
            "action": "logger.Logger.error"
        }))
        .unwrap();
        assert!(matches!(handler, FailureHandler::Inline(step) if step.id == "cleanup"));
    }

    #[test]
    fn ad_hoc_trigger_bypasses_match() {
        let spec: TriggerSpec = serde_json::from_value(serde_json::json!({"type": "ad-hoc"})).unwrap();
        assert!(spec.kind().bypasses_match());
        let spec: TriggerSpec = serde_json::from_value(serde_json::json!({"type": "api"})).unwrap();
        assert!(!spec.kind().bypasses_match());
    }
}
