//! Lifetime records: the durable checkpoint of one run.
//!
//! One record per run id. Records live in the active collection while the run
//! is in flight and move to the completed collection on a terminal state. They
//! are the only input to recovery and the only thing the status read path sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::workflow::{StepType, WorkflowDefinition};

/// Context key holding the mirrored execution log.
pub const STEP_RESULTS_KEY: &str = "step_results";
/// Context key set to `true` once any step fails.
pub const WORKFLOW_FAILED_KEY: &str = "workflow_failed";
pub const FAILED_STEP_ID_KEY: &str = "failed_step_id";
pub const FAILED_REASON_KEY: &str = "failed_reason";

/// Durable snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifetimeRecord {
    pub uid: Uuid,
    pub workflow: WorkflowDefinition,
    /// Always names an existing step once the run has started.
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub reason: CheckpointReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl LifetimeRecord {
    /// Whether the record was written by a run that reached its terminal state.
    pub fn is_completed(&self) -> bool {
        self.reason == CheckpointReason::Completed
    }

    /// Derive the externally visible run status.
    pub fn status(&self) -> RunStatus {
        if !self.is_completed() {
            RunStatus::InProgress
        } else if self
            .context
            .get(WORKFLOW_FAILED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        }
    }

    /// Type of the step the run is currently parked on.
    pub fn current_step_type(&self) -> Option<StepType> {
        let id = self.current_step.as_deref()?;
        self.workflow.step(id).map(|s| s.step_type)
    }

    /// The mirrored execution log, or an empty map.
    pub fn step_results(&self) -> Value {
        self.context
            .get(STEP_RESULTS_KEY)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Initialized,
    StepStart,
    RegisterOutput,
    RegisterVar,
    PreDeliveryContextSnapshot,
    WebformResult,
    ApprovalResult,
    StepResult,
    Completed,
}

impl std::fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckpointReason::Initialized => "initialized",
            CheckpointReason::StepStart => "step_start",
            CheckpointReason::RegisterOutput => "register_output",
            CheckpointReason::RegisterVar => "register_var",
            CheckpointReason::PreDeliveryContextSnapshot => "pre_delivery_context_snapshot",
            CheckpointReason::WebformResult => "webform_result",
            CheckpointReason::ApprovalResult => "approval_result",
            CheckpointReason::StepResult => "step_result",
            CheckpointReason::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Failing step and reason carried by a failed run's final checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub step_id: Option<String>,
    pub reason: Option<String>,
}

/// Externally visible status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

/// Status document returned by the read path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusView {
    pub uid: Uuid,
    pub status: RunStatus,
    pub current_step: Option<String>,
    pub current_step_type: Option<StepType>,
    pub context: Map<String, Value>,
    pub step_results: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl From<&LifetimeRecord> for RunStatusView {
    fn from(record: &LifetimeRecord) -> Self {
        Self {
            uid: record.uid,
            status: record.status(),
            current_step: record.current_step.clone(),
            current_step_type: record.current_step_type(),
            context: record.context.clone(),
            step_results: record.step_results(),
            failure: record.failure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowDocument;

    fn record(reason: CheckpointReason, failed: bool) -> LifetimeRecord {
        let doc: WorkflowDocument = serde_yaml_ng::from_str(
            "workflow:\n  name: t\n  steps:\n    - id: a\n      type: approval\n",
        )
        .unwrap();
        let mut context = Map::new();
        context.insert(WORKFLOW_FAILED_KEY.into(), Value::Bool(failed));
        LifetimeRecord {
            uid: Uuid::now_v7(),
            workflow: doc.workflow,
            current_step: Some("a".into()),
            context,
            started_at: Utc::now(),
            last_updated: Utc::now(),
            reason,
            access_key: None,
            failure: None,
        }
    }

    #[test]
    fn status_follows_reason_then_failure_flag() {
        assert_eq!(record(CheckpointReason::StepStart, true).status(), RunStatus::InProgress);
        assert_eq!(record(CheckpointReason::Completed, true).status(), RunStatus::Failed);
        assert_eq!(record(CheckpointReason::Completed, false).status(), RunStatus::Completed);
    }

    #[test]
    fn status_view_reports_current_step_type() {
        let view = RunStatusView::from(&record(CheckpointReason::StepStart, false));
        assert_eq!(view.current_step_type, Some(StepType::Approval));
        assert_eq!(view.step_results, Value::Object(Map::new()));
    }

    #[test]
    fn reason_serializes_snake_case() {
        let v = serde_json::to_value(CheckpointReason::PreDeliveryContextSnapshot).unwrap();
        assert_eq!(v, "pre_delivery_context_snapshot");
        assert_eq!(CheckpointReason::StepStart.to_string(), "step_start");
    }
}
