//! Approval handshake messages exchanged between the engine and the transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::workflow::StepDefinition;

/// Hard ceiling on any approval wait, regardless of the requested timeout.
pub const MAX_APPROVAL_MINUTES: u64 = 1440;

/// Timeout applied when a blocking step declares none.
pub const DEFAULT_APPROVAL_MINUTES: u64 = 30;

/// Identifies one outstanding approval ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalKey {
    pub run_id: Uuid,
    pub step_id: String,
}

impl ApprovalKey {
    pub fn new(run_id: Uuid, step_id: impl Into<String>) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
        }
    }
}

impl std::fmt::Display for ApprovalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.run_id, self.step_id)
    }
}

/// Registration message forwarded to the transport when a ticket is created.
///
/// The transport arms the real-world expiry timer and exposes the resolution
/// endpoint; the coordinator never does either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: Uuid,
    pub step_id: String,
    pub timeout_minutes: u64,
    pub message: String,
    pub approval_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_step: Option<StepDefinition>,
    #[serde(default)]
    pub context_snapshot: Map<String, Value>,
}

impl ApprovalRequest {
    pub fn key(&self) -> ApprovalKey {
        ApprovalKey::new(self.run_id, self.step_id.clone())
    }
}

/// Terminal outcome of an approval or webform wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApprovalResult {
    Approved,
    Timeout,
    /// A webform submission or any custom payload.
    Submitted {
        #[serde(default)]
        form_data: Value,
    },
}

impl ApprovalResult {
    /// Form data carried by a submission, if any.
    pub fn form_data(&self) -> Value {
        match self {
            ApprovalResult::Submitted { form_data } => form_data.clone(),
            _ => Value::Object(Map::new()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A resolution event pushed by the transport onto the result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResolution {
    pub run_id: Uuid,
    pub step_id: String,
    pub result: ApprovalResult,
}

impl ApprovalResolution {
    pub fn key(&self) -> ApprovalKey {
        ApprovalKey::new(self.run_id, self.step_id.clone())
    }
}
