//! Run-scoped context store.
//!
//! `RunContext` is the mutable name -> value map a single run threads through
//! its steps. Only the owning engine mutates it; everyone else sees the
//! snapshots written into lifetime records.

use serde_json::{Map, Value};

use flowgate_types::lifetime::{
    FAILED_REASON_KEY, FAILED_STEP_ID_KEY, FailureDetail, STEP_RESULTS_KEY, WORKFLOW_FAILED_KEY,
};

/// Mutable key/value state of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunContext {
    values: Map<String, Value>,
}

impl RunContext {
    /// An empty context with the reserved bookkeeping keys in place.
    pub fn new() -> Self {
        let mut ctx = Self { values: Map::new() };
        ctx.values.insert(STEP_RESULTS_KEY.into(), Value::Object(Map::new()));
        ctx.values.insert(WORKFLOW_FAILED_KEY.into(), Value::Bool(false));
        ctx.values.insert(FAILED_STEP_ID_KEY.into(), Value::Null);
        ctx.values.insert(FAILED_REASON_KEY.into(), Value::Null);
        ctx
    }

    /// Rebuild a context from a recovered snapshot, injected verbatim.
    pub fn from_snapshot(snapshot: Map<String, Value>) -> Self {
        let mut ctx = Self::new();
        ctx.values.extend(snapshot);
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Merge `other` into the context, overwriting existing keys.
    pub fn update(&mut self, other: Map<String, Value>) {
        self.values.extend(other);
    }

    /// Borrow the live map, for template rendering and rule evaluation.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Copy of the current state, for checkpoints and approval snapshots.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.clone()
    }

    /// Keys from `keys` not yet present.
    pub fn missing<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .filter(|k| !self.values.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    /// Mirror a step result under `step_results.<step_id>`.
    pub fn record_step_result(&mut self, step_id: &str, result: Value) {
        let entry = self
            .values
            .entry(STEP_RESULTS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(results) = entry {
            results.insert(step_id.to_string(), result);
        }
    }

    /// Record a step failure.
    pub fn mark_failed(&mut self, step_id: &str, reason: impl Into<String>) {
        self.values.insert(WORKFLOW_FAILED_KEY.into(), Value::Bool(true));
        self.values
            .insert(FAILED_STEP_ID_KEY.into(), Value::String(step_id.to_string()));
        self.values
            .insert(FAILED_REASON_KEY.into(), Value::String(reason.into()));
    }

    pub fn is_failed(&self) -> bool {
        self.values
            .get(WORKFLOW_FAILED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Failing step and reason, when the run has failed.
    pub fn failure(&self) -> Option<FailureDetail> {
        if !self.is_failed() {
            return None;
        }
        let text = |key: &str| self.values.get(key).and_then(Value::as_str).map(str::to_string);
        Some(FailureDetail {
            step_id: text(FAILED_STEP_ID_KEY),
            reason: text(FAILED_REASON_KEY),
        })
    }
}
