//! Step flow controller: step table, gating, execution log, traversal.
//!
//! Steps are nodes of a `petgraph` directed graph with one `Next` edge per
//! step, following declaration order. The run loop only ever moves along a
//! `Next` edge or, under operator control, jumps to a node by id; both are
//! graph operations here rather than index arithmetic in the engine.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value, json};

use flowgate_types::workflow::{GatingTerms, StepDefinition};

use super::context::RunContext;
use super::matcher;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("step '{0}' not found")]
    UnknownStep(String),
}

/// Edge kinds of the step graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEdge {
    /// Default successor in declaration order.
    Next,
}

/// Owns the step graph and the per-run execution log.
#[derive(Debug, Clone)]
pub struct StepFlowController {
    graph: DiGraph<StepDefinition, FlowEdge>,
    index: HashMap<String, NodeIndex>,
    first: Option<NodeIndex>,
    execution_log: Map<String, Value>,
}

impl StepFlowController {
    /// Build the graph from steps in declaration order.
    pub fn new(steps: &[StepDefinition]) -> Result<Self, FlowError> {
        let mut graph = DiGraph::with_capacity(steps.len(), steps.len().saturating_sub(1));
        let mut index = HashMap::with_capacity(steps.len());
        let mut previous: Option<NodeIndex> = None;

        for step in steps {
            if index.contains_key(&step.id) {
                return Err(FlowError::DuplicateStep(step.id.clone()));
            }
            let node = graph.add_node(step.clone());
            index.insert(step.id.clone(), node);
            if let Some(prev) = previous {
                graph.add_edge(prev, node, FlowEdge::Next);
            }
            previous = Some(node);
        }

        let first = steps.first().and_then(|s| index.get(&s.id).copied());
        Ok(Self {
            graph,
            index,
            first,
            execution_log: Map::new(),
        })
    }

    /// Seed the execution log, e.g. from a recovered `step_results` mirror.
    pub fn with_execution_log(mut self, log: Map<String, Value>) -> Self {
        self.execution_log = log;
        self
    }

    pub fn first_step(&self) -> Option<&str> {
        self.first.map(|n| self.graph[n].id.as_str())
    }

    pub fn get_step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.index.get(step_id).map(|n| &self.graph[*n])
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index.contains_key(step_id)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn execution_log(&self) -> &Map<String, Value> {
        &self.execution_log
    }

    /// Evaluate the step's gating block against the context and results.
    ///
    /// No block, or a block without usable `rules` and `logic`, means the step
    /// runs. A well-formed block runs only if its logic evaluates to true.
    pub fn should_run_step(&self, step_id: &str, context: &RunContext) -> Result<bool, FlowError> {
        let step = self
            .get_step(step_id)
            .ok_or_else(|| FlowError::UnknownStep(step_id.to_string()))?;

        let Some(Value::Object(block)) = step.terms.as_ref() else {
            return Ok(true);
        };
        if !block.contains_key("rules") || !block.contains_key("logic") {
            return Ok(true);
        }

        let terms: GatingTerms = match serde_json::from_value(Value::Object(block.clone())) {
            Ok(terms) => terms,
            Err(e) => {
                tracing::warn!(step_id, error = %e, "malformed gating block, running step");
                return Ok(true);
            }
        };
        if terms.rules.is_empty() || terms.logic.trim().is_empty() {
            return Ok(true);
        }

        let data = json!({
            "context": Value::Object(context.snapshot()),
            "step_results": Value::Object(self.execution_log.clone()),
        });
        let run = matcher::evaluate_rule_set(&terms.rules, &terms.logic, &data);
        tracing::debug!(step_id, logic = %terms.logic, run, "gating evaluated");
        Ok(run)
    }

    /// Record a result in the execution log and mirror it into the context.
    pub fn register_step_result(&mut self, step_id: &str, result: Value, context: &mut RunContext) {
        tracing::info!(step_id, "step result registered");
        self.execution_log.insert(step_id.to_string(), result.clone());
        context.record_step_result(step_id, result);
    }

    /// Follow the `Next` edge out of `step_id`.
    ///
    /// Returns `None` at the end of the workflow, and also (with an error log)
    /// for an unknown step id.
    pub fn get_next_step(&self, step_id: &str) -> Option<String> {
        let Some(node) = self.index.get(step_id) else {
            tracing::error!(step_id, "current step not found in step graph");
            return None;
        };
        let next = self
            .graph
            .edges(*node)
            .find(|e| *e.weight() == FlowEdge::Next)
            .map(|e| self.graph[e.target()].id.clone());
        tracing::debug!(step_id, next = ?next, "next step resolved");
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::workflow::StepType;

    fn step(id: &str, terms: Option<Value>) -> StepDefinition {
        serde_json::from_value(json!({
            "id": id,
            "type": "action",
            "action": "logger.Logger.info",
            "terms": terms,
        }))
        .unwrap()
    }

    fn controller(steps: Vec<StepDefinition>) -> StepFlowController {
        StepFlowController::new(&steps).unwrap()
    }

    #[test]
    fn traversal_follows_declaration_order() {
        let c = controller(vec![step("a", None), step("b", None), step("c", None)]);
        assert_eq!(c.first_step(), Some("a"));
        assert_eq!(c.get_next_step("a").as_deref(), Some("b"));
        assert_eq!(c.get_next_step("b").as_deref(), Some("c"));
        assert_eq!(c.get_next_step("c"), None);
        assert_eq!(c.get_next_step("zzz"), None);
        assert_eq!(c.get_step("b").map(|s| s.step_type), Some(StepType::Action));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = StepFlowController::new(&[step("a", None), step("a", None)]).unwrap_err();
        assert_eq!(err, FlowError::DuplicateStep("a".into()));
    }

    #[test]
    fn empty_workflow_has_no_first_step() {
        let c = controller(vec![]);
        assert!(c.is_empty());
        assert_eq!(c.first_step(), None);
    }

    #[test]
    fn gating_uses_context_rules() {
        let terms = json!({
            "rules": [{"id": "r1", "path": "context.flag", "operator": "equals", "value": true}],
            "logic": "r1"
        });
        let c = controller(vec![step("a", None), step("b", Some(terms))]);
        let mut ctx = RunContext::new();
        ctx.set("flag", json!(false));
        assert!(c.should_run_step("a", &ctx).unwrap());
        assert!(!c.should_run_step("b", &ctx).unwrap());
        ctx.set("flag", json!(true));
        assert!(c.should_run_step("b", &ctx).unwrap());
    }

    #[test]
    fn gating_reads_execution_log() {
        let terms = json!({
            "rules": [{"id": "ok", "path": "step_results.a.status", "operator": "equals", "value": "ok"}],
            "logic": "not ok"
        });
        let mut c = controller(vec![step("a", None), step("rollback", Some(terms))]);
        let mut ctx = RunContext::new();
        c.register_step_result("a", json!({"status": "ok"}), &mut ctx);
        assert!(!c.should_run_step("rollback", &ctx).unwrap());
        assert_eq!(ctx.get("step_results"), Some(&json!({"a": {"status": "ok"}})));
    }

    #[test]
    fn malformed_gating_defaults_to_run() {
        let ctx = RunContext::new();
        let cases = [
            json!("r1 and r2"),
            json!({"rules": []}),
            json!({"rules": [], "logic": "r1"}),
            json!({"rules": [{"id": "r1"}], "logic": "r1"}),
            json!({"rules": [{"id": "r1", "path": "x", "operator": "present"}], "logic": ""}),
        ];
        for (i, terms) in cases.into_iter().enumerate() {
            let c = controller(vec![step(&format!("s{i}"), Some(terms))]);
            assert!(c.should_run_step(&format!("s{i}"), &ctx).unwrap(), "case {i}");
        }
    }

    #[test]
    fn unknown_step_gating_errors() {
        let c = controller(vec![step("a", None)]);
        assert!(matches!(
            c.should_run_step("b", &RunContext::new()),
            Err(FlowError::UnknownStep(_))
        ));
    }
}
