//! Workflow document parsing, structural validation, and discovery.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use flowgate_types::workflow::{FailureHandler, StepDefinition, StepType, WorkflowDefinition, WorkflowDocument};

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow YAML: {0}")]
    Parse(String),

    #[error("invalid workflow: {0}")]
    Validation(String),
}

/// A workflow found under the workflows directory.
#[derive(Debug, Clone)]
pub struct DiscoveredWorkflow {
    /// First path component below the workflows root.
    pub repo: String,
    /// File stem.
    pub name: String,
    pub path: PathBuf,
    pub definition: WorkflowDefinition,
}

/// Parse a `{ workflow: {...} }` document.
pub fn parse_workflow_yaml(text: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let doc: WorkflowDocument =
        serde_yaml_ng::from_str(text).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    Ok(doc.workflow)
}

/// Read, parse and validate one workflow file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let definition = parse_workflow_yaml(&text)?;
    validate_definition(&definition)?;
    Ok(definition)
}

/// Path of `{repo}/{name}.yaml` (or `.yml`) under `root`.
pub fn workflow_path(root: &Path, repo: &str, name: &str) -> Option<PathBuf> {
    if [repo, name]
        .iter()
        .any(|p| p.is_empty() || p.contains("..") || p.contains('/') || p.contains('\\'))
    {
        return None;
    }
    ["yaml", "yml"]
        .iter()
        .map(|ext| root.join(repo).join(format!("{name}.{ext}")))
        .find(|p| p.is_file())
}

/// Structural checks beyond what deserialization enforces.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
    let invalid = |msg: String| Err(DefinitionError::Validation(msg));

    if definition.name.trim().is_empty() {
        return invalid("workflow name is empty".to_string());
    }
    if definition.steps.is_empty() {
        return invalid(format!("workflow '{}' has no steps", definition.name));
    }

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.id.as_str()) {
            return invalid(format!("duplicate step id '{}'", step.id));
        }
        validate_step(step)?;
    }

    match &definition.global_failure_handler {
        Some(FailureHandler::Steps(ids)) => {
            if let Some(unknown) = ids.iter().find(|id| !seen.contains(id.as_str())) {
                return invalid(format!("global failure handler references unknown step '{unknown}'"));
            }
        }
        Some(FailureHandler::Inline(step)) => require_action(step, "global failure handler")?,
        None => {}
    }
    Ok(())
}

fn validate_step(step: &StepDefinition) -> Result<(), DefinitionError> {
    if step.id.trim().is_empty() {
        return Err(DefinitionError::Validation("step with empty id".to_string()));
    }
    match step.step_type {
        StepType::Action if step.action.as_deref().is_none_or(str::is_empty) => {
            return Err(DefinitionError::Validation(format!(
                "action step '{}' has no action",
                step.id
            )));
        }
        StepType::Webform if step.module.as_deref().is_none_or(str::is_empty) => {
            return Err(DefinitionError::Validation(format!(
                "webform step '{}' has no module",
                step.id
            )));
        }
        _ => {}
    }
    if let Some(delivery) = &step.delivery_step {
        require_action(delivery, &format!("delivery step of '{}'", step.id))?;
    }
    if let Some(handler) = &step.step_failure_handler {
        require_action(handler, &format!("failure handler of '{}'", step.id))?;
    }
    Ok(())
}

fn require_action(step: &StepDefinition, what: &str) -> Result<(), DefinitionError> {
    if step.step_type != StepType::Action || step.action.as_deref().is_none_or(str::is_empty) {
        return Err(DefinitionError::Validation(format!(
            "{what} must be an action step with an action"
        )));
    }
    Ok(())
}

/// Walk `root` for workflow files.
///
/// Directories named in `ignored` are skipped. Files that fail to load are
/// logged and skipped.
pub fn discover_workflows(root: &Path, ignored: &[String]) -> Vec<DiscoveredWorkflow> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read workflow directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if ignored.iter().any(|i| *i == file_name) {
                    tracing::debug!(dir = %path.display(), "ignored workflow directory");
                } else {
                    pending.push(path);
                }
                continue;
            }
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let mut components = relative.components();
            let repo = match (components.next(), components.next()) {
                (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
                _ => {
                    tracing::warn!(path = %path.display(), "workflow file outside a repo directory, skipping");
                    continue;
                }
            };
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            match load_workflow_file(&path) {
                Ok(definition) => found.push(DiscoveredWorkflow {
                    repo,
                    name,
                    path,
                    definition,
                }),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping workflow file"),
            }
        }
    }

    found.sort_by(|a, b| (&a.repo, &a.name).cmp(&(&b.repo, &b.name)));
    tracing::info!(count = found.len(), root = %root.display(), "workflows discovered");
    found
}
