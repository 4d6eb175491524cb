//! `flowgate validate <file>`: parse a workflow and preflight its modules.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use flowgate_core::workflow::definition::load_workflow_file;
use flowgate_core::workflow::engine::validate_modules;
use flowgate_infra::capability::{builtin_registry, load_module_manifests};
use flowgate_infra::config::load_config;

/// Validate `file` against the built-in modules and the manifests under the
/// configured modules directory.
pub async fn validate(home: &Path, file: &Path, json: bool) -> Result<()> {
    let config = load_config(home).await;
    let modules_dir = config.directories.resolve(home).modules;

    let mut registry = builtin_registry(&modules_dir);
    load_module_manifests(&mut registry, &modules_dir).await;

    let outcome = load_workflow_file(file)
        .map_err(anyhow::Error::from)
        .and_then(|definition| {
            validate_modules(&definition, &registry)?;
            Ok(definition)
        });

    match (&outcome, json) {
        (Ok(definition), true) => {
            let report = json!({
                "valid": true,
                "file": file.display().to_string(),
                "name": definition.name,
                "steps": definition.steps.len(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        (Ok(definition), false) => {
            println!(
                "  {} is valid: workflow '{}' with {} step(s)",
                file.display(),
                definition.name,
                definition.steps.len()
            );
        }
        (Err(e), true) => {
            let report = json!({
                "valid": false,
                "file": file.display().to_string(),
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        (Err(e), false) => {
            eprintln!("  {} is invalid: {e}", file.display());
        }
    }

    outcome.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn builtin_actions_validate() {
        let home = TempDir::new().unwrap();
        let file = home.path().join("ok.yaml");
        std::fs::write(
            &file,
            "workflow:\n  name: ok\n  steps:\n    - { id: a, type: action, action: http.HttpClient.request, input: { url: \"http://x\" } }\n",
        )
        .unwrap();
        assert!(validate(home.path(), &file, true).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_module_fails_preflight() {
        let home = TempDir::new().unwrap();
        let file = home.path().join("bad.yaml");
        std::fs::write(
            &file,
            "workflow:\n  name: bad\n  steps:\n    - { id: a, type: action, action: ghost.Ghost.haunt }\n",
        )
        .unwrap();
        let err = validate(home.path(), &file, false).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let home = TempDir::new().unwrap();
        assert!(validate(home.path(), &home.path().join("nope.yaml"), true).await.is_err());
    }
}
