//! Capability modules: manifest loading and the built-in modules.
//!
//! - `logger` -- `logger.Logger.{debug,info,warn,error}`
//! - `http` -- `http.HttpClient.request`

pub mod http;
pub mod logger;

use std::path::{Path, PathBuf};

use serde_json::Value;

use flowgate_core::workflow::capability::CapabilityRegistry;

/// File name of a module manifest inside its module directory.
pub const MANIFEST_FILE: &str = "module.yaml";

/// Registry with every built-in capability and its embedded manifest.
pub fn builtin_registry(module_root: impl Into<PathBuf>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new(module_root.into());
    logger::register(&mut registry);
    http::register(&mut registry);
    registry
}

/// Register the manifest of every `{modules_dir}/{name}/module.yaml`.
///
/// Returns how many manifests were registered. Unreadable manifests are
/// logged and skipped; preflight validation reports them later.
pub async fn load_module_manifests(registry: &mut CapabilityRegistry, modules_dir: &Path) -> usize {
    let mut dir = match tokio::fs::read_dir(modules_dir).await {
        Ok(dir) => dir,
        Err(err) => {
            tracing::debug!(dir = %modules_dir.display(), error = %err, "no modules directory");
            return 0;
        }
    };

    let mut loaded = 0;
    loop {
        let entry = match dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(dir = %modules_dir.display(), error = %err, "failed to scan modules directory");
                break;
            }
        };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let module = entry.file_name().to_string_lossy().into_owned();
        let manifest_path = path.join(MANIFEST_FILE);
        let text = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(%module, error = %err, "module has no readable manifest");
                continue;
            }
        };
        match serde_yaml_ng::from_str::<Value>(&text) {
            Ok(raw) => {
                if registry.has_manifest(&module) {
                    tracing::info!(%module, "module manifest on disk overrides built-in");
                }
                registry.register_manifest(module, raw);
                loaded += 1;
            }
            Err(err) => {
                tracing::warn!(%module, error = %err, "failed to parse module manifest");
            }
        }
    }
    tracing::info!(count = loaded, dir = %modules_dir.display(), "module manifests loaded");
    loaded
}

/// Parse an embedded YAML manifest.
pub(crate) fn embedded_manifest(yaml: &str) -> Value {
    serde_yaml_ng::from_str(yaml).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtins_have_valid_manifests() {
        let registry = builtin_registry("modules");
        assert_eq!(registry.modules(), vec!["http".to_string(), "logger".to_string()]);
        assert!(registry.validate_manifest("logger").valid);
        assert!(registry.validate_manifest("http").valid);
        let http = registry.manifest("http").unwrap();
        assert!(http.method("request").unwrap().accepts("headers"));
    }

    #[tokio::test]
    async fn manifests_load_from_module_dirs() {
        let tmp = TempDir::new().unwrap();
        let jira = tmp.path().join("jira");
        std::fs::create_dir_all(&jira).unwrap();
        std::fs::write(
            jira.join(MANIFEST_FILE),
            "name: jira\nclass: Jira\nmethods:\n  - name: create_issue\n    arguments:\n      - { name: summary, type: str }\n",
        )
        .unwrap();
        let broken = tmp.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILE), "name: [").unwrap();
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let mut registry = CapabilityRegistry::new(tmp.path().to_path_buf());
        assert_eq!(load_module_manifests(&mut registry, tmp.path()).await, 1);
        let manifest = registry.manifest("jira").unwrap();
        assert_eq!(manifest.class, "Jira");
        assert!(!registry.validate_manifest("empty").valid);
    }

    #[tokio::test]
    async fn missing_modules_dir_loads_nothing() {
        let mut registry = CapabilityRegistry::default();
        assert_eq!(load_module_manifests(&mut registry, Path::new("/nonexistent/modules")).await, 0);
    }
}
