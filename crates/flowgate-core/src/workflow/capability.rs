//! Capability modules: the units of work that action steps invoke.
//!
//! A capability is addressed as `module.Class.method`. The registry holds a
//! factory per `(module, class)` and the raw `module.yaml` manifest per
//! module. Manifests are validated before a run starts and restrict which
//! input keys reach a method.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use flowgate_types::manifest::{ManifestValidation, MethodSpec, ModuleManifest};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("invalid action reference '{0}': expected module.Class.method or context.<name>.<method>")]
    InvalidAction(String),

    #[error("invalid module name '{0}'")]
    InvalidModuleName(String),

    #[error("capability {module}.{class} is not registered")]
    NotFound { module: String, class: String },

    #[error("context module '{0}' is not loaded")]
    UnknownContextModule(String),

    #[error("method '{method}' is not declared by module '{module}'")]
    UnknownMethod { module: String, method: String },

    #[error("invalid capability configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("module.yaml not found in {0}")]
    NotFound(String),

    #[error("failed to parse module.yaml: {0}")]
    Parse(String),

    #[error("Missing required field: '{0}'")]
    MissingField(&'static str),

    #[error("Expected 'methods' to be a list")]
    MethodsNotList,

    #[error("Method missing 'name' field")]
    MethodMissingName,

    #[error("Arguments for method '{0}' should be a list")]
    ArgumentsNotList(String),

    #[error("Each argument in method '{0}' must have 'name' and 'type'")]
    ArgumentIncomplete(String),
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// An instantiated capability. Object-safe; methods are dispatched by name.
pub trait Capability: Send + Sync {
    fn invoke<'a>(
        &'a self,
        method: &'a str,
        args: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, CapabilityError>>;
}

/// Builds a capability from a read-only context snapshot and merged config.
pub type CapabilityFactory = Arc<
    dyn Fn(&Map<String, Value>, Map<String, Value>) -> Result<Arc<dyn Capability>, CapabilityError>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Action references
// ---------------------------------------------------------------------------

/// A parsed step `action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRef {
    Module {
        module: String,
        class: String,
        method: String,
    },
    /// `context.<name>.<method>`: a method on a per-run context module.
    Context { name: String, method: String },
}

impl ActionRef {
    pub fn method(&self) -> &str {
        match self {
            ActionRef::Module { method, .. } | ActionRef::Context { method, .. } => method,
        }
    }
}

impl FromStr for ActionRef {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(CapabilityError::InvalidAction(s.to_string()));
        }
        if parts[0] == "context" {
            return Ok(ActionRef::Context {
                name: parts[1].to_string(),
                method: parts[2].to_string(),
            });
        }
        if parts[0].contains('/') || parts[0].contains('\\') {
            return Err(CapabilityError::InvalidModuleName(parts[0].to_string()));
        }
        Ok(ActionRef::Module {
            module: parts[0].to_string(),
            class: parts[1].to_string(),
            method: parts[2].to_string(),
        })
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRef::Module { module, class, method } => write!(f, "{module}.{class}.{method}"),
            ActionRef::Context { name, method } => write!(f, "context.{name}.{method}"),
        }
    }
}

/// Split a context module's `module.Class`.
pub fn parse_module_class(s: &str) -> Result<(String, String), CapabilityError> {
    match s.split_once('.') {
        Some((module, class)) if !module.is_empty() && !class.is_empty() && !class.contains('.') => {
            if module.contains('/') {
                return Err(CapabilityError::InvalidModuleName(module.to_string()));
            }
            Ok((module.to_string(), class.to_string()))
        }
        _ => Err(CapabilityError::InvalidAction(s.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Config merging
// ---------------------------------------------------------------------------

/// Merge module-level defaults under a step's input. Step values win; nested
/// objects merge key by key.
pub fn merge_module_config(defaults: Option<&Value>, step: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = match defaults {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    merge_into(&mut merged, step);
    merged
}

fn merge_into(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_into(existing, incoming),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Keep only the arguments `method` declares.
pub fn accepted_args(method: &MethodSpec, input: Map<String, Value>) -> Map<String, Value> {
    input.into_iter().filter(|(k, _)| method.accepts(k)).collect()
}

// ---------------------------------------------------------------------------
// Manifest validation
// ---------------------------------------------------------------------------

/// Validate a raw `module.yaml` document and convert it to a manifest.
pub fn parse_manifest(raw: &Value) -> Result<ModuleManifest, ManifestError> {
    let Value::Object(doc) = raw else {
        return Err(ManifestError::Parse("manifest is not a mapping".to_string()));
    };
    for field in ["name", "class", "methods"] {
        if !doc.contains_key(field) {
            return Err(ManifestError::MissingField(field));
        }
    }
    let Some(methods) = doc.get("methods").and_then(Value::as_array) else {
        return Err(ManifestError::MethodsNotList);
    };

    for method in methods {
        let Some(name) = method.get("name").and_then(Value::as_str) else {
            return Err(ManifestError::MethodMissingName);
        };
        match method.get("arguments") {
            None | Some(Value::Null) => {}
            Some(Value::Array(args)) => {
                let complete = args
                    .iter()
                    .all(|a| a.get("name").is_some() && a.get("type").is_some());
                if !complete {
                    return Err(ManifestError::ArgumentIncomplete(name.to_string()));
                }
            }
            Some(_) => return Err(ManifestError::ArgumentsNotList(name.to_string())),
        }
    }

    serde_json::from_value(raw.clone()).map_err(|e| ManifestError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Factories and manifests of every known capability module.
pub struct CapabilityRegistry {
    module_root: PathBuf,
    factories: HashMap<(String, String), CapabilityFactory>,
    manifests: HashMap<String, Value>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(PathBuf::from("modules"))
    }
}

impl CapabilityRegistry {
    /// `module_root` is only used to describe where manifests are expected.
    pub fn new(module_root: PathBuf) -> Self {
        Self {
            module_root,
            factories: HashMap::new(),
            manifests: HashMap::new(),
        }
    }

    pub fn register_factory(
        &mut self,
        module: impl Into<String>,
        class: impl Into<String>,
        factory: CapabilityFactory,
    ) {
        let key = (module.into(), class.into());
        tracing::debug!(module = %key.0, class = %key.1, "capability registered");
        self.factories.insert(key, factory);
    }

    /// Record the raw manifest of `module`. Validation happens on use.
    pub fn register_manifest(&mut self, module: impl Into<String>, raw: Value) {
        self.manifests.insert(module.into(), raw);
    }

    pub fn has_manifest(&self, module: &str) -> bool {
        self.manifests.contains_key(module)
    }

    /// Module names with a manifest, sorted.
    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.manifests.keys().cloned().collect();
        names.sort();
        names
    }

    /// The validated manifest of `module`.
    pub fn manifest(&self, module: &str) -> Result<ModuleManifest, ManifestError> {
        let raw = self.manifests.get(module).ok_or_else(|| {
            ManifestError::NotFound(self.module_root.join(module).display().to_string())
        })?;
        parse_manifest(raw)
    }

    pub fn validate_manifest(&self, module: &str) -> ManifestValidation {
        match self.manifest(module) {
            Ok(_) => ManifestValidation::ok(module),
            Err(e) => ManifestValidation::invalid(e.to_string()),
        }
    }

    /// Instantiate `module.Class` for one invocation or one run.
    pub fn instantiate(
        &self,
        module: &str,
        class: &str,
        context: &Map<String, Value>,
        config: Map<String, Value>,
    ) -> Result<Arc<dyn Capability>, CapabilityError> {
        let factory = self
            .factories
            .get(&(module.to_string(), class.to_string()))
            .ok_or_else(|| CapabilityError::NotFound {
                module: module.to_string(),
                class: class.to_string(),
            })?;
        factory(context, config)
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<String> = self
            .factories
            .keys()
            .map(|(m, c)| format!("{m}.{c}"))
            .collect();
        factories.sort();
        f.debug_struct("CapabilityRegistry")
            .field("module_root", &self.module_root)
            .field("factories", &factories)
            .field("manifests", &self.modules())
            .finish()
    }
}
