//! Capability module manifests (`module.yaml`).

use serde::{Deserialize, Serialize};

/// A validated capability module manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub class: String,
    pub methods: Vec<MethodSpec>,
}

impl ModuleManifest {
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A method exposed by a capability class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentSpec>,
}

impl MethodSpec {
    /// Names of the parameters the method accepts.
    pub fn accepts(&self, arg: &str) -> bool {
        self.arguments.iter().any(|a| a.name == arg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: String,
}

/// Outcome of a preflight manifest check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl ManifestValidation {
    pub fn ok(module: impl Into<String>) -> Self {
        Self {
            valid: true,
            error: None,
            module: Some(module.into()),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            module: None,
        }
    }
}
