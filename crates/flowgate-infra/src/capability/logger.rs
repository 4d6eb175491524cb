//! `logger.Logger`: writes step messages to the tracing subscriber.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};

use flowgate_core::workflow::capability::{Capability, CapabilityError, CapabilityFactory, CapabilityRegistry};

const MANIFEST: &str = r#"
name: logger
class: Logger
methods:
  - name: debug
    arguments:
      - { name: message, type: str }
  - name: info
    arguments:
      - { name: message, type: str }
  - name: warn
    arguments:
      - { name: message, type: str }
  - name: error
    arguments:
      - { name: message, type: str }
"#;

pub(crate) fn register(registry: &mut CapabilityRegistry) {
    registry.register_manifest("logger", super::embedded_manifest(MANIFEST));
    let factory: CapabilityFactory = Arc::new(|_context: &Map<String, Value>, config: Map<String, Value>| {
        Ok(Arc::new(Logger::from_config(&config)) as Arc<dyn Capability>)
    });
    registry.register_factory("logger", "Logger", factory);
}

#[derive(Debug, Default)]
pub struct Logger {
    /// Optional tag prepended to every message.
    prefix: Option<String>,
}

impl Logger {
    fn from_config(config: &Map<String, Value>) -> Self {
        Self {
            prefix: config.get("prefix").and_then(Value::as_str).map(str::to_string),
        }
    }

    fn format(&self, message: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("[{prefix}] {message}"),
            None => message.to_string(),
        }
    }
}

impl Capability for Logger {
    fn invoke<'a>(
        &'a self,
        method: &'a str,
        args: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, CapabilityError>> {
        Box::pin(async move {
            let message = match args.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let line = self.format(&message);
            match method {
                "debug" => tracing::debug!(target: "flowgate::step", "{line}"),
                "info" => tracing::info!(target: "flowgate::step", "{line}"),
                "warn" => tracing::warn!(target: "flowgate::step", "{line}"),
                "error" => tracing::error!(target: "flowgate::step", "{line}"),
                _ => {
                    return Err(CapabilityError::UnknownMethod {
                        module: "logger".to_string(),
                        method: method.to_string(),
                    });
                }
            }
            Ok(json!({ "status": "ok", "message": line }))
        })
    }
}
