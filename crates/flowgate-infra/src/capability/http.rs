//! `http.HttpClient`: outbound HTTP calls from action steps.
//!
//! Config keys (merged from `module_defaults.http` and the step input):
//! - `timeout_secs` -- request timeout, default 30
//! - `headers` -- map of headers sent with every request

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};

use flowgate_core::workflow::capability::{Capability, CapabilityError, CapabilityFactory, CapabilityRegistry};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const MANIFEST: &str = r#"
name: http
class: HttpClient
methods:
  - name: request
    arguments:
      - { name: url, type: str }
      - { name: method, type: str }
      - { name: body, type: any }
      - { name: headers, type: dict }
"#;

pub(crate) fn register(registry: &mut CapabilityRegistry) {
    registry.register_manifest("http", super::embedded_manifest(MANIFEST));
    let factory: CapabilityFactory = Arc::new(|_context: &Map<String, Value>, config: Map<String, Value>| {
        Ok(Arc::new(HttpClient::from_config(&config)?) as Arc<dyn Capability>)
    });
    registry.register_factory("http", "HttpClient", factory);
}

pub struct HttpClient {
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
}

impl HttpClient {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, CapabilityError> {
        let timeout = config
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(concat!("flowgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CapabilityError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            headers: string_map(config.get("headers")),
        })
    }

    async fn request(&self, args: Map<String, Value>) -> Result<Value, CapabilityError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::InvalidConfig("http.request requires 'url'".to_string()))?;
        let method = args.get("method").and_then(Value::as_str).unwrap_or("GET");
        let http_method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| CapabilityError::InvalidConfig(format!("invalid HTTP method: {method}")))?;

        let mut request = self.client.request(http_method, url);
        let mut headers = self.headers.clone();
        headers.extend(string_map(args.get("headers")));
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request = match args.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(body),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%url, error = %e, "HTTP request failed");
                return Ok(json!({
                    "status": "fail",
                    "message": format!("HTTP request to '{url}' failed: {e}"),
                }));
            }
        };

        let status_code = response.status().as_u16();
        let success = response.status().is_success();
        let text = response
            .text()
            .await
            .map_err(|e| CapabilityError::Failed(format!("failed to read HTTP response body: {e}")))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::info!(%url, status_code, "HTTP step completed");
        let mut result = json!({
            "status": if success { "ok" } else { "fail" },
            "data": { "status_code": status_code, "body": body },
        });
        if !success {
            result["message"] = json!(format!("HTTP {status_code} from {url}"));
        }
        Ok(result)
    }
}

/// Stringify a JSON object's values; anything else is empty.
fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

impl Capability for HttpClient {
    fn invoke<'a>(
        &'a self,
        method: &'a str,
        args: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, CapabilityError>> {
        Box::pin(async move {
            match method {
                "request" => self.request(args).await,
                _ => Err(CapabilityError::UnknownMethod {
                    module: "http".to_string(),
                    method: method.to_string(),
                }),
            }
        })
    }
}
