//! `{{ context.path }}` template rendering against a run context.
//!
//! Placeholders hold a single path rooted at `context`, using the same
//! dotted/bracket syntax as the match evaluator. A string that consists of
//! exactly one placeholder renders to the referenced JSON value unchanged;
//! anything else renders to a string with each placeholder interpolated.
//! Unresolvable paths render as an empty string.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::path::{self, PathError, Segment};

/// The only root a placeholder may reference.
pub const TEMPLATE_ROOT: &str = "context";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated placeholder in template '{0}'")]
    Unterminated(String),

    #[error("invalid placeholder expression '{expr}': {source}")]
    InvalidExpression {
        expr: String,
        #[source]
        source: PathError,
    },

    #[error("placeholder '{0}' must be rooted at 'context'")]
    UnknownRoot(String),
}

/// A parsed placeholder with its byte span in the source string.
struct Placeholder {
    start: usize,
    end: usize,
    segments: Vec<Segment>,
}

fn scan(template: &str) -> Result<Vec<Placeholder>, TemplateError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while let Some(open) = template[offset..].find("{{") {
        let start = offset + open;
        let Some(close) = template[start + 2..].find("}}") else {
            return Err(TemplateError::Unterminated(template.to_string()));
        };
        let end = start + 2 + close + 2;
        let expr = template[start + 2..end - 2].trim();
        let segments = path::parse_path(expr).map_err(|source| TemplateError::InvalidExpression {
            expr: expr.to_string(),
            source,
        })?;
        match segments.first() {
            Some(Segment::Key(root)) if root == TEMPLATE_ROOT => {}
            _ => return Err(TemplateError::UnknownRoot(expr.to_string())),
        }
        out.push(Placeholder {
            start,
            end,
            segments,
        });
        offset = end;
    }
    Ok(out)
}

fn lookup(context: &Map<String, Value>, segments: &[Segment]) -> Option<Value> {
    // segments[0] is the `context` root, checked by `scan`.
    match segments.get(1) {
        None => Some(Value::Object(context.clone())),
        Some(Segment::Key(key)) => path::resolve(context.get(key)?, &segments[2..]),
        Some(_) => None,
    }
}

/// Render a scalar for interpolation into a larger string.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render one template string.
pub fn render_str(template: &str, context: &Map<String, Value>) -> Result<Value, TemplateError> {
    let placeholders = scan(template)?;
    if placeholders.is_empty() {
        return Ok(Value::String(template.to_string()));
    }

    if let [only] = placeholders.as_slice() {
        if only.start == 0 && only.end == template.len() {
            return Ok(lookup(context, &only.segments).unwrap_or_else(|| Value::String(String::new())));
        }
    }

    let mut rendered = String::with_capacity(template.len());
    let mut cursor = 0;
    for p in &placeholders {
        rendered.push_str(&template[cursor..p.start]);
        if let Some(v) = lookup(context, &p.segments) {
            rendered.push_str(&display_value(&v));
        }
        cursor = p.end;
    }
    rendered.push_str(&template[cursor..]);
    Ok(Value::String(rendered))
}

/// Render a template to a plain string, whatever the referenced value type.
pub fn render_to_string(template: &str, context: &Map<String, Value>) -> Result<String, TemplateError> {
    render_str(template, context).map(|v| display_value(&v))
}

/// Render every string leaf of `value`, recursing into lists and maps.
pub fn render_value(value: &Value, context: &Map<String, Value>) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => render_str(s, context),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => render_map(map, context).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Render a step input map.
pub fn render_map(
    input: &Map<String, Value>,
    context: &Map<String, Value>,
) -> Result<Map<String, Value>, TemplateError> {
    input
        .iter()
        .map(|(k, v)| render_value(v, context).map(|rendered| (k.clone(), rendered)))
        .collect()
}

/// Top-level context keys referenced by any placeholder inside `value`.
pub fn referenced_keys(value: &Value) -> Result<BTreeSet<String>, TemplateError> {
    let mut keys = BTreeSet::new();
    collect_keys(value, &mut keys)?;
    Ok(keys)
}

fn collect_keys(value: &Value, keys: &mut BTreeSet<String>) -> Result<(), TemplateError> {
    match value {
        Value::String(s) => {
            for p in scan(s)? {
                if let Some(Segment::Key(key)) = p.segments.get(1) {
                    keys.insert(key.clone());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_keys(item, keys)?;
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_keys(v, keys)?;
            }
        }
        _ => {}
    }
    Ok(())
}
