//! Dotted/bracketed JSON path parsing and traversal.
//!
//! Shared by the match evaluator (`payload.labels[*]`) and the template
//! renderer (`{{ context.items[0]['name'] }}`).
//!
//! Supported segment forms:
//! - `key` -- object member
//! - `key[3]` -- array element
//! - `key['some key']` / `key["some key"]` -- quoted object member
//! - `key[*]` -- wildcard: keeps the truthy entries of a list

use serde_json::Value;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("empty segment in path '{0}'")]
    EmptySegment(String),

    #[error("unterminated bracket in path '{0}'")]
    UnterminatedBracket(String),

    #[error("invalid bracket expression '[{inner}]' in path '{path}'")]
    InvalidBracket { path: String, inner: String },

    #[error("invalid character '{ch}' in path '{path}'")]
    InvalidCharacter { path: String, ch: char },
}

/// Parse a path such as `context.items[*]` into segments.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let mut segments = Vec::new();
    let mut chars = trimmed.chars().peekable();
    let mut name = String::new();
    // True right after a '.', when a name must follow.
    let mut expect_name = true;

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if name.is_empty() && expect_name {
                    return Err(PathError::EmptySegment(trimmed.to_string()));
                }
                if !name.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut name)));
                }
                expect_name = true;
            }
            '[' => {
                if !name.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut name)));
                } else if segments.is_empty() {
                    return Err(PathError::EmptySegment(trimmed.to_string()));
                }
                let mut inner = String::new();
                let mut closed = false;
                let mut quote: Option<char> = None;
                for c in chars.by_ref() {
                    match (quote, c) {
                        (None, ']') => {
                            closed = true;
                            break;
                        }
                        (None, '\'' | '"') if inner.is_empty() => {
                            quote = Some(c);
                            inner.push(c);
                        }
                        (Some(q), c) if c == q => {
                            quote = None;
                            inner.push(c);
                        }
                        _ => inner.push(c),
                    }
                }
                if !closed {
                    return Err(PathError::UnterminatedBracket(trimmed.to_string()));
                }
                segments.push(parse_bracket(trimmed, inner.trim())?);
                expect_name = false;
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => {
                name.push(c);
                expect_name = false;
            }
            c => {
                return Err(PathError::InvalidCharacter {
                    path: trimmed.to_string(),
                    ch: c,
                });
            }
        }
    }

    if !name.is_empty() {
        segments.push(Segment::Key(name));
    } else if expect_name {
        return Err(PathError::EmptySegment(trimmed.to_string()));
    }

    Ok(segments)
}

fn parse_bracket(path: &str, inner: &str) -> Result<Segment, PathError> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Ok(index) = inner.parse::<usize>() {
        return Ok(Segment::Index(index));
    }
    let quoted = inner.len() >= 2
        && ((inner.starts_with('\'') && inner.ends_with('\''))
            || (inner.starts_with('"') && inner.ends_with('"')));
    if quoted {
        return Ok(Segment::Key(inner[1..inner.len() - 1].to_string()));
    }
    Err(PathError::InvalidBracket {
        path: path.to_string(),
        inner: inner.to_string(),
    })
}

/// Walk `segments` from `root`. Any missing key or type mismatch yields `None`.
///
/// A wildcard keeps the truthy entries of a list. It does not project a child
/// field across items: a key segment after a wildcard resolves to `None`.
pub fn resolve(root: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(root.clone());
    };
    match first {
        Segment::Key(key) => resolve(root.as_object()?.get(key)?, rest),
        Segment::Index(index) => resolve(root.as_array()?.get(*index)?, rest),
        Segment::Wildcard => match root {
            Value::Array(items) => {
                let kept = Value::Array(items.iter().filter(|v| is_truthy(v)).cloned().collect());
                resolve(&kept, rest)
            }
            other => resolve(other, rest),
        },
    }
}

/// Truthiness of a JSON value: null, false, 0, "", [] and {} are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
