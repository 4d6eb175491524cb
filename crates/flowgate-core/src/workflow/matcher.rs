//! Restricted condition evaluation for step gating and trigger matching.
//!
//! Three layers, all pure:
//!
//! - [`extract_json_path`]: pull a value out of a JSON document.
//! - [`evaluate_operator`]: compare an extracted value with an expected one.
//! - [`safe_eval_logic_expr`] / [`eval_logic`]: evaluate a tiny boolean
//!   grammar that combines rule results by id.
//!
//! The logic grammar accepts boolean literals (`True`, `False`, `true`,
//! `false`), `None`, integer and quoted string literals, rule-id names,
//! `not`/`and`/`or`, `==`/`!=` and parentheses. Anything else (attribute
//! access, calls, arithmetic, subscripts) is rejected, and every public
//! entry point reports a rejection as `false` instead of an error.
//!
//! Rule results are bound to names during evaluation rather than being
//! spliced into the expression text, so an id that is a substring of another
//! id (or of `True`) cannot corrupt the expression.

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::Value;

use flowgate_types::workflow::{ConditionRule, WorkflowDefinition};

use super::path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("operator '{0}' cannot compare these values")]
    TypeMismatch(&'static str),

    #[error("unsafe logic expression: {0}")]
    UnsafeExpression(String),

    #[error("syntax error in logic expression: {0}")]
    Syntax(String),

    #[error("unknown name in logic expression: {0}")]
    UnknownName(String),
}

// ---------------------------------------------------------------------------
// Path extraction
// ---------------------------------------------------------------------------

/// Extract `path` from `data`. Missing keys or malformed paths yield `None`.
///
/// A trailing `[*]` segment filters a list down to its truthy entries. There
/// is no projection: `items[*].name` does not collect `name` across items.
pub fn extract_json_path(data: &Value, path: &str) -> Option<Value> {
    match path::parse_path(path) {
        Ok(segments) => path::resolve(data, &segments),
        Err(e) => {
            tracing::debug!(path, error = %e, "path extraction failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Comparison operators usable in rules and trigger conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Present,
    Absent,
    IsIn,
    NotIn,
    Contains,
    NotContains,
    StartsWith,
    Length,
}

impl FromStr for Operator {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "present" => Operator::Present,
            "absent" => Operator::Absent,
            "is_in" => Operator::IsIn,
            "not_in" => Operator::NotIn,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "length" => Operator::Length,
            other => return Err(MatchError::UnsupportedOperator(other.to_string())),
        })
    }
}

/// `null` and a missing value are the same thing to every operator.
fn normalize(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

/// Numeric equality: `3 == 3.0`, and booleans compare as `1`/`0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Bool(flag), Value::Number(n)) | (Value::Number(n), Value::Bool(flag)) => {
            n.as_f64() == Some(if *flag { 1.0 } else { 0.0 })
        }
        _ => a == b,
    }
}

fn membership(op: &'static str, actual: Option<&Value>, expected: Option<&Value>) -> Result<bool, MatchError> {
    match (actual, expected) {
        (_, Some(Value::Array(items))) => {
            let needle = actual.cloned().unwrap_or(Value::Null);
            Ok(items.iter().any(|item| values_equal(item, &needle)))
        }
        (Some(Value::String(a)), Some(Value::String(e))) => Ok(e.contains(a.as_str())),
        (Some(Value::String(a)), Some(Value::Object(map))) => Ok(map.contains_key(a)),
        _ => Err(MatchError::TypeMismatch(op)),
    }
}

/// Apply `op`, surfacing unsupported operators and type mismatches as errors.
pub fn try_evaluate_operator(
    op: &str,
    actual: Option<&Value>,
    expected: Option<&Value>,
) -> Result<bool, MatchError> {
    let operator: Operator = op.parse()?;
    let actual = normalize(actual);
    let expected = normalize(expected);

    match operator {
        Operator::Equals | Operator::NotEquals => {
            let eq = match (actual, expected) {
                (None, None) => true,
                (Some(a), Some(e)) => values_equal(a, e),
                _ => false,
            };
            Ok(if operator == Operator::Equals { eq } else { !eq })
        }
        Operator::Present => Ok(actual.is_some()),
        Operator::Absent => Ok(actual.is_none()),
        Operator::IsIn => membership("is_in", actual, expected),
        Operator::NotIn => membership("not_in", actual, expected).map(|hit| !hit),
        Operator::Contains | Operator::NotContains => match (actual, expected) {
            (Some(Value::String(a)), Some(Value::String(e))) => {
                let hit = a.contains(e.as_str());
                Ok(if operator == Operator::Contains { hit } else { !hit })
            }
            (Some(Value::String(_)), _) => Err(MatchError::TypeMismatch("contains")),
            _ => Ok(false),
        },
        Operator::StartsWith => match (actual, expected) {
            (Some(Value::String(a)), Some(Value::String(e))) => Ok(a.starts_with(e.as_str())),
            (Some(Value::String(_)), _) => Err(MatchError::TypeMismatch("starts_with")),
            _ => Ok(false),
        },
        Operator::Length => {
            let len = match actual {
                Some(Value::Array(items)) => items.len(),
                Some(Value::String(s)) => s.chars().count(),
                _ => return Ok(false),
            };
            Ok(expected
                .and_then(Value::as_f64)
                .is_some_and(|want| want == len as f64))
        }
    }
}

/// Apply `op`; any error (unsupported operator, type mismatch) reads as `false`.
pub fn evaluate_operator(op: &str, actual: Option<&Value>, expected: Option<&Value>) -> bool {
    try_evaluate_operator(op, actual, expected).unwrap_or_else(|e| {
        tracing::debug!(operator = op, error = %e, "operator evaluation failed");
        false
    })
}

// ---------------------------------------------------------------------------
// Logic expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Eq,
    NotEq,
    And,
    Or,
    Not,
    Lit(Lit),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Lit {
    Bool(bool),
    Int(i64),
    Str(String),
    None,
}

impl Lit {
    fn truthy(&self) -> bool {
        match self {
            Lit::Bool(b) => *b,
            Lit::Int(i) => *i != 0,
            Lit::Str(s) => !s.is_empty(),
            Lit::None => false,
        }
    }

    fn as_number(&self) -> Option<i64> {
        match self {
            Lit::Bool(b) => Some(i64::from(*b)),
            Lit::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn equals(&self, other: &Lit) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, MatchError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' | '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(MatchError::UnsafeExpression(expr.to_string()));
                }
                tokens.push(if c == '=' { Token::Eq } else { Token::NotEq });
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|&ch| ch == quote) else {
                    return Err(MatchError::Syntax(format!("unterminated string in '{expr}'")));
                };
                tokens.push(Token::Lit(Lit::Str(chars[start..start + len].iter().collect())));
                i = start + len + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<i64>()
                    .map_err(|_| MatchError::Syntax(format!("bad integer '{text}'")))?;
                tokens.push(Token::Lit(Lit::Int(n)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "True" | "true" => Token::Lit(Lit::Bool(true)),
                    "False" | "false" => Token::Lit(Lit::Bool(false)),
                    "None" => Token::Lit(Lit::None),
                    _ => Token::Name(word),
                });
            }
            _ => return Err(MatchError::UnsafeExpression(expr.to_string())),
        }
    }
    Ok(tokens)
}

/// Recursive-descent evaluator: `or` < `and` < `not` < comparison < atom.
struct LogicParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    bindings: &'a HashMap<String, bool>,
}

impl LogicParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn or_expr(&mut self) -> Result<Lit, MatchError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = if left.truthy() { left } else { right };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Lit, MatchError> {
        let mut left = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.not_expr()?;
            left = if left.truthy() { right } else { left };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Lit, MatchError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.not_expr()?;
            return Ok(Lit::Bool(!inner.truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Lit, MatchError> {
        let first = self.atom()?;
        let mut result: Option<bool> = None;
        let mut left = first.clone();
        while let Some(op) = self.peek().cloned() {
            if op != Token::Eq && op != Token::NotEq {
                break;
            }
            self.pos += 1;
            let right = self.atom()?;
            let holds = if op == Token::Eq {
                left.equals(&right)
            } else {
                !left.equals(&right)
            };
            result = Some(result.unwrap_or(true) && holds);
            left = right;
        }
        Ok(match result {
            Some(b) => Lit::Bool(b),
            None => first,
        })
    }

    fn atom(&mut self) -> Result<Lit, MatchError> {
        match self.next() {
            Some(Token::Lit(lit)) => Ok(lit),
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    return Err(MatchError::UnsafeExpression(format!("call to '{name}'")));
                }
                self.bindings
                    .get(&name)
                    .map(|b| Lit::Bool(*b))
                    .ok_or(MatchError::UnknownName(name))
            }
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(MatchError::Syntax("expected ')'".to_string())),
                }
            }
            Some(other) => Err(MatchError::Syntax(format!("unexpected token {other:?}"))),
            None => Err(MatchError::Syntax("unexpected end of expression".to_string())),
        }
    }
}

/// Evaluate `expr` with rule results bound by id.
pub fn eval_logic(expr: &str, bindings: &HashMap<String, bool>) -> Result<bool, MatchError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(MatchError::Syntax("empty expression".to_string()));
    }
    let mut parser = LogicParser {
        tokens,
        pos: 0,
        bindings,
    };
    let value = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(MatchError::UnsafeExpression(expr.to_string()));
    }
    Ok(value.truthy())
}

/// Evaluate a closed boolean expression. Rejected or invalid input is `false`.
pub fn safe_eval_logic_expr(expr: &str) -> bool {
    eval_logic(expr, &HashMap::new()).unwrap_or_else(|e| {
        tracing::error!(expr, error = %e, "failed to evaluate logic expression");
        false
    })
}

// ---------------------------------------------------------------------------
// Rule sets
// ---------------------------------------------------------------------------

/// Evaluate every rule against `data`, keyed by rule id.
pub fn evaluate_rules(rules: &[ConditionRule], data: &Value) -> HashMap<String, bool> {
    rules
        .iter()
        .map(|rule| {
            let actual = extract_json_path(data, &rule.path);
            let result = evaluate_operator(&rule.operator, actual.as_ref(), rule.value.as_ref());
            tracing::debug!(
                rule = %rule.id,
                path = %rule.path,
                operator = %rule.operator,
                result,
                "rule evaluated"
            );
            (rule.id.clone(), result)
        })
        .collect()
}

/// Evaluate rules, then combine them with `logic`. Errors read as `false`.
pub fn evaluate_rule_set(rules: &[ConditionRule], logic: &str, data: &Value) -> bool {
    let results = evaluate_rules(rules, data);
    eval_logic(logic, &results).unwrap_or_else(|e| {
        tracing::error!(logic, error = %e, "failed to evaluate condition logic");
        false
    })
}

/// Decide whether an inbound payload should start a run of `workflow`.
///
/// Ad-hoc and agent-initiated workflows always match. Everything else needs
/// a `match` block with both `condition_logic` and `conditions`; without one
/// the answer is `false`.
///
/// Condition paths resolve against `payload` as given. HTTP starts pass
/// `{"payload": body}`, so a rule reads `payload.ref` exactly as a
/// `payload_parser` entry of the started run does.
pub fn match_trigger(workflow: &WorkflowDefinition, payload: &Value) -> bool {
    if workflow.trigger_kind().bypasses_match() {
        tracing::debug!(workflow = %workflow.name, "match skipped for ad-hoc workflow");
        return true;
    }

    let Some(block) = workflow.match_block.as_ref() else {
        return false;
    };
    let Some(logic) = block.condition_logic.as_deref().filter(|l| !l.trim().is_empty()) else {
        return false;
    };
    if block.conditions.is_empty() {
        return false;
    }

    evaluate_rule_set(&block.conditions, logic, payload)
}
