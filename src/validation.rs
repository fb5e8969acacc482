//! Tool argument validation against a tool's `inputSchema`.
//!
//! Model-chosen parameters are checked before a backend is called:
//!
//! 1. **Required parameters** must be present and non-null.
//! 2. **Unknown parameters** are rejected unless the schema allows
//!    `additionalProperties`.
//! 3. **Declared types** are enforced with safe coercion (`"200"` → `200`,
//!    `"true"` → `true`).
//! 4. **Enums** and numeric / string-length bounds are checked on the
//!    coerced value.
//!
//! A tool without `properties` accepts anything.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::protocol::declared_type;

/// A single problem with one parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Offending parameter (empty for whole-argument issues)
    pub param: String,
    /// What is wrong with it
    pub message: String,
}

impl Violation {
    fn new(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: message.into(),
        }
    }
}

/// Outcome of validating one argument map
#[derive(Debug, Clone)]
pub struct Validation {
    /// Violations found, empty when valid
    pub violations: Vec<Violation>,
    /// Arguments after coercion (the input unchanged when invalid)
    pub params: Map<String, Value>,
}

impl Validation {
    /// Returns `true` if there are no violations
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// One-line description of the violations plus the tool's parameters
    #[must_use]
    pub fn describe(&self, schema: &Value) -> String {
        let problems: Vec<String> = self
            .violations
            .iter()
            .map(|v| {
                if v.param.is_empty() {
                    v.message.clone()
                } else {
                    format!("parameter '{}' {}", v.param, v.message)
                }
            })
            .collect();

        let mut out = problems.join("; ");
        let hints = parameter_hints(schema);
        if !hints.is_empty() {
            out.push_str(". Valid parameters: ");
            out.push_str(&hints.join(", "));
        }
        out
    }
}

/// Validate `params` against `schema`
#[must_use]
pub fn validate(params: &Map<String, Value>, schema: &Value) -> Validation {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Validation {
            violations: Vec::new(),
            params: params.clone(),
        };
    };

    let required = required_names(schema);
    let allows_extra = match schema.get("additionalProperties") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Object(_)) => true,
        _ => false,
    };

    let mut violations = Vec::new();

    for name in &required {
        match params.get(*name) {
            None => violations.push(Violation::new(*name, "is required but missing")),
            Some(Value::Null) => violations.push(Violation::new(*name, "is required and must not be null")),
            Some(_) => {}
        }
    }

    if !allows_extra {
        for key in params.keys().filter(|k| !properties.contains_key(k.as_str())) {
            violations.push(Violation::new(key, "is not a parameter of this tool"));
        }
    }

    // Missing or unknown names make type errors noise
    if !violations.is_empty() {
        return Validation {
            violations,
            params: params.clone(),
        };
    }

    let mut coerced = Map::new();
    for (name, value) in params {
        let Some(property) = properties.get(name) else {
            coerced.insert(name.clone(), value.clone());
            continue;
        };
        if value.is_null() {
            coerced.insert(name.clone(), Value::Null);
            continue;
        }

        match check_property(value, property) {
            Ok(v) => {
                coerced.insert(name.clone(), v);
            }
            Err(message) => violations.push(Violation::new(name, message)),
        }
    }

    let params = if violations.is_empty() { coerced } else { params.clone() };
    Validation { violations, params }
}

fn required_names(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Coerce `value` to its declared type and check constraints
fn check_property(value: &Value, property: &Value) -> Result<Value, String> {
    let coerced = match declared_type(property) {
        Some(types) => coerce_any(value, &types)?,
        None => value.clone(),
    };

    if let Some(options) = property.get("enum").and_then(Value::as_array) {
        if !options.contains(&coerced) {
            let options: Vec<String> = options.iter().map(display_value).collect();
            return Err(format!("must be one of: {}", options.join(", ")));
        }
    }

    if let Some(n) = coerced.as_f64() {
        if let Some(min) = property.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("must be >= {min}"));
            }
        }
        if let Some(max) = property.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("must be <= {max}"));
            }
        }
    }

    if let Some(s) = coerced.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = property.get("minLength").and_then(Value::as_u64) {
            if len < min {
                return Err(format!("must be at least {min} characters long"));
            }
        }
        if let Some(max) = property.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                return Err(format!("must be at most {max} characters long"));
            }
        }
    }

    Ok(coerced)
}

/// Try each `|`-separated type in turn; an exact match wins over coercion
fn coerce_any(value: &Value, types: &str) -> Result<Value, String> {
    let types: Vec<&str> = types.split('|').collect();
    if types.iter().any(|t| matches_exactly(value, t)) {
        return Ok(value.clone());
    }

    let mut first_error = None;
    for ty in &types {
        match coerce(value, ty) {
            Ok(v) => return Ok(v),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| format!("has unexpected type {}", type_name(value))))
}

fn matches_exactly(value: &Value, ty: &str) -> bool {
    match (ty, value) {
        ("string", Value::String(_))
        | ("number", Value::Number(_))
        | ("boolean", Value::Bool(_))
        | ("array", Value::Array(_))
        | ("object", Value::Object(_)) => true,
        ("integer", Value::Number(n)) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

fn coerce(value: &Value, ty: &str) -> Result<Value, String> {
    match ty {
        "string" => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(expected("string", value)),
        },
        "integer" => coerce_integer(value),
        "number" => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected number, got \"{s}\"")),
            _ => Err(expected("number", value)),
        },
        "boolean" => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got \"{s}\"")),
            },
            _ => Err(expected("boolean", value)),
        },
        "array" if value.is_array() => Ok(value.clone()),
        "object" if value.is_object() => Ok(value.clone()),
        "array" | "object" => Err(expected(ty, value)),
        _ => Ok(value.clone()),
    }
}

fn coerce_integer(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            // 2^63 itself is out of range, hence the open upper bound
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Ok(Value::from(f as i64))
            }
            _ => Err(format!("expected integer, got {n}")),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected integer, got \"{s}\"")),
        _ => Err(expected("integer", value)),
    }
}

fn expected(ty: &str, value: &Value) -> String {
    format!("expected {ty}, got {}", type_name(value))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{s}\""),
        _ => v.to_string(),
    }
}

/// `name (type, required)` for every declared property
fn parameter_hints(schema: &Value) -> Vec<String> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: HashSet<&str> = required_names(schema).into_iter().collect();

    properties
        .iter()
        .map(|(name, property)| {
            let ty = declared_type(property).unwrap_or_else(|| "any".to_string());
            let flag = if required.contains(name.as_str()) { "required" } else { "optional" };
            format!("{name} ({ty}, {flag})")
        })
        .collect()
}
