//! Response body shape validation for API probes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON value type used in shape expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Any,
}

impl JsonType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        self == Self::Any || self == Self::of(value)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// Minimal structural expectations on a JSON response body.
///
/// ```yaml
/// body_shape:
///   type: array
///   min_items: 1
///   fields:
///     0.id: number
///     0.name: string
///   equals:
///     0.status: active
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyShape {
    /// Type of the document root.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub root: Option<JsonType>,
    /// Minimum number of elements when the root is an array or object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    /// Dot-separated paths that must exist with the given type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, JsonType>,
    /// Dot-separated paths that must hold exactly this value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, Value>,
    /// Substrings the raw body must contain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
}

impl BodyShape {
    /// Whether the shape needs a parsed JSON document to be checked.
    pub fn needs_json(&self) -> bool {
        self.root.is_some()
            || self.min_items.is_some()
            || !self.fields.is_empty()
            || !self.equals.is_empty()
    }
}

/// Look up a dot-separated path. Numeric segments index into arrays.
pub fn get_by_json_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = json;

    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Check `raw` against `shape`, returning every violation found.
pub fn validate_shape(raw: &str, shape: &BodyShape) -> Vec<String> {
    let mut errors = validate_contains(raw, &shape.contains);

    if !shape.needs_json() {
        return errors;
    }

    let json: Value = match serde_json::from_str(raw) {
        Ok(json) => json,
        Err(e) => {
            errors.push(format!("body is not valid JSON: {e}"));
            return errors;
        }
    };

    if let Some(expected) = shape.root {
        if !expected.matches(&json) {
            errors.push(format!(
                "expected root of type {expected}, got {}",
                JsonType::of(&json)
            ));
        }
    }

    if let Some(min) = shape.min_items {
        let len = match &json {
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        };
        match len {
            Some(len) if len < min => {
                errors.push(format!("expected at least {min} items, got {len}"))
            }
            Some(_) => {}
            None => errors.push(format!(
                "min_items requires an array or object root, got {}",
                JsonType::of(&json)
            )),
        }
    }

    errors.extend(validate_fields(&json, &shape.fields));
    errors.extend(validate_json(&json, &shape.equals));
    errors
}

/// Every path must exist and carry the expected type.
pub fn validate_fields(json: &Value, fields: &BTreeMap<String, JsonType>) -> Vec<String> {
    let mut errors = Vec::new();

    for (path, expected) in fields {
        match get_by_json_path(json, path) {
            Some(actual) if expected.matches(actual) => {}
            Some(actual) => errors.push(format!(
                "field '{path}' should be {expected}, got {}",
                JsonType::of(actual)
            )),
            None => errors.push(format!("field '{path}' is missing")),
        }
    }

    errors
}

/// Every path must exist and equal the expected value.
pub fn validate_json(json: &Value, expectations: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    for (path, expected) in expectations {
        match get_by_json_path(json, path) {
            Some(actual) if actual == expected => {}
            Some(actual) => errors.push(format!(
                "field '{path}' expected {expected}, got {actual}"
            )),
            None => errors.push(format!("field '{path}' is missing")),
        }
    }

    errors
}

pub fn validate_contains(body: &str, texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .filter(|text| !body.contains(text.as_str()))
        .map(|text| format!("body does not contain '{text}'"))
        .collect()
}
