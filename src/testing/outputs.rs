//! Output extraction and assertions
//!
//! Outputs are read from `output -json`, which prints every output of the
//! configuration as `{"name": {"sensitive": .., "type": .., "value": ..}}`.
//! Reading all of them lets a missing output be reported with the list of
//! outputs that do exist.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::config::OutputShape;
use crate::common::{AssertionError, ExtractionError, ValueMismatch};
use crate::tool::InvocationResult;

/// Immutable view of one output, keyed by field
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSnapshot {
    name: String,
    values: BTreeMap<String, Value>,
}

impl OutputSnapshot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value rendered the way a flat output map reads it
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).map(render)
    }
}

/// Extract the output `name` from an `output -json` invocation
pub fn extract_outputs(
    result: &InvocationResult,
    name: &str,
    shape: OutputShape,
) -> Result<OutputSnapshot, ExtractionError> {
    let malformed = |reason: String| ExtractionError::Malformed {
        name: name.to_string(),
        reason,
    };

    let all: Map<String, Value> = serde_json::from_str(result.stdout.trim())
        .map_err(|e| malformed(format!("tool output is not a JSON object: {}", e)))?;

    let entry = all.get(name).ok_or_else(|| ExtractionError::Missing {
        name: name.to_string(),
        available: all.keys().cloned().collect(),
    })?;

    let value = entry
        .get("value")
        .ok_or_else(|| malformed("entry has no 'value' field".to_string()))?;

    let values = match (shape, value) {
        (OutputShape::Map, Value::Object(fields)) => fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(render(v))))
            .collect(),
        (OutputShape::Map, other) => {
            return Err(malformed(format!(
                "expected a map, got {}",
                type_name(other)
            )))
        }
        (OutputShape::Json, Value::Object(fields)) => fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        (OutputShape::Json, Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        (OutputShape::Json, scalar) if is_blank(scalar) => BTreeMap::new(),
        (OutputShape::Json, scalar) => BTreeMap::from([(name.to_string(), scalar.clone())]),
    };

    Ok(OutputSnapshot {
        name: name.to_string(),
        values,
    })
}

/// The output has at least one entry; the values themselves may be blank
pub fn assert_non_empty(snapshot: &OutputSnapshot) -> Result<(), AssertionError> {
    if !snapshot.is_empty() {
        Ok(())
    } else {
        Err(AssertionError::Empty {
            output: snapshot.name.clone(),
        })
    }
}

/// Every key in `required` is present; reports all missing keys at once
pub fn assert_has_keys<S: AsRef<str>>(
    snapshot: &OutputSnapshot,
    required: &[S],
) -> Result<(), AssertionError> {
    let missing_keys: Vec<String> = required
        .iter()
        .map(|key| key.as_ref())
        .filter(|key: &&str| !snapshot.values.contains_key(*key))
        .map(str::to_string)
        .collect();

    if missing_keys.is_empty() {
        Ok(())
    } else {
        Err(AssertionError::MissingKeys {
            output: snapshot.name.clone(),
            missing_keys,
        })
    }
}

/// Every expected key holds exactly the expected string value
pub fn assert_values(
    snapshot: &OutputSnapshot,
    expected: &BTreeMap<String, String>,
) -> Result<(), AssertionError> {
    let mismatches: Vec<ValueMismatch> = expected
        .iter()
        .filter_map(|(key, want)| {
            let actual = snapshot.get_str(key);
            (actual.as_deref() != Some(want.as_str())).then(|| ValueMismatch {
                key: key.clone(),
                expected: want.clone(),
                actual,
            })
        })
        .collect();

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(AssertionError::ValueMismatch {
            output: snapshot.name.clone(),
            mismatches,
        })
    }
}

/// Strings as-is, everything else as compact JSON
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A null or empty-string scalar output carries nothing
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
