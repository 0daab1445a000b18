//! Secret redaction for captured output.
//!
//! Step output can echo injected secrets back (deliberately or through
//! verbose tooling). Every piece of captured text and every stored output
//! value is passed through a [`Redactor`] before it reaches logs or
//! reports.

use serde_json::{Map, Value};

/// Redaction placeholder.
const MASK: &str = "***";

/// Secrets shorter than this are not masked: replacing a one or two
/// character value would mangle unrelated output.
const MIN_SECRET_LEN: usize = 4;

/// Masks known secret values in strings and JSON values.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    values: Vec<String>,
}

impl Redactor {
    /// Create a redactor for the given secret values.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .filter(|v| v.len() >= MIN_SECRET_LEN)
            .collect();
        // Longest first so overlapping secrets mask completely
        values.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { values }
    }

    /// Returns true if there is nothing to mask.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mask all secret occurrences in a string.
    pub fn redact_str(&self, input: &str) -> String {
        let mut output = input.to_string();
        for value in &self.values {
            if output.contains(value.as_str()) {
                output = output.replace(value.as_str(), MASK);
            }
        }
        output
    }

    /// Mask all secret occurrences in an optional string.
    pub fn redact_opt(&self, input: Option<String>) -> Option<String> {
        input.map(|s| self.redact_str(&s))
    }

    /// Recursively mask secret occurrences in a JSON value.
    pub fn redact_value(&self, value: &Value) -> Value {
        self.redact_recursive(value, 0, 20)
    }

    fn redact_recursive(&self, value: &Value, depth: usize, max_depth: usize) -> Value {
        // Prevent runaway recursion
        if depth >= max_depth {
            return value.clone();
        }

        match value {
            Value::String(s) => Value::String(self.redact_str(s)),
            Value::Object(map) => {
                let mut result = Map::new();
                for (key, val) in map {
                    result.insert(key.clone(), self.redact_recursive(val, depth + 1, max_depth));
                }
                Value::Object(result)
            }
            Value::Array(arr) => Value::Array(
                arr.iter()
                    .map(|item| self.redact_recursive(item, depth + 1, max_depth))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }
}
