//! Serialization of engine outputs and snapshots with a string fallback.
//!
//! Every place that turns an opaque value into wire data goes through
//! [`safe_serialize`]: structured JSON when the value supports it, otherwise
//! its `Display` form. A serialization failure is never surfaced as a run
//! failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::RunError;

/// An output after `safe_serialize`: structured JSON or its string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedValue {
    Structured(Value),
    Text(String),
}

impl SerializedValue {
    pub fn to_json(&self) -> Value {
        match self {
            SerializedValue::Structured(value) => value.clone(),
            SerializedValue::Text(text) => Value::String(text.clone()),
        }
    }

    /// Wire form of the value.
    pub fn render(&self) -> String {
        match self {
            SerializedValue::Structured(Value::String(text)) | SerializedValue::Text(text) => {
                text.clone()
            }
            SerializedValue::Structured(value) => value.to_string(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, SerializedValue::Structured(_))
    }
}

/// Output produced by an engine step or handed to a transport.
pub trait OutputValue: fmt::Debug + fmt::Display + Send + Sync {
    fn to_json(&self) -> serde_json::Result<Value>;

    /// Engine-supplied output name, if any.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Engine-native summary, if any.
    fn summary(&self) -> Option<String> {
        None
    }
}

impl OutputValue for Value {
    fn to_json(&self) -> serde_json::Result<Value> {
        Ok(self.clone())
    }
}

impl OutputValue for String {
    fn to_json(&self) -> serde_json::Result<Value> {
        Ok(Value::String(self.clone()))
    }
}

/// Any serializable value with an optional engine-supplied name and summary.
#[derive(Debug, Clone)]
pub struct NamedOutput<T> {
    value: T,
    name: Option<String>,
    summary: Option<String>,
}

impl<T> NamedOutput<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            name: None,
            summary: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Display for NamedOutput<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl<T> OutputValue for NamedOutput<T>
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.value)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn summary(&self) -> Option<String> {
        self.summary.clone()
    }
}

/// Serialize `value` structurally, degrading to its string form on failure.
pub fn safe_serialize(value: &dyn OutputValue) -> SerializedValue {
    match value.to_json() {
        Ok(json) => SerializedValue::Structured(json),
        Err(err) => {
            let err = RunError::SerializationFailure(err.to_string());
            warn!(error = %err, "falling back to string representation");
            SerializedValue::Text(value.to_string())
        }
    }
}

/// Truncate `text` to `max_chars` characters, marking the cut with `...`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn structured_values_stay_structured() {
        let out = safe_serialize(&json!({"price": 420.0}));
        assert_eq!(out, SerializedValue::Structured(json!({"price": 420.0})));
    }

    #[test]
    fn unserializable_value_degrades_to_text() {
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), 3u8);
        let output = NamedOutput::new(map);

        let out = safe_serialize(&output);
        assert!(!out.is_structured());
        assert_eq!(out.render(), "{(1, 2): 3}");
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééééé", 2), "éé...");
    }

    #[test]
    fn named_output_exposes_name_and_summary() {
        let output = NamedOutput::new(json!(1))
            .with_name("$flights")
            .with_summary("one flight");
        assert_eq!(output.name(), Some("$flights"));
        assert_eq!(output.summary().as_deref(), Some("one flight"));
    }
}
