//! The two-field wire record exchanged with the broker.
//!
//! ```text
//! {"name":"UserRegistered","data":"{\"userName\":\"jeremias\"}"}
//! ```
//!
//! `data` is itself serialized JSON text for exactly one event. Field names
//! in both the envelope and the inner payload are lower-camel-case, so a
//! consumer written in any language can parse the message without
//! out-of-band schema knowledge.

use crate::error::DispatchError;
use crate::handler::Payload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Wire envelope: a logical event name plus the serialized event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Logical event name; `None` when a message arrives without one.
    #[serde(default)]
    pub name: Option<String>,

    /// Serialized event payload (JSON text).
    #[serde(alias = "eventData")]
    pub data: String,
}

impl Envelope {
    /// Create an envelope for an already-serialized event.
    #[must_use]
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            data: data.into(),
        }
    }

    /// Parse an envelope from raw message text.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] if the text is not a JSON object with
    /// a string `data` field.
    pub fn from_json(text: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(text)
            .map_err(|e| DispatchError::Parse(format!("Failed to parse envelope: {e}")))
    }

    /// Serialize the envelope to JSON text.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error, which cannot happen for
    /// string fields in practice.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The event name, if present and non-empty.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    /// Parse `data` as a loosely-typed JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] if `data` is not valid JSON or is not
    /// a JSON object.
    pub fn payload(&self) -> Result<Payload, DispatchError> {
        let value: Value = serde_json::from_str(&self.data)
            .map_err(|e| DispatchError::Parse(format!("Failed to parse event data: {e}")))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(DispatchError::Parse(format!(
                "Event data must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ name: {}, size: {} bytes }}",
            self.name.as_deref().unwrap_or("<none>"),
            self.data.len()
        )
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Two object keys that become the same key once lower-camel-cased.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("keys `{first}` and `{second}` both become `{cased}`")]
pub struct KeyCollision {
    /// The key as written on the wire
    pub cased: String,
    /// The key that claimed `cased` first
    pub first: String,
    /// The key that would have overwritten it
    pub second: String,
}

/// Rewrite every object key in `value` to lower-camel-case, recursively.
///
/// Applied to serialized events so Rust `snake_case` fields go on the wire
/// as `camelCase`. Map keys are rewritten too.
///
/// # Errors
///
/// Returns [`KeyCollision`] if two keys of one object map to the same
/// lower-camel-case key (`user_name` and `userName`).
pub fn camel_case_keys(value: Value) -> Result<Value, KeyCollision> {
    match value {
        Value::Object(map) => {
            let mut cased = Map::with_capacity(map.len());
            let mut sources: HashMap<String, String> = HashMap::with_capacity(map.len());
            for (key, value) in map {
                let target = lower_camel_case(&key);
                if let Some(first) = sources.get(&target) {
                    return Err(KeyCollision {
                        cased: target,
                        first: first.clone(),
                        second: key,
                    });
                }
                cased.insert(target.clone(), camel_case_keys(value)?);
                sources.insert(target, key);
            }
            Ok(Value::Object(cased))
        },
        Value::Array(items) => items
            .into_iter()
            .map(camel_case_keys)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

/// Convert a single identifier to lower-camel-case.
///
/// An underscore is a word break only when a letter follows it.
///
/// - `user_name` → `userName`
/// - `Username` → `username`
/// - `URLValue` → `urlValue`
/// - `_private` → `_private`
/// - `order_1` → `order_1`
#[must_use]
pub fn lower_camel_case(key: &str) -> String {
    let body = key.trim_start_matches('_');
    let mut out = String::with_capacity(key.len());
    out.push_str(&key[..key.len() - body.len()]);

    let mut first_segment = true;
    for segment in body.split('_').filter(|s| !s.is_empty()) {
        if first_segment {
            out.push_str(&lowercase_leading_run(segment));
            first_segment = false;
            continue;
        }
        let mut chars = segment.chars();
        match chars.next() {
            Some(head) if head.is_alphabetic() => {
                out.extend(head.to_uppercase());
                out.push_str(chars.as_str());
            },
            _ => {
                out.push('_');
                out.push_str(segment);
            },
        }
    }
    out
}

// Lowercases the leading run of capitals, keeping the last one of a run that
// is followed by a lowercase letter ("URLValue" -> "urlValue").
fn lowercase_leading_run(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(segment.len());
    for (i, c) in chars.iter().enumerate() {
        if !c.is_uppercase() {
            out.extend(chars[i..].iter());
            return out;
        }
        let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        if i > 0 && next_is_lower {
            out.extend(chars[i..].iter());
            return out;
        }
        out.extend(c.to_lowercase());
    }
    out
}
