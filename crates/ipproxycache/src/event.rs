//! Event records passed through the resolver and the cache

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the event's tags
pub const TAGS_FIELD: &str = "tags";

/// A flat JSON object carrying fields in and out of a lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Create an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an event from a JSON object
    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }

    /// Get a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field, returning the previous value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Check whether a field is present
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// IP address held in `field`
    ///
    /// For an array field only the first element is used.
    pub fn source_ip(&self, field: &str) -> Option<&str> {
        match self.fields.get(field)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(values) => values.first()?.as_str(),
            _ => None,
        }
    }

    /// Tags attached to the event
    pub fn tags(&self) -> Vec<&str> {
        match self.fields.get(TAGS_FIELD) {
            Some(Value::Array(tags)) => tags.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Attach a tag unless it is already present
    pub fn add_tag(&mut self, tag: &str) {
        let entry = self
            .fields
            .entry(TAGS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));

        if !entry.is_array() {
            // A scalar tags field becomes the first tag
            let existing = entry.take();
            *entry = Value::Array(vec![existing]);
        }

        if let Value::Array(tags) = entry {
            if !tags.iter().any(|t| t.as_str() == Some(tag)) {
                tags.push(Value::from(tag));
            }
        }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the event has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.fields).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
