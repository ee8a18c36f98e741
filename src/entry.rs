// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Attribute map attached to every record emitted for a file.
pub type Attributes = HashMap<String, Value>;

/// Entry is a single record carved out of a file, together with the
/// attributes of the file it came from.
///
/// - `body`: The decoded record bytes (without the split delimiter)
/// - `attributes`: File attributes plus any header metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// When the record was read
    pub observed_timestamp: DateTime<Utc>,

    /// The record content
    pub body: Value,

    /// File and header attributes
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: Attributes,
}

impl Entry {
    /// Create a new entry with the current timestamp and empty body
    pub fn new() -> Self {
        Self::with_body(Value::Null)
    }

    /// Create a new entry with the given body value
    pub fn with_body(body: impl Into<Value>) -> Self {
        Self {
            observed_timestamp: Utc::now(),
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute to the entry
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Get the body as a string if it is one
    pub fn body_string(&self) -> Option<&str> {
        self.body.as_str()
    }

    /// Look up a string attribute
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_with_body() {
        let mut entry = Entry::with_body("hello");
        entry.add_attribute("log.file.name", "app.log");
        entry.add_attribute("lines", 3);

        assert_eq!(entry.body_string(), Some("hello"));
        assert_eq!(entry.attribute_str("log.file.name"), Some("app.log"));
        assert_eq!(entry.attribute_str("lines"), None);
        assert_eq!(entry.attributes.get("lines"), Some(&Value::from(3)));
    }

    #[test]
    fn test_entry_serialization_skips_empty_attributes() {
        let entry = Entry::with_body("x");
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("attributes").is_none());
        assert_eq!(json["body"], "x");
    }
}
