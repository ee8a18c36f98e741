// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::traits::Parser;
use crate::entry::Entry;
use crate::error::{Error, Result};

/// A parser that lifts the keys of a JSON object body into attributes.
#[derive(Debug, Clone, Default)]
pub struct JsonParser {
    /// If true, bodies that are not JSON objects pass through unchanged.
    /// If false, they are an error.
    lenient: bool,
}

impl JsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the parser is lenient.
    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

impl Parser for JsonParser {
    fn parse(&self, mut entry: Entry) -> Result<Entry> {
        let decoded = entry.body_string().map(serde_json::from_str::<Value>);
        let parsed = match decoded {
            Some(Ok(v)) => v,
            Some(Err(e)) if !self.lenient => {
                return Err(Error::Parse(format!("invalid JSON: {}", e)));
            }
            None if !self.lenient => {
                return Err(Error::Parse("json_parser requires a string body".to_string()));
            }
            _ => return Ok(entry),
        };

        match parsed {
            Value::Object(map) => {
                for (key, value) in map {
                    entry.add_attribute(key, value);
                }
                Ok(entry)
            }
            _ if self.lenient => Ok(entry),
            _ => Err(Error::Parse(
                "JSON must be an object at the top level".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "json_parser"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_parser_object() {
        let parser = JsonParser::new();
        let entry = parser
            .parse(Entry::with_body(r#"{"service": "api", "port": 8080}"#))
            .unwrap();

        assert_eq!(entry.attribute_str("service"), Some("api"));
        assert_eq!(entry.attributes.get("port"), Some(&Value::from(8080)));
    }

    #[test]
    fn test_json_parser_strict_rejects() {
        let parser = JsonParser::new();
        assert!(parser.parse(Entry::with_body("not json")).is_err());
        assert!(parser.parse(Entry::with_body("[1, 2]")).is_err());
    }

    #[test]
    fn test_json_parser_lenient_passes_through() {
        let parser = JsonParser::new().with_lenient(true);
        let entry = parser.parse(Entry::with_body("not json")).unwrap();
        assert!(entry.attributes.is_empty());
        assert_eq!(entry.body_string(), Some("not json"));
    }
}
