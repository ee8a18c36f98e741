// SPDX-License-Identifier: Apache-2.0

use regex::Regex;

use super::traits::Parser;
use crate::entry::Entry;
use crate::error::{Error, Result};

/// A parser that extracts fields from a string using a regular expression
/// with named capture groups.
pub struct RegexParser {
    regex: Regex,
    /// Names of the capture groups (excluding the full match)
    group_names: Vec<String>,
}

impl RegexParser {
    /// Create a new RegexParser from a regex pattern string.
    ///
    /// The pattern must contain at least one named capture group using
    /// the `(?P<name>...)` syntax.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Regex(format!("invalid regex pattern: {}", e)))?;

        let group_names: Vec<String> = regex
            .capture_names()
            .skip(1) // Skip the full match (index 0)
            .filter_map(|name| name.map(|s| s.to_string()))
            .collect();

        if group_names.is_empty() {
            return Err(Error::Regex(
                "regex pattern must contain at least one named capture group (use (?P<name>...) syntax)".to_string()
            ));
        }

        Ok(Self { regex, group_names })
    }

    /// Get the names of the capture groups in this regex
    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }
}

impl Parser for RegexParser {
    fn parse(&self, mut entry: Entry) -> Result<Entry> {
        let line = entry
            .body_string()
            .ok_or_else(|| Error::Parse("regex_parser requires a string body".to_string()))?;

        let captures = self.regex.captures(line).ok_or_else(|| {
            Error::Parse(format!(
                "regex pattern does not match input: {:?}",
                line.chars().take(100).collect::<String>()
            ))
        })?;

        let fields: Vec<(String, String)> = self
            .group_names
            .iter()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();

        for (key, value) in fields {
            entry.add_attribute(key, value);
        }

        Ok(entry)
    }

    fn name(&self) -> &'static str {
        "regex_parser"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_parser_simple() {
        let parser = RegexParser::new(r"^(?P<key>\w+)=(?P<value>\w+)$").unwrap();

        let result = parser.parse(Entry::with_body("foo=bar")).unwrap();

        assert_eq!(result.attribute_str("key"), Some("foo"));
        assert_eq!(result.attribute_str("value"), Some("bar"));
        assert_eq!(result.body_string(), Some("foo=bar"));
    }

    #[test]
    fn test_regex_parser_no_named_groups() {
        assert!(RegexParser::new(r"^(\w+)=(\w+)$").is_err());
    }

    #[test]
    fn test_regex_parser_no_match() {
        let parser = RegexParser::new(r"^(?P<key>\w+)=(?P<value>\w+)$").unwrap();
        let result = parser.parse(Entry::with_body("this does not match"));
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_regex_parser_optional_groups() {
        let parser = RegexParser::new(r"^(?P<method>\w+)(?: (?P<path>\S+))?$").unwrap();

        let result = parser.parse(Entry::with_body("OPTIONS")).unwrap();
        assert_eq!(result.attribute_str("method"), Some("OPTIONS"));
        assert!(!result.attributes.contains_key("path"));
    }

    #[test]
    fn test_regex_parser_group_names() {
        let parser = RegexParser::new(r"(?P<a>\w+)-(?P<b>\w+)-(?P<c>\w+)").unwrap();
        assert_eq!(parser.group_names(), &["a", "b", "c"]);
    }

    #[test]
    fn test_regex_parser_non_string_body() {
        let parser = RegexParser::new(r"(?P<a>\w+)").unwrap();
        assert!(parser.parse(Entry::with_body(42)).is_err());
    }
}
