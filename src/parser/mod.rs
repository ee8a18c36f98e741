// SPDX-License-Identifier: Apache-2.0

//! Operators that turn a line into structured attributes.
//!
//! These are the building blocks of header pipelines:
//!
//! - [`RegexParser`] - named capture groups become attributes
//! - [`JsonParser`] - top-level JSON object keys become attributes

mod json;
mod regex;
mod traits;

pub use json::JsonParser;
pub use regex::RegexParser;
pub use traits::Parser;

use serde::Deserialize;

use crate::error::Result;

/// Declarative operator settings, as found in `metadata_operators`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorConfig {
    /// Extract named capture groups
    RegexParser { regex: String },
    /// Extract top-level JSON keys
    JsonParser {
        #[serde(default)]
        lenient: bool,
    },
}

impl OperatorConfig {
    /// Build the operator described by this config.
    pub fn build(&self) -> Result<Box<dyn Parser>> {
        match self {
            OperatorConfig::RegexParser { regex } => Ok(Box::new(RegexParser::new(regex)?)),
            OperatorConfig::JsonParser { lenient } => {
                Ok(Box::new(JsonParser::new().with_lenient(*lenient)))
            }
        }
    }
}
