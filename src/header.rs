// SPDX-License-Identifier: Apache-2.0

//! Header extraction.
//!
//! Some files start with a block of metadata lines (CSV column names, W3C
//! `#Fields:` directives, ...). While a reader is in its header phase every
//! line matching the header pattern is run through a small operator pipeline
//! and the extracted attributes are collected here. The first line that does
//! not match ends the header; the collected attributes are then attached to
//! every record the reader emits.

use regex::bytes::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::encoding::Encoding;
use crate::entry::{Attributes, Entry};
use crate::error::{Error, Result};
use crate::parser::{OperatorConfig, Parser};
use crate::split::{SharedSplitFunc, SplitterFactory};

/// Header settings as configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderConfig {
    /// Regex matching header lines
    pub pattern: String,
    /// Operators applied to each header line
    pub metadata_operators: Vec<OperatorConfig>,
}

/// Validated header settings shared by all readers.
#[derive(Debug)]
pub struct HeaderSettings {
    pattern: Regex,
    split: SharedSplitFunc,
    config: HeaderConfig,
}

impl HeaderSettings {
    pub fn new(config: &HeaderConfig, max_log_size: usize) -> Result<Self> {
        if config.metadata_operators.is_empty() {
            return Err(Error::Config(
                "header requires at least one metadata operator".to_string(),
            ));
        }

        let pattern = Regex::new(&config.pattern)
            .map_err(|e| Error::Config(format!("invalid header pattern: {}", e)))?;

        Ok(Self {
            pattern,
            split: SplitterFactory::Newline.build(max_log_size)?,
            config: config.clone(),
        })
    }

    /// Split function used while the header is being read.
    pub fn split_func(&self) -> SharedSplitFunc {
        self.split.clone()
    }

    pub fn is_header_line(&self, line: &[u8]) -> bool {
        self.pattern.is_match(line)
    }
}

/// Runs header lines through the configured operators and accumulates
/// their output.
pub struct HeaderPipeline {
    settings: Arc<HeaderSettings>,
    operators: Vec<Box<dyn Parser>>,
    output: Attributes,
}

impl HeaderPipeline {
    /// Build and start a pipeline for one reader.
    pub fn build(settings: Arc<HeaderSettings>) -> Result<Self> {
        let operators = settings
            .config
            .metadata_operators
            .iter()
            .map(|op| op.build())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::PipelineBuild(e.to_string()))?;

        Ok(Self {
            settings,
            operators,
            output: Attributes::new(),
        })
    }

    /// Feed one header candidate line.
    ///
    /// Returns true when the line is not part of the header. That line is not
    /// consumed; the caller must hand it to the normal record path.
    pub fn consume_header_line(&mut self, line: &[u8], encoding: Encoding) -> bool {
        if !self.settings.is_header_line(line) {
            return true;
        }

        let text = match encoding.decode(line) {
            Ok(text) => text,
            Err(e) => {
                debug!("Skipping undecodable header line: {}", e);
                return false;
            }
        };

        let mut entry = Entry::with_body(text);
        for op in &self.operators {
            entry = match op.parse(entry) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(operator = op.name(), "Header operator failed: {}", e);
                    return false;
                }
            };
        }

        self.output.extend(entry.attributes);
        false
    }

    /// Carry over attributes collected by a previous pipeline for the same file.
    pub fn extend_output(&mut self, attributes: Attributes) {
        self.output.extend(attributes);
    }

    /// Attributes collected so far.
    pub fn output(&self) -> &Attributes {
        &self.output
    }

    /// Stop the pipeline and hand over what it extracted.
    pub fn finish(self) -> Attributes {
        self.output
    }
}

impl std::fmt::Debug for HeaderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderPipeline")
            .field("operators", &self.operators.len())
            .field("output", &self.output)
            .finish()
    }
}
