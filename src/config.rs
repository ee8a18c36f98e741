// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file consumer.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::header::{HeaderConfig, HeaderSettings};
use crate::split::{MultilineConfig, SplitterFactory};

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

impl std::str::FromStr for StartAt {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginning" => Ok(StartAt::Beginning),
            "end" => Ok(StartAt::End),
            _ => Err(format!(
                "Invalid start_at '{}'. Valid options: beginning, end",
                s
            )),
        }
    }
}

/// Configuration for the file consumer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConsumerConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,

    /// Glob patterns for files to exclude
    pub exclude: Vec<String>,

    /// How often to poll for file changes (in milliseconds)
    pub poll_interval_ms: u64,

    /// Where to start reading files that exist when the consumer starts
    pub start_at: StartAt,

    /// Size of fingerprint to use for file identification (in bytes)
    pub fingerprint_size: usize,

    /// Maximum size of a single log entry (in bytes)
    pub max_log_size: usize,

    /// Maximum number of files read concurrently within a poll cycle
    pub max_concurrent_files: usize,

    /// Maximum number of file handles kept open between poll cycles
    pub max_open_files: usize,

    /// Whether to include the file name as an attribute
    pub include_file_name: bool,

    /// Whether to include the file path as an attribute
    pub include_file_path: bool,

    /// Whether to include the symlink-resolved file name as an attribute
    pub include_file_name_resolved: bool,

    /// Whether to include the symlink-resolved absolute path as an attribute
    pub include_file_path_resolved: bool,

    /// Multiline record settings
    pub multiline: Option<MultilineConfig>,

    /// Split records into fixed-size chunks instead of lines
    pub fixed_size: Option<usize>,

    /// Record encoding
    pub encoding: Encoding,

    /// Emit a trailing unterminated record when its file goes away
    pub flush_on_close: bool,

    /// Header extraction settings
    pub header: Option<HeaderConfig>,

    /// Polls a closed, unmatched reader is remembered for
    pub forget_after_polls: u32,

    /// Path to store reader checkpoints. No persistence when unset.
    pub offsets_path: Option<PathBuf>,
}

impl Default for FileConsumerConfig {
    fn default() -> Self {
        Self {
            include: vec![],
            exclude: vec![],
            poll_interval_ms: 200,
            start_at: StartAt::default(),
            fingerprint_size: 1000,
            max_log_size: 1024 * 1024, // 1MB
            max_concurrent_files: 512,
            max_open_files: 1024,
            include_file_name: true,
            include_file_path: false,
            include_file_name_resolved: false,
            include_file_path_resolved: false,
            multiline: None,
            fixed_size: None,
            encoding: Encoding::default(),
            flush_on_close: true,
            header: None,
            forget_after_polls: 3,
            offsets_path: None,
        }
    }
}

impl FileConsumerConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolve the split strategy from the multiline and fixed-size settings
    pub fn splitter_factory(&self) -> Result<SplitterFactory> {
        SplitterFactory::from_config(self.multiline.as_ref(), self.fixed_size)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::Config("include patterns cannot be empty".to_string()));
        }

        if self.fingerprint_size < 16 {
            return Err(Error::Config(
                "fingerprint_size must be at least 16 bytes".to_string(),
            ));
        }

        if self.max_log_size == 0 {
            return Err(Error::Config("max_log_size must be positive".to_string()));
        }

        if self.max_concurrent_files < 2 {
            return Err(Error::Config(
                "max_concurrent_files must be at least 2".to_string(),
            ));
        }

        if self.max_open_files == 0 {
            return Err(Error::Config("max_open_files must be positive".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }

        // Builds the split function once so bad patterns fail at startup
        self.splitter_factory()?.build(self.max_log_size)?;

        if let Some(header) = &self.header {
            if self.start_at == StartAt::End {
                return Err(Error::Config(
                    "header requires start_at = beginning".to_string(),
                ));
            }
            HeaderSettings::new(header, self.max_log_size)?;
        }

        Ok(())
    }
}
