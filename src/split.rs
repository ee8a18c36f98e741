// SPDX-License-Identifier: Apache-2.0

//! Record boundary detection.
//!
//! A [`SplitFunc`] looks at the bytes accumulated so far and either reports
//! the next record boundary or asks for more input. The reader drives it and
//! decides when the input is final (`at_eof`), which is only the case when a
//! trailing partial record is being flushed.

use regex::bytes::Regex;
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A record boundary found by a [`SplitFunc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Bytes consumed from the front of the buffer, delimiter included
    pub advance: usize,
    /// Range of the record content within the buffer
    pub token: Range<usize>,
}

impl Split {
    fn new(advance: usize, token: Range<usize>) -> Self {
        Self { advance, token }
    }
}

/// Finds record boundaries in a byte buffer.
pub trait SplitFunc: Send + Sync + fmt::Debug {
    /// Return the next boundary in `data`, or `None` when more bytes are needed.
    ///
    /// When `at_eof` is true the buffer is final and any remaining bytes form
    /// the last record.
    fn split(&self, data: &[u8], at_eof: bool) -> Option<Split>;
}

/// Shared handle to a split function. Readers carry it across rotation.
pub type SharedSplitFunc = Arc<dyn SplitFunc>;

/// Multiline settings: exactly one of the patterns must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultilineConfig {
    /// Regex matching the first line of a record
    pub line_start_pattern: Option<String>,
    /// Regex matching the last line of a record
    pub line_end_pattern: Option<String>,
}

/// Selects the split strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SplitterFactory {
    /// One record per `\n` terminated line
    #[default]
    Newline,
    /// Records begin where the pattern matches
    LineStart(String),
    /// Records end where the pattern matches
    LineEnd(String),
    /// Records of exactly this many bytes
    FixedSize(usize),
}

impl SplitterFactory {
    /// Pick the strategy from the multiline and fixed-size settings.
    pub fn from_config(multiline: Option<&MultilineConfig>, fixed_size: Option<usize>) -> Result<Self> {
        let multiline = multiline.filter(|m| m.line_start_pattern.is_some() || m.line_end_pattern.is_some());

        match (multiline, fixed_size) {
            (Some(_), Some(_)) => Err(Error::Config(
                "multiline and fixed_size cannot both be set".to_string(),
            )),
            (None, Some(0)) => Err(Error::Config("fixed_size must be positive".to_string())),
            (None, Some(size)) => Ok(SplitterFactory::FixedSize(size)),
            (None, None) => Ok(SplitterFactory::Newline),
            (Some(m), None) => match (&m.line_start_pattern, &m.line_end_pattern) {
                (Some(_), Some(_)) => Err(Error::Config(
                    "only one of line_start_pattern or line_end_pattern can be set".to_string(),
                )),
                (Some(start), None) => Ok(SplitterFactory::LineStart(start.clone())),
                (None, Some(end)) => Ok(SplitterFactory::LineEnd(end.clone())),
                (None, None) => Ok(SplitterFactory::Newline),
            },
        }
    }

    /// Build a split function that never yields records above `max_log_size`.
    pub fn build(&self, max_log_size: usize) -> Result<SharedSplitFunc> {
        let inner: Box<dyn SplitFunc> = match self {
            SplitterFactory::Newline => Box::new(NewlineSplitter),
            SplitterFactory::LineStart(pattern) => Box::new(LineStartSplitter {
                regex: compile_multiline(pattern)?,
            }),
            SplitterFactory::LineEnd(pattern) => Box::new(LineEndSplitter {
                regex: compile_multiline(pattern)?,
            }),
            SplitterFactory::FixedSize(size) => Box::new(FixedSizeSplitter { size: *size }),
        };

        Ok(Arc::new(MaxSizeSplitter {
            inner,
            max_size: max_log_size,
        }))
    }
}

fn compile_multiline(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?m){}", pattern))
        .map_err(|e| Error::Config(format!("invalid multiline pattern: {}", e)))
}

fn trim_trailing_newlines(data: &[u8], mut end: usize) -> usize {
    while end > 0 && matches!(data[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    end
}

/// Splits on `\n`, dropping a trailing `\r`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewlineSplitter;

impl SplitFunc for NewlineSplitter {
    fn split(&self, data: &[u8], at_eof: bool) -> Option<Split> {
        if let Some(i) = data.iter().position(|&b| b == b'\n') {
            let end = if i > 0 && data[i - 1] == b'\r' { i - 1 } else { i };
            return Some(Split::new(i + 1, 0..end));
        }
        if at_eof && !data.is_empty() {
            return Some(Split::new(data.len(), 0..data.len()));
        }
        None
    }
}

/// A record runs from one start-pattern match to the next.
#[derive(Debug, Clone)]
struct LineStartSplitter {
    regex: Regex,
}

impl SplitFunc for LineStartSplitter {
    fn split(&self, data: &[u8], at_eof: bool) -> Option<Split> {
        let flush_all = || {
            (at_eof && !data.is_empty())
                .then(|| Split::new(data.len(), 0..trim_trailing_newlines(data, data.len())))
        };

        let Some(first) = self.regex.find(data) else {
            return flush_all();
        };

        if first.start() != 0 {
            // Bytes before the first match form their own record
            let end = trim_trailing_newlines(data, first.start());
            return Some(Split::new(first.start(), 0..end));
        }

        let search_from = first.end().max(1);
        if search_from >= data.len() {
            return flush_all();
        }

        match self.regex.find_at(data, search_from) {
            Some(second) => {
                let end = trim_trailing_newlines(data, second.start());
                Some(Split::new(second.start(), 0..end))
            }
            None => flush_all(),
        }
    }
}

/// A record runs up to and including an end-pattern match.
#[derive(Debug, Clone)]
struct LineEndSplitter {
    regex: Regex,
}

impl SplitFunc for LineEndSplitter {
    fn split(&self, data: &[u8], at_eof: bool) -> Option<Split> {
        let m = self.regex.find_iter(data).find(|m| m.end() > 0);

        match m {
            // A match touching the end of the buffer may still be growing
            Some(m) if m.end() < data.len() || at_eof => {
                let mut advance = m.end();
                if data.get(advance) == Some(&b'\n') {
                    advance += 1;
                }
                let end = trim_trailing_newlines(data, m.end());
                Some(Split::new(advance, 0..end))
            }
            _ if at_eof && !data.is_empty() => Some(Split::new(
                data.len(),
                0..trim_trailing_newlines(data, data.len()),
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FixedSizeSplitter {
    size: usize,
}

impl SplitFunc for FixedSizeSplitter {
    fn split(&self, data: &[u8], at_eof: bool) -> Option<Split> {
        if data.len() >= self.size {
            return Some(Split::new(self.size, 0..self.size));
        }
        if at_eof && !data.is_empty() {
            return Some(Split::new(data.len(), 0..data.len()));
        }
        None
    }
}

/// Caps records at `max_size` bytes. An oversized record is emitted in
/// `max_size` pieces rather than buffered without bound.
#[derive(Debug)]
struct MaxSizeSplitter {
    inner: Box<dyn SplitFunc>,
    max_size: usize,
}

impl SplitFunc for MaxSizeSplitter {
    fn split(&self, data: &[u8], at_eof: bool) -> Option<Split> {
        if data.len() <= self.max_size {
            return self.inner.split(data, at_eof);
        }

        let window = &data[..self.max_size];
        self.inner
            .split(window, false)
            .or_else(|| Some(Split::new(self.max_size, 0..self.max_size)))
    }
}
