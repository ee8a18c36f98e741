// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::file_id::FileId;
use super::fingerprint::Fingerprint;
use crate::consumer::Consumer;
use crate::encoding::Encoding;
use crate::entry::{Attributes, Entry};
use crate::header::HeaderPipeline;
use crate::split::{SharedSplitFunc, Split};

/// Bytes pulled from the file per read call
const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Persisted state for a single reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderState {
    /// Fingerprint for identifying this file
    pub fingerprint: Fingerprint,
    /// Bytes consumed and acknowledged downstream
    pub offset: u64,
    /// OS identity of the file, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    /// Path the file was last seen at
    #[serde(default)]
    pub path: PathBuf,
    /// File and header attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Whether the header phase is over
    #[serde(default)]
    pub header_finalized: bool,
    /// Header attributes collected so far while the header phase is open
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub header_output: Attributes,
}

/// Reader behavior shared by every reader built from the same factory.
#[derive(Debug)]
pub(crate) struct ReaderSettings {
    pub fingerprint_size: usize,
    pub encoding: Encoding,
    pub split: SharedSplitFunc,
}

/// What the reader does with each split record.
#[derive(Debug)]
pub(crate) enum Phase {
    /// Records are header lines and feed the header pipeline
    Header {
        pipeline: HeaderPipeline,
        split: SharedSplitFunc,
    },
    /// Records go downstream
    Normal,
}

/// Outcome of one read pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    /// Records accepted by the consumer
    pub emitted: usize,
    /// Records dropped because they could not be decoded
    pub skipped: usize,
    /// True when the consumer refused a record and the pass stopped early
    pub refused: bool,
}

enum Step {
    /// Record handled, move past it
    Advance,
    /// Phase changed, split the same bytes again
    Resplit,
    /// Stop the pass without consuming the record
    Stop,
}

/// Reader owns one file handle and the read state that goes with it.
pub struct Reader {
    pub(crate) settings: Arc<ReaderSettings>,
    pub(crate) file: Option<File>,
    pub(crate) path: PathBuf,
    pub(crate) file_id: Option<FileId>,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) offset: u64,
    pub(crate) attributes: Attributes,
    pub(crate) phase: Phase,
    pub(crate) header_finalized: bool,
    /// Polls since this reader was last matched to a file
    pub(crate) generation: u32,
    /// Poll cycle of the last read that moved the offset, for handle eviction
    pub(crate) last_read: u64,
    pub(crate) read_failures: u32,
}

impl Reader {
    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Get the current offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn header_finalized(&self) -> bool {
        self.header_finalized
    }

    /// Whether the reader still holds a file handle
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Get the saved state for persistence
    pub fn state(&self) -> ReaderState {
        ReaderState {
            fingerprint: self.fingerprint.clone(),
            offset: self.offset,
            file_id: self.file_id,
            path: self.path.clone(),
            attributes: self.attributes.clone(),
            header_finalized: self.header_finalized,
            header_output: self.header_output(),
        }
    }

    /// Header attributes collected by an unfinished header phase.
    pub(crate) fn header_output(&self) -> Attributes {
        match &self.phase {
            Phase::Header { pipeline, .. } => pipeline.output().clone(),
            Phase::Normal => Attributes::new(),
        }
    }

    /// Skip everything currently in the file without emitting it.
    pub fn offset_to_end(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            self.offset = file.metadata()?.len();
        }
        Ok(())
    }

    /// Read every complete record between the offset and the end of the file.
    ///
    /// A trailing record without a boundary stays in the file for the next
    /// pass. The offset only moves past records that were handled.
    pub fn read_to_end(
        &mut self,
        consumer: &dyn Consumer,
        shutdown: &AtomicBool,
    ) -> io::Result<ReadSummary> {
        self.read(consumer, shutdown, false)
    }

    /// Like [`Reader::read_to_end`], but the end of the file also ends the
    /// last record. Used when the file is going away.
    pub fn flush(&mut self, consumer: &dyn Consumer, shutdown: &AtomicBool) -> io::Result<ReadSummary> {
        self.read(consumer, shutdown, true)
    }

    /// Release the file handle. Fingerprint and offset are kept.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), fingerprint = %self.fingerprint, "Closed reader");
        }
    }

    fn read(
        &mut self,
        consumer: &dyn Consumer,
        shutdown: &AtomicBool,
        at_eof: bool,
    ) -> io::Result<ReadSummary> {
        let Some(file) = self.file.take() else {
            return Ok(ReadSummary::default());
        };

        let result = self.read_from(&file, consumer, shutdown, at_eof);
        self.file = Some(file);

        let summary = result?;
        self.refresh_fingerprint()?;
        Ok(summary)
    }

    fn read_from(
        &mut self,
        mut file: &File,
        consumer: &dyn Consumer,
        shutdown: &AtomicBool,
        at_eof: bool,
    ) -> io::Result<ReadSummary> {
        let mut summary = ReadSummary::default();

        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(
                path = %self.path.display(),
                fingerprint = %self.fingerprint,
                offset = self.offset,
                len,
                "File was truncated, reading from the start"
            );
            self.offset = 0;
            self.fingerprint = Fingerprint::new(file, self.settings.fingerprint_size)?;
        }

        file.seek(SeekFrom::Start(self.offset))?;

        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut eof = false;

        'outer: loop {
            let mut start = 0;

            while start < buf.len() || (eof && at_eof) {
                if shutdown.load(Ordering::Relaxed) {
                    break 'outer;
                }

                let flush = eof && at_eof;
                let Some(Split { advance, token }) = self.split_func().split(&buf[start..], flush)
                else {
                    break;
                };
                if advance == 0 {
                    break;
                }

                let record = &buf[start + token.start..start + token.end];
                match self.process(record, consumer, &mut summary) {
                    Step::Advance => {
                        start += advance;
                        self.offset += advance as u64;
                    }
                    Step::Resplit => continue,
                    Step::Stop => break 'outer,
                }
            }

            buf.drain(..start);

            if eof {
                break;
            }

            match file.read(&mut chunk) {
                Ok(0) => eof = true,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    fn split_func(&self) -> &SharedSplitFunc {
        match &self.phase {
            Phase::Header { split, .. } => split,
            Phase::Normal => &self.settings.split,
        }
    }

    fn process(&mut self, record: &[u8], consumer: &dyn Consumer, summary: &mut ReadSummary) -> Step {
        if let Phase::Header { pipeline, .. } = &mut self.phase {
            if !pipeline.consume_header_line(record, self.settings.encoding) {
                return Step::Advance;
            }
            self.finalize_header();
            return Step::Resplit;
        }

        if record.is_empty() {
            return Step::Advance;
        }

        let body = match self.settings.encoding.decode(record) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    fingerprint = %self.fingerprint,
                    offset = self.offset,
                    error = %e,
                    "Skipping record that could not be decoded"
                );
                summary.skipped += 1;
                return Step::Advance;
            }
        };

        let mut entry = Entry::with_body(body);
        entry.attributes = self.attributes.clone();

        match consumer.emit(entry) {
            Ok(()) => {
                summary.emitted += 1;
                Step::Advance
            }
            Err(e) => {
                debug!(
                    path = %self.path.display(),
                    fingerprint = %self.fingerprint,
                    offset = self.offset,
                    error = %e,
                    "Consumer refused record"
                );
                summary.refused = true;
                Step::Stop
            }
        }
    }

    /// End the header phase. One way only: the reader never re-enters it.
    pub(crate) fn finalize_header(&mut self) {
        if let Phase::Header { pipeline, .. } = std::mem::replace(&mut self.phase, Phase::Normal) {
            self.attributes.extend(pipeline.finish());
        }
        self.header_finalized = true;
        debug!(path = %self.path.display(), fingerprint = %self.fingerprint, "Header finalized");
    }

    /// Extend a short fingerprint with bytes written since it was taken.
    fn refresh_fingerprint(&mut self) -> io::Result<()> {
        if self.fingerprint.len() >= self.settings.fingerprint_size {
            return Ok(());
        }
        if let Some(file) = &self.file {
            let fresh = Fingerprint::new(file, self.settings.fingerprint_size)?;
            if fresh.starts_with(&self.fingerprint) {
                self.fingerprint = fresh;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint)
            .field("offset", &self.offset)
            .field("open", &self.file.is_some())
            .field("header_finalized", &self.header_finalized)
            .finish()
    }
}
