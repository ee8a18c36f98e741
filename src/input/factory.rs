// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

use super::file_id::FileId;
use super::fingerprint::Fingerprint;
use super::reader::{Phase, Reader, ReaderSettings, ReaderState};
use crate::config::{FileConsumerConfig, StartAt};
use crate::entry::Attributes;
use crate::error::Result;
use crate::header::{HeaderPipeline, HeaderSettings};

pub const LOG_FILE_NAME: &str = "log.file.name";
pub const LOG_FILE_PATH: &str = "log.file.path";
pub const LOG_FILE_NAME_RESOLVED: &str = "log.file.name_resolved";
pub const LOG_FILE_PATH_RESOLVED: &str = "log.file.path_resolved";

/// Starting state for a reader. Everything left at its default describes a
/// file seen for the first time.
#[derive(Debug, Default)]
pub(crate) struct ReaderSeed {
    pub fingerprint: Option<Fingerprint>,
    pub offset: u64,
    pub file_id: Option<FileId>,
    pub attributes: Attributes,
    pub header_finalized: bool,
    /// Header attributes collected before the header phase was interrupted
    pub header_output: Attributes,
}

impl From<ReaderState> for ReaderSeed {
    fn from(state: ReaderState) -> Self {
        Self {
            fingerprint: Some(state.fingerprint),
            offset: state.offset,
            file_id: state.file_id,
            attributes: state.attributes,
            header_finalized: state.header_finalized,
            header_output: state.header_output,
        }
    }
}

/// Builds readers, either fresh for a newly discovered file or as the
/// continuation of an existing reader on a new handle.
#[derive(Debug)]
pub struct ReaderFactory {
    settings: Arc<ReaderSettings>,
    header: Option<Arc<HeaderSettings>>,
    include_file_name: bool,
    include_file_path: bool,
    include_file_name_resolved: bool,
    include_file_path_resolved: bool,
}

impl ReaderFactory {
    pub fn new(config: &FileConsumerConfig) -> Result<Self> {
        let split = config.splitter_factory()?.build(config.max_log_size)?;
        let header = config
            .header
            .as_ref()
            .map(|h| HeaderSettings::new(h, config.max_log_size))
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            settings: Arc::new(ReaderSettings {
                fingerprint_size: config.fingerprint_size,
                encoding: config.encoding,
                split,
            }),
            header,
            include_file_name: config.include_file_name,
            include_file_path: config.include_file_path,
            include_file_name_resolved: config.include_file_name_resolved,
            include_file_path_resolved: config.include_file_path_resolved,
        })
    }

    /// Capture a fingerprint of the configured size.
    pub fn fingerprint(&self, file: &File) -> io::Result<Fingerprint> {
        Fingerprint::new(file, self.settings.fingerprint_size)
    }

    /// Build a reader for a file seen for the first time.
    ///
    /// The fingerprint is captured from `file` when not supplied.
    pub fn new_reader(
        &self,
        file: File,
        path: PathBuf,
        fingerprint: Option<Fingerprint>,
        start_at: StartAt,
    ) -> Result<Reader> {
        let mut reader = self.build(
            Some(file),
            path,
            ReaderSeed {
                fingerprint,
                ..Default::default()
            },
        )?;

        if start_at == StartAt::End {
            reader.offset_to_end()?;
        }
        Ok(reader)
    }

    /// Build the successor of `old` on a new handle.
    ///
    /// Offset, fingerprint, attributes and header state carry over; the file
    /// attributes are resolved again for the new path.
    pub fn copy(&self, old: &Reader, file: File, path: PathBuf) -> Result<Reader> {
        self.build(
            Some(file),
            path,
            ReaderSeed {
                fingerprint: Some(old.fingerprint.clone()),
                offset: old.offset,
                file_id: None,
                attributes: old.attributes.clone(),
                header_finalized: old.header_finalized,
                header_output: old.header_output(),
            },
        )
    }

    /// Build a reader that is not bound to any file.
    pub fn unbound_reader(&self) -> Result<Reader> {
        self.build(None, PathBuf::new(), ReaderSeed::default())
    }

    /// Rebuild a closed reader from checkpointed state.
    pub fn restore(&self, state: ReaderState) -> Result<Reader> {
        let path = state.path.clone();
        self.build(None, path, state.into())
    }

    /// Build a reader from an explicit starting state.
    pub(crate) fn build(&self, file: Option<File>, path: PathBuf, seed: ReaderSeed) -> Result<Reader> {
        let phase = match &self.header {
            Some(header) if !seed.header_finalized => {
                let mut pipeline = HeaderPipeline::build(header.clone())?;
                pipeline.extend_output(seed.header_output);
                Phase::Header {
                    pipeline,
                    split: header.split_func(),
                }
            }
            _ => Phase::Normal,
        };

        let mut attributes = seed.attributes;
        let mut file_id = seed.file_id;
        let mut fingerprint = seed.fingerprint;

        if let Some(file) = &file {
            self.resolve_attributes(&path, &mut attributes);
            file_id = FileId::from_file(file).ok().or(file_id);
            if fingerprint.is_none() {
                fingerprint = Some(self.fingerprint(file)?);
            }
        }

        Ok(Reader {
            settings: self.settings.clone(),
            file,
            path,
            file_id,
            fingerprint: fingerprint.unwrap_or_default(),
            offset: seed.offset,
            attributes,
            phase,
            header_finalized: seed.header_finalized,
            generation: 0,
            last_read: 0,
            read_failures: 0,
        })
    }

    fn resolve_attributes(&self, path: &Path, attributes: &mut Attributes) {
        let resolved = resolve_path(path);

        set_or_remove(attributes, LOG_FILE_NAME, self.include_file_name, || {
            file_name(path)
        });
        set_or_remove(attributes, LOG_FILE_PATH, self.include_file_path, || {
            path.to_string_lossy().into_owned()
        });
        set_or_remove(
            attributes,
            LOG_FILE_NAME_RESOLVED,
            self.include_file_name_resolved,
            || file_name(&resolved),
        );
        set_or_remove(
            attributes,
            LOG_FILE_PATH_RESOLVED,
            self.include_file_path_resolved,
            || resolved.to_string_lossy().into_owned(),
        );
    }
}

fn set_or_remove(
    attributes: &mut Attributes,
    key: &str,
    include: bool,
    value: impl FnOnce() -> String,
) {
    if include {
        attributes.insert(key.to_string(), value().into());
    } else {
        attributes.remove(key);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Absolute path with symlinks resolved. Falls back to the unresolved path
/// when resolution fails.
fn resolve_path(path: &Path) -> PathBuf {
    // Canonical paths on windows carry a verbatim prefix, only make it absolute
    #[cfg(not(windows))]
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|e| {
        error!(path = %path.display(), error = %e, "Failed to resolve symlinks");
        path.to_path_buf()
    });
    #[cfg(windows)]
    let resolved = path.to_path_buf();

    std::path::absolute(&resolved).unwrap_or_else(|e| {
        error!(path = %resolved.display(), error = %e, "Failed to resolve absolute path");
        resolved
    })
}
