// SPDX-License-Identifier: Apache-2.0

//! File input: identity, discovery and per-file reading.

mod factory;
mod file_id;
mod finder;
mod fingerprint;
mod reader;

pub use factory::{
    LOG_FILE_NAME, LOG_FILE_NAME_RESOLVED, LOG_FILE_PATH, LOG_FILE_PATH_RESOLVED, ReaderFactory,
};
pub use file_id::FileId;
pub use finder::{FileFinder, GlobFileFinder};
pub use fingerprint::Fingerprint;
pub use reader::{ReadSummary, Reader, ReaderState};

#[cfg(test)]
pub(crate) use reader::tests::TestConsumer;
