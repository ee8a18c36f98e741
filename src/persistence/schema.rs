// SPDX-License-Identifier: Apache-2.0

//! Persistence schema for reader checkpoints.
//!
//! Readers are stored as a list rather than a map: identity is the
//! fingerprint, which is matched by prefix and so cannot serve as a key.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::input::ReaderState;

/// Scope the file consumer writes under in a shared database
pub const CHECKPOINT_SCOPE: &str = "fileconsumer";

/// Key used to store known readers in the persister
pub const KNOWN_FILES_KEY: &str = "knownFiles";

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Persisted state for all known readers (v1)
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    /// One entry per reader, open or closed
    pub readers: Vec<ReaderState>,
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            readers: Vec::new(),
        }
    }
}

impl PersistedStateV1 {
    pub fn new(readers: Vec<ReaderState>) -> Self {
        Self {
            readers,
            ..Default::default()
        }
    }

    /// Reject state written by an unknown schema version.
    pub fn check_version(self) -> Result<Self> {
        if self.version != PERSISTED_STATE_VERSION {
            return Err(Error::Persistence(format!(
                "unsupported checkpoint version {}, expected {}",
                self.version, PERSISTED_STATE_VERSION
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{FileId, Fingerprint};
    use std::path::PathBuf;

    #[test]
    fn test_persisted_state_v1_default() {
        let state = PersistedStateV1::default();
        assert_eq!(state.version, PERSISTED_STATE_VERSION);
        assert!(state.readers.is_empty());
    }

    #[test]
    fn test_v1_document_layout() {
        let state = PersistedStateV1::new(vec![ReaderState {
            fingerprint: Fingerprint::from_bytes(b"hello".to_vec()),
            offset: 500,
            file_id: Some(FileId::new(1, 100)),
            path: PathBuf::from("/var/log/test.log"),
            attributes: Default::default(),
            header_finalized: false,
            header_output: Default::default(),
        }]);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["readers"][0]["fingerprint"], "aGVsbG8=");
        assert_eq!(json["readers"][0]["offset"], 500);
        assert_eq!(json["readers"][0]["path"], "/var/log/test.log");

        let restored: PersistedStateV1 = serde_json::from_value(json).unwrap();
        assert_eq!(restored.readers, state.readers);
    }

    #[test]
    fn test_check_version() {
        assert!(PersistedStateV1::default().check_version().is_ok());

        let future = PersistedStateV1 {
            version: 2,
            readers: vec![],
        };
        assert!(matches!(future.check_version(), Err(Error::Persistence(_))));
    }
}
