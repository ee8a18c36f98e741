// SPDX-License-Identifier: Apache-2.0

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io;

/// Number of leading bytes rendered when a fingerprint is logged.
const DISPLAY_PREFIX_LEN: usize = 16;

/// A fingerprint identifies a file by the first N bytes of its content.
/// This allows tracking files even if they are renamed or moved.
///
/// Clones are deep copies; a reader and a matching probe never share storage.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint {
    /// The first N bytes of the file
    first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Capture a fingerprint from the start of a file.
    ///
    /// Uses positioned reads, so the handle's cursor is left untouched on unix.
    /// A file shorter than `size` yields a shorter fingerprint.
    pub fn new(file: &File, size: usize) -> io::Result<Self> {
        let mut buf = vec![0u8; size];
        let mut filled = 0;

        while filled < size {
            match read_at(file, &mut buf[filled..], filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        buf.truncate(filled);
        Ok(Self { first_bytes: buf })
    }

    /// Create a fingerprint from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { first_bytes: bytes }
    }

    /// Get the fingerprint bytes
    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    /// Get the length of the fingerprint
    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    /// Check if the fingerprint is empty
    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// Check if this fingerprint starts with another fingerprint.
    ///
    /// A file that grew still starts with its old fingerprint; a file whose
    /// leading bytes changed does not. An empty fingerprint is a prefix of
    /// every fingerprint.
    pub fn starts_with(&self, other: &Fingerprint) -> bool {
        self.first_bytes.starts_with(&other.first_bytes)
    }

    /// Hex rendering of the leading bytes, used in diagnostics.
    pub fn short_hex(&self) -> String {
        self.first_bytes
            .iter()
            .take(DISPLAY_PREFIX_LEN)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}, len={})", self.short_hex(), self.len())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_hex())
    }
}

// Persisted as base64 so checkpoints stay readable JSON.
impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.first_bytes))
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Self::from_bytes)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
