// SPDX-License-Identifier: Apache-2.0

//! Record decoding.

use serde::Deserialize;

use crate::error::{Error, Result};

/// How raw record bytes are turned into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Encoding {
    /// Strict UTF-8; invalid records are reported and skipped
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// UTF-8 with invalid sequences replaced by U+FFFD
    #[serde(rename = "utf-8-lossy", alias = "utf8-lossy")]
    Utf8Lossy,
}

impl Encoding {
    pub fn decode(&self, raw: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(raw)
                .map(str::to_owned)
                .map_err(|e| Error::Encoding(e.to_string())),
            Encoding::Utf8Lossy => Ok(String::from_utf8_lossy(raw).into_owned()),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "utf-8-lossy" | "utf8-lossy" => Ok(Encoding::Utf8Lossy),
            _ => Err(format!(
                "Invalid encoding '{}'. Valid options: utf-8, utf-8-lossy",
                s
            )),
        }
    }
}
