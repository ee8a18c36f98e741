// SPDX-License-Identifier: Apache-2.0

use crate::entry::Entry;
use crate::error::Result;

/// Parser transforms an Entry's body (typically a raw log line) by extracting
/// structured fields into the entry's attributes.
///
/// The body is left untouched; parsed fields are added to attributes.
pub trait Parser: Send + Sync {
    /// Parse the entry's body and add extracted fields to attributes.
    fn parse(&self, entry: Entry) -> Result<Entry>;

    /// Operator type name used in logs.
    fn name(&self) -> &'static str;
}
