// SPDX-License-Identifier: Apache-2.0

//! Checkpoint persistence for reader state.
//!
//! Uses JSON file storage with atomic writes so offsets survive restarts.

mod json_file;
mod schema;
mod store;

pub use json_file::{JsonFileDatabase, JsonFilePersister};
pub use schema::{CHECKPOINT_SCOPE, KNOWN_FILES_KEY, PERSISTED_STATE_VERSION, PersistedStateV1};
pub use store::{MemoryPersister, Persister, PersisterExt};
