// SPDX-License-Identifier: Apache-2.0

//! File tailing engine.
//!
//! Discovers log files with glob patterns, follows them across rename and
//! copy-truncate rotation by fingerprinting their leading bytes, splits the
//! content into records and hands the records to a [`Consumer`]. Reader
//! offsets are checkpointed so a restart resumes where it left off.

pub mod bounded_channel;
pub mod config;
pub mod consumer;
pub mod encoding;
pub mod entry;
pub mod error;
pub mod header;
pub mod input;
pub mod manager;
pub mod parser;
pub mod persistence;
pub mod split;

pub use config::{FileConsumerConfig, StartAt};
pub use consumer::{ChannelConsumer, Consumer};
pub use entry::{Attributes, Entry};
pub use error::{Error, Result};
pub use manager::FileConsumer;
