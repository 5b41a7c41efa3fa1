//! Record Log: windowed, tail-following viewer core for append-only JSONL record logs.
//!
//! Responsibilities:
//! - reaching a record store through the [`RecordStore`] seam (local files, HTTP, memory)
//! - keeping one authoritative view per viewer and reconciling out-of-order store
//!   responses with generation-tagged requests
//! - tailing the open window in the background while the viewer is visible
//! - projecting the materialized window through role and text filters
//! - validating and persisting single-record edits addressed by index

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod client;
pub mod editor;
pub mod error;
pub mod jsonl_store;
pub mod log_throttle;
pub mod metrics;
pub mod poller;
pub mod projection;
pub mod store;
pub mod view;
pub mod viewer;

pub use client::HttpRecordStore;
pub use error::{ErrorKind, ViewerError};
pub use jsonl_store::JsonlFileStore;
pub use projection::{Filter, Role, VisibleRecord};
pub use store::{InMemoryRecordStore, RecordStore, StoreError};
pub use viewer::{Notice, NoticeLevel, RenderSink, Snapshot, Viewer, ViewerConfig};

/// Position of a record inside its log. Assigned by the store at append time and never reused.
pub type RecordIndex = u64;

/// Opaque name of one append-only record log, usually a path relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogIdentity(String);

impl LogIdentity {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used as the display title.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for LogIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LogIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub index: RecordIndex,
    pub raw: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Record {
    /// Decodes `raw`; malformed lines keep their index and raw text with `data` left empty.
    pub fn parse(index: RecordIndex, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let data = serde_json::from_str(raw.trim()).ok();
        Self { index, raw, data }
    }

    pub fn is_structured(&self) -> bool {
        self.data.is_some()
    }

    /// Pretty-printed structured form, or the raw text when the line did not parse.
    pub fn pretty(&self) -> String {
        match &self.data {
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| self.raw.clone()),
            None => self.raw.clone(),
        }
    }
}

/// One store response: up to `limit` records starting at the requested offset, plus the
/// log size as of the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowPage {
    pub lines: Vec<Record>,
    pub total: u64,
}

impl WindowPage {
    /// Indices must be contiguous and strictly increasing.
    pub fn is_contiguous(&self) -> bool {
        self.lines
            .windows(2)
            .all(|pair| pair[1].index == pair[0].index + 1)
    }
}
