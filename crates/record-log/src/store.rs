use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{LogIdentity, Record, RecordIndex, WindowPage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid content: {0}")]
    InvalidContent(String),
    #[error("log not found: {0}")]
    LogNotFound(String),
    #[error("index {index} out of range (total {total})")]
    IndexOutOfRange { index: RecordIndex, total: u64 },
    #[error("record {index} changed since it was opened for editing")]
    Conflict { index: RecordIndex },
    #[error("malformed window: {0}")]
    MalformedWindow(String),
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::LogNotFound(_))
    }
}

/// Index-addressed access to append-only record logs.
///
/// Every call is self-contained (path plus window or index), so one store can be shared
/// by any number of viewers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn count(&self, path: &LogIdentity) -> Result<u64, StoreError>;

    async fn fetch_window(
        &self,
        path: &LogIdentity,
        offset: u64,
        limit: u64,
    ) -> Result<WindowPage, StoreError>;

    /// Replaces the record at `index`. `content` must already be validated, compact JSON.
    async fn write_line(
        &self,
        path: &LogIdentity,
        index: RecordIndex,
        content: &str,
    ) -> Result<(), StoreError>;
}

/// Rejects traversal and absolute paths before they reach any backend.
pub fn validate_log_path(path: &LogIdentity) -> Result<(), StoreError> {
    let raw = path.as_str();
    if raw.trim().is_empty() || raw.contains("..") || raw.starts_with('/') || raw.contains('\\')
    {
        return Err(StoreError::InvalidPath(raw.to_string()));
    }
    Ok(())
}

/// Records must stay on one physical line.
pub fn validate_line_content(content: &str) -> Result<(), StoreError> {
    if content.trim().is_empty() {
        return Err(StoreError::InvalidContent("empty record".into()));
    }
    if content.contains('\n') || content.contains('\r') {
        return Err(StoreError::InvalidContent(
            "record content must fit on a single line".into(),
        ));
    }
    Ok(())
}

/// Slices `lines` into a window starting at `offset`.
pub(crate) fn window_of(lines: &[String], offset: u64, limit: u64) -> WindowPage {
    let total = lines.len() as u64;
    let start = offset.min(total) as usize;
    let end = offset.saturating_add(limit).min(total) as usize;
    WindowPage {
        lines: lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, raw)| Record::parse((start + i) as RecordIndex, raw.clone()))
            .collect(),
        total,
    }
}

/// In-memory adapter for tests and demos.
#[derive(Default)]
pub struct InMemoryRecordStore {
    logs: Mutex<HashMap<LogIdentity, Vec<String>>>,
    writes: Mutex<Vec<(LogIdentity, RecordIndex, String)>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn create(&self, path: impl Into<LogIdentity>) {
        self.logs.lock().await.entry(path.into()).or_default();
    }

    pub async fn append(&self, path: impl Into<LogIdentity>, line: impl Into<String>) {
        self.logs
            .lock()
            .await
            .entry(path.into())
            .or_default()
            .push(line.into());
    }

    /// Drops every record from `len` onwards, standing in for external rotation.
    pub async fn truncate(&self, path: &LogIdentity, len: usize) {
        if let Some(lines) = self.logs.lock().await.get_mut(path) {
            lines.truncate(len);
        }
    }

    pub async fn lines(&self, path: &LogIdentity) -> Vec<String> {
        self.logs
            .lock()
            .await
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Every successful `write_line`, in order.
    pub async fn writes(&self) -> Vec<(LogIdentity, RecordIndex, String)> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn count(&self, path: &LogIdentity) -> Result<u64, StoreError> {
        validate_log_path(path)?;
        let guard = self.logs.lock().await;
        guard
            .get(path)
            .map(|lines| lines.len() as u64)
            .ok_or_else(|| StoreError::LogNotFound(path.to_string()))
    }

    async fn fetch_window(
        &self,
        path: &LogIdentity,
        offset: u64,
        limit: u64,
    ) -> Result<WindowPage, StoreError> {
        validate_log_path(path)?;
        let guard = self.logs.lock().await;
        let lines = guard
            .get(path)
            .ok_or_else(|| StoreError::LogNotFound(path.to_string()))?;
        Ok(window_of(lines, offset, limit))
    }

    async fn write_line(
        &self,
        path: &LogIdentity,
        index: RecordIndex,
        content: &str,
    ) -> Result<(), StoreError> {
        validate_log_path(path)?;
        validate_line_content(content)?;
        let mut guard = self.logs.lock().await;
        let lines = guard
            .get_mut(path)
            .ok_or_else(|| StoreError::LogNotFound(path.to_string()))?;
        let total = lines.len() as u64;
        let slot = lines
            .get_mut(index as usize)
            .ok_or(StoreError::IndexOutOfRange { index, total })?;
        *slot = content.to_string();
        drop(guard);
        self.writes
            .lock()
            .await
            .push((path.clone(), index, content.to_string()));
        Ok(())
    }
}
