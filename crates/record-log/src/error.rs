use crate::store::StoreError;
use crate::{LogIdentity, RecordIndex};

/// Failures surfaced by [`crate::Viewer`]. Each one ends only the operation that caused
/// it; the viewer session stays usable.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("failed to load records: {0}")]
    FetchFailure(#[source] StoreError),
    #[error("invalid JSON: {0}")]
    MalformedContent(String),
    #[error("save failed: {0}")]
    PersistFailure(#[source] StoreError),
    #[error("record #{0} is not in the current window")]
    RecordNotFound(RecordIndex),
    #[error("log not found: {0}")]
    LogNotFound(LogIdentity),
    #[error("no log is open")]
    NotOpen,
    #[error("no record is being edited")]
    NoEditSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FetchFailure,
    MalformedContent,
    PersistFailure,
    NotFound,
    Session,
}

impl ViewerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ViewerError::FetchFailure(_) => ErrorKind::FetchFailure,
            ViewerError::MalformedContent(_) => ErrorKind::MalformedContent,
            ViewerError::PersistFailure(_) => ErrorKind::PersistFailure,
            ViewerError::RecordNotFound(_) | ViewerError::LogNotFound(_) => ErrorKind::NotFound,
            ViewerError::NotOpen | ViewerError::NoEditSession => ErrorKind::Session,
        }
    }

    pub(crate) fn from_fetch(path: &LogIdentity, err: StoreError) -> Self {
        if err.is_not_found() {
            ViewerError::LogNotFound(path.clone())
        } else {
            ViewerError::FetchFailure(err)
        }
    }
}
