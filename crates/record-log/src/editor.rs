//! Single-record edit sessions and the JSON validation they rely on.

use serde_json::Value;

use crate::error::ViewerError;
use crate::{LogIdentity, Record, RecordIndex};

/// Parses `text` as one JSON value.
pub fn validate(text: &str) -> Result<Value, ViewerError> {
    serde_json::from_str(text.trim()).map_err(|err| ViewerError::MalformedContent(err.to_string()))
}

/// Validates and re-indents.
pub fn format(text: &str) -> Result<String, ViewerError> {
    let value = validate(text)?;
    serde_json::to_string_pretty(&value)
        .map_err(|err| ViewerError::MalformedContent(err.to_string()))
}

/// Validates and collapses to the compact single-line form written to the store.
pub fn canonicalize(text: &str) -> Result<String, ViewerError> {
    let value = validate(text)?;
    serde_json::to_string(&value).map_err(|err| ViewerError::MalformedContent(err.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    pub path: LogIdentity,
    pub index: RecordIndex,
    /// Record as it was when the session began; used for the conflict check on save.
    pub original: Record,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    pub index: RecordIndex,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct Editor {
    session: Option<EditSession>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session on `record`, dropping any previous one unsaved.
    pub fn begin(&mut self, path: LogIdentity, record: &Record) -> EditDraft {
        let draft = EditDraft {
            index: record.index,
            text: record.pretty(),
        };
        self.session = Some(EditSession {
            path,
            index: record.index,
            original: record.clone(),
        });
        draft
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn editing(&self) -> Option<RecordIndex> {
        self.session.as_ref().map(|session| session.index)
    }

    pub fn cancel(&mut self) -> Option<EditSession> {
        self.session.take()
    }

    /// Ends the session only if it is still the one identified by `index` on `path`.
    pub fn finish(&mut self, path: &LogIdentity, index: RecordIndex) -> bool {
        let matches = self
            .session
            .as_ref()
            .map(|session| &session.path == path && session.index == index)
            .unwrap_or(false);
        if matches {
            self.session = None;
        }
        matches
    }
}
