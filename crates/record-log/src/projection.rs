//! Role/text projection of the materialized window. Pure functions only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Record, RecordIndex};

pub const PREVIEW_LEN: usize = 150;
const FIELD_PREVIEW_LEN: usize = 40;
const PREVIEW_FIELDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Unknown,
}

impl Role {
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" | "session" => Role::System,
            "tool" | "tool_result" | "tool_use" => Role::Tool,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role filter: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Role::from_label(s.trim()) {
            Role::Unknown if !s.trim().eq_ignore_ascii_case("unknown") => {
                Err(UnknownRole(s.to_string()))
            }
            role => Ok(role),
        }
    }
}

/// Label a record carries: its `role` field, else its `type` field, else `unknown`.
pub fn role_label(data: Option<&Value>) -> String {
    data.and_then(|value| {
        ["role", "type"].iter().find_map(|field| {
            value
                .get(field)
                .and_then(Value::as_str)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
        })
    })
    .unwrap_or_else(|| Role::Unknown.as_str().to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub text_query: String,
    #[serde(default)]
    pub role_filter: Option<Role>,
}

impl Filter {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            text_query: query.into(),
            role_filter: None,
        }
    }

    pub fn role(role: Role) -> Self {
        Self {
            text_query: String::new(),
            role_filter: Some(role),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text_query.is_empty() && self.role_filter.is_none()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(role) = self.role_filter {
            if Role::from_label(&role_label(record.data.as_ref())) != role {
                return false;
            }
        }
        if self.text_query.is_empty() {
            return true;
        }
        let haystack = match &record.data {
            Some(value) => serde_json::to_string(value).unwrap_or_default(),
            None => record.raw.clone(),
        };
        haystack
            .to_lowercase()
            .contains(&self.text_query.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleRecord {
    pub index: RecordIndex,
    pub role: Role,
    pub role_label: String,
    pub preview: String,
    pub record: Record,
}

impl VisibleRecord {
    /// Full content shown when the row is expanded.
    pub fn body(&self) -> String {
        self.record.pretty()
    }
}

pub fn project(records: &[Record], filter: &Filter) -> Vec<VisibleRecord> {
    records
        .iter()
        .filter(|record| filter.matches(record))
        .map(|record| {
            let role_label = role_label(record.data.as_ref());
            VisibleRecord {
                index: record.index,
                role: Role::from_label(&role_label),
                role_label,
                preview: preview(record),
                record: record.clone(),
            }
        })
        .collect()
}

pub fn preview(record: &Record) -> String {
    match &record.data {
        Some(value) => preview_value(value),
        None if record.raw.is_empty() => "(empty)".to_string(),
        None => truncate(&record.raw, PREVIEW_LEN),
    }
}

fn preview_value(data: &Value) -> String {
    let Some(fields) = data.as_object() else {
        return match data {
            Value::String(text) if !text.is_empty() => truncate(text, PREVIEW_LEN),
            Value::Null => "(empty)".to_string(),
            other => truncate(&other.to_string(), PREVIEW_LEN),
        };
    };

    if let Some(content) = fields.get("content").filter(|v| truthy(v)) {
        return match content {
            Value::String(text) => truncate(text, PREVIEW_LEN),
            Value::Array(parts) => parts
                .iter()
                .find_map(|part| part.get("text").filter(|v| truthy(v)))
                .map(|text| truncate(&display(text), PREVIEW_LEN))
                .unwrap_or_else(|| truncate(&content.to_string(), PREVIEW_LEN)),
            other => truncate(&other.to_string(), PREVIEW_LEN),
        };
    }
    for field in ["text", "message"] {
        if let Some(value) = fields.get(field).filter(|v| truthy(v)) {
            return truncate(&display(value), PREVIEW_LEN);
        }
    }
    if let Some(kind) = fields.get("type").filter(|v| truthy(v)) {
        let mut parts = vec![display(kind)];
        for extra in ["provider", "modelId"] {
            if let Some(value) = fields.get(extra).filter(|v| truthy(v)) {
                parts.push(display(value));
            }
        }
        return parts.join(" · ");
    }

    let summary = fields
        .iter()
        .take(PREVIEW_FIELDS)
        .map(|(key, value)| {
            let shown = match value {
                Value::String(text) => truncate(text, FIELD_PREVIEW_LEN),
                other => {
                    let encoded = other.to_string();
                    if encoded.chars().count() > FIELD_PREVIEW_LEN {
                        format!("{}…", truncate(&encoded, FIELD_PREVIEW_LEN))
                    } else {
                        encoded
                    }
                }
            };
            format!("{key}: {shown}")
        })
        .collect::<Vec<_>>()
        .join(" · ");
    if summary.is_empty() {
        "(empty)".to_string()
    } else {
        summary
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
