use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{domain::MessageId, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/state files).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

// ============== Failure Log ==============

const FAILURE_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct FailureEvent {
    pub timestamp: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i32>,
    pub detail: String,
}

impl FailureEvent {
    pub fn transfer(id: MessageId, detail: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: "transfer_failed".to_string(),
            message_id: Some(id.0),
            detail: detail.to_string(),
        }
    }

    pub fn enumeration(detail: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: "enumeration_failed".to_string(),
            message_id: None,
            detail: detail.to_string(),
        }
    }
}

/// Append-only JSONL log of per-message failures for one target.
#[derive(Clone, Debug)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: FailureEvent) -> Result<()> {
        event.detail = truncate_text(&event.detail, FAILURE_MAX_TEXT);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(&event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
