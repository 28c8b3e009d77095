//! Durable append-only record of message ids confirmed delivered to the target.
//!
//! On-disk format is one decimal id per line. Every record is a single
//! `write` of `"<id>\n"` to an append-mode file followed by `sync_data`, so a
//! crash leaves at most one torn trailing line, which `open` discards.

use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{domain::MessageId, Result};

#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    file: File,
    ids: BTreeSet<MessageId>,
}

impl DedupLedger {
    /// Open (or create) the ledger and load its full membership into memory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let raw = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        // Only newline-terminated lines were confirmed.
        let complete_len = raw
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        if complete_len < raw.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = raw.len() - complete_len,
                "discarding torn trailing ledger line"
            );
            file.set_len(complete_len as u64)?;
            file.sync_data()?;
        }

        let ids = parse_ids(&path, &raw[..complete_len]);

        Ok(Self { path, file, ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    /// Append `id`. Must only be called after the target confirmed the send.
    ///
    /// Returns `false` when the id was already present (nothing written).
    pub fn record(&mut self, id: MessageId) -> Result<bool> {
        if self.ids.contains(&id) {
            return Ok(false);
        }
        let line = format!("{}\n", id.0);
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.ids.insert(id);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.ids.iter().copied()
    }
}

fn parse_ids(path: &Path, bytes: &[u8]) -> BTreeSet<MessageId> {
    let text = String::from_utf8_lossy(bytes);
    let mut ids = BTreeSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<i32>() {
            Ok(v) => {
                ids.insert(MessageId(v));
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), line, "ignoring malformed ledger line");
            }
        }
    }
    ids
}
