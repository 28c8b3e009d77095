use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{domain::MessageId, utils::iso_timestamp_utc, Result};

/// Durable resumption marker for one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest id whose send was confirmed. `0` before the first confirmation.
    pub last_confirmed_id: i32,
    pub timestamp: String,
    /// Range the run was started with; `resume` reuses it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<i32>,
}

impl Checkpoint {
    pub fn new(range_start: Option<i32>, range_end: Option<i32>) -> Self {
        Self {
            last_confirmed_id: 0,
            timestamp: iso_timestamp_utc(),
            range_start,
            range_end,
        }
    }

    pub fn same_range(&self, range_start: Option<i32>, range_end: Option<i32>) -> bool {
        self.range_start == range_start && self.range_end == range_end
    }

    /// Move forward to `id` if it is newer. Never moves backward.
    pub fn confirm(&mut self, id: MessageId) {
        if id.0 > self.last_confirmed_id {
            self.last_confirmed_id = id.0;
        }
        self.timestamp = iso_timestamp_utc();
    }
}

/// JSON file store for the checkpoint, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let txt = fs::read_to_string(&self.path)?;
        if txt.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&txt)?))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        write_json_atomic(&self.path, checkpoint)
    }
}

/// Write `value` as pretty JSON via a sibling temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let txt = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, txt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_is_monotonic() {
        let mut cp = Checkpoint::new(None, None);
        cp.confirm(MessageId(5));
        cp.confirm(MessageId(3));
        assert_eq!(cp.last_confirmed_id, 5);
        cp.confirm(MessageId(9));
        assert_eq!(cp.last_confirmed_id, 9);
    }

    #[test]
    fn save_and_load_roundtrip_keeps_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert!(store.load().unwrap().is_none());

        let mut cp = Checkpoint::new(Some(100), Some(105));
        cp.confirm(MessageId(102));
        store.save(&cp).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.last_confirmed_id, 102);
        assert!(loaded.same_range(Some(100), Some(105)));
        assert!(!dir.path().join("checkpoint.json.tmp").exists());
    }
}
