use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{domain::ChatId, errors::Error, utils::iso_timestamp_utc, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LockData {
    pid: u32,
    started_at: String,
    /// Kernel start time of `pid`, to tell a reused pid from the holder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proc_start: Option<u64>,
}

/// Durable "one active run per target" lock.
///
/// Held for as long as the guard lives; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>, target: ChatId) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let pid = std::process::id();
                    let data = LockData {
                        pid,
                        started_at: iso_timestamp_utc(),
                        proc_start: process_start_ticks(pid),
                    };
                    file.write_all(serde_json::to_string(&data)?.as_bytes())?;
                    file.sync_all()?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !is_stale(&path) {
                        return Err(Error::AlreadyRunning {
                            target: target.0,
                            lock_path: path,
                        });
                    }
                    tracing::warn!(path = %path.display(), "reclaiming stale run lock");
                    fs::remove_file(&path)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::AlreadyRunning {
            target: target.0,
            lock_path: path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some live process currently holds the lock at `path`.
    pub fn is_held(path: &Path) -> bool {
        path.exists() && !is_stale(path)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    let Ok(txt) = fs::read_to_string(path) else {
        return false;
    };
    let Ok(data) = serde_json::from_str::<LockData>(&txt) else {
        // Half-written by a process that died between create and write.
        return true;
    };
    if !process_alive(data.pid) {
        return true;
    }
    // Same pid, different process: the holder died and the pid was reused.
    match (data.proc_start, process_start_ticks(data.pid)) {
        (Some(recorded), Some(current)) => recorded != current,
        _ => false,
    }
}

/// Start time of `pid` in clock ticks since boot (field 22 of `/proc/<pid>/stat`).
#[cfg(target_os = "linux")]
fn process_start_ticks(pid: u32) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // `comm` may contain spaces; fields after it start at `state` (field 3).
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn process_start_ticks(_pid: u32) -> Option<u64> {
    None
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new("/proc").join(pid.to_string()).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        // No cheap liveness check; assume the holder is alive.
        true
    }
}
