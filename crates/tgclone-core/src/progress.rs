use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{checkpoint::write_json_atomic, ports::ProgressNotifier, utils::iso_timestamp_utc};

/// Lifecycle of a clone run.
///
/// `Idle -> Collecting -> Active -> {Completed | Paused | Error}`; a terminal
/// state may start over at `Collecting` (resume / new run).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Collecting,
    Active,
    Paused,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Paused | Self::Error)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Collecting | Self::Active)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Idle, Collecting) | (Idle, Error) => true,
            (Collecting, Active) | (Collecting, Error) => true,
            (Active, Completed) | (Active, Paused) | (Active, Error) => true,
            (from, Collecting) if from.is_terminal() => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    /// Candidates handled so far (delivered, skipped or permanently failed).
    pub processed: u64,
    pub total: u64,
    pub current_item: String,
    pub timestamp: String,
    #[serde(default)]
    pub delivered: u64,
    #[serde(default)]
    pub failed: u64,
    /// Enumeration stopped early; `total` covers only what was collected.
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            processed: 0,
            total: 0,
            current_item: String::new(),
            timestamp: iso_timestamp_utc(),
            delivered: 0,
            failed: 0,
            partial: false,
            detail: None,
        }
    }
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64) * 100.0
    }
}

/// Shared, always-current snapshot. Read by `QueryProgress`, written by the run.
#[derive(Clone, Debug, Default)]
pub struct ProgressBoard {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ProgressSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        match self.inner.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Start a fresh run: counters reset, status `Collecting`.
    pub fn begin(&self) -> ProgressSnapshot {
        self.update(|s| {
            if !s.status.can_transition_to(RunStatus::Collecting) {
                tracing::warn!(from = s.status.as_str(), "restarting board from non-terminal state");
            }
            *s = ProgressSnapshot {
                status: RunStatus::Collecting,
                current_item: "collecting messages".to_string(),
                ..ProgressSnapshot::default()
            };
        })
    }

    /// Move to `next` if the state machine allows it; otherwise leave status alone.
    pub fn transition(&self, next: RunStatus) -> ProgressSnapshot {
        self.update(|s| {
            if s.status.can_transition_to(next) {
                s.status = next;
            } else {
                tracing::warn!(
                    from = s.status.as_str(),
                    to = next.as_str(),
                    "ignoring invalid status transition"
                );
            }
        })
    }

    pub fn set_total(&self, total: u64, partial: bool) -> ProgressSnapshot {
        self.update(|s| {
            s.total = total;
            s.partial = partial;
            s.processed = s.processed.min(total);
        })
    }

    pub fn set_current(&self, item: impl Into<String>) -> ProgressSnapshot {
        let item = item.into();
        self.update(|s| s.current_item = item)
    }

    pub fn set_detail(&self, detail: impl Into<String>) -> ProgressSnapshot {
        let detail = detail.into();
        self.update(|s| s.detail = Some(detail))
    }

    /// Count one handled candidate. `processed` never exceeds `total`.
    pub fn advance(&self, delivered: bool, failed: bool) -> ProgressSnapshot {
        self.update(|s| {
            s.processed = (s.processed + 1).min(s.total);
            if delivered {
                s.delivered += 1;
            }
            if failed {
                s.failed += 1;
            }
        })
    }

    fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) -> ProgressSnapshot {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
        guard.timestamp = iso_timestamp_utc();
        guard.clone()
    }
}

/// When to emit intermediate reports while `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportPolicy {
    pub every_messages: usize,
    pub every_interval: Duration,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            every_messages: 10,
            every_interval: Duration::from_secs(30),
        }
    }
}

/// Best-effort delivery of snapshots to the notifier (and the progress file).
pub struct ProgressReporter {
    notifier: Arc<dyn ProgressNotifier>,
    policy: ReportPolicy,
    progress_file: Option<PathBuf>,
    last_at: Instant,
    last_processed: u64,
    sent: u64,
}

impl ProgressReporter {
    pub fn new(
        notifier: Arc<dyn ProgressNotifier>,
        policy: ReportPolicy,
        progress_file: Option<PathBuf>,
    ) -> Self {
        Self {
            notifier,
            policy,
            progress_file,
            last_at: Instant::now(),
            last_processed: 0,
            sent: 0,
        }
    }

    /// Report unconditionally. Failures are logged, never returned.
    pub async fn report(&mut self, snapshot: &ProgressSnapshot) {
        if let Some(path) = &self.progress_file {
            if let Err(e) = write_json_atomic(path, snapshot) {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist progress");
            }
        }
        if let Err(e) = self.notifier.notify(snapshot).await {
            tracing::warn!(status = snapshot.status.as_str(), error = %e, "progress report not delivered");
        }
        self.sent += 1;
        self.last_at = Instant::now();
        self.last_processed = snapshot.processed;
    }

    /// Report if `every_messages` were processed or `every_interval` elapsed.
    pub async fn maybe_report(&mut self, snapshot: &ProgressSnapshot) -> bool {
        let by_count = snapshot.processed.saturating_sub(self.last_processed)
            >= self.policy.every_messages as u64;
        let by_time = self.last_at.elapsed() >= self.policy.every_interval;
        if !(by_count || by_time) {
            return false;
        }
        self.report(snapshot).await;
        true
    }

    pub fn reports_sent(&self) -> u64 {
        self.sent
    }
}

/// Load the last persisted snapshot (e.g. after a restart). Missing or
/// unreadable files yield `None`.
pub fn load_persisted(path: &std::path::Path) -> Option<ProgressSnapshot> {
    let txt = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&txt).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: std::sync::Mutex<Vec<ProgressSnapshot>>,
        fail: bool,
    }

    #[async_trait]
    impl ProgressNotifier for RecordingNotifier {
        async fn notify(&self, snapshot: &ProgressSnapshot) -> Result<()> {
            self.seen.lock().unwrap().push(snapshot.clone());
            if self.fail {
                return Err(crate::Error::External("observer offline".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn state_machine_allows_only_documented_edges() {
        use RunStatus::*;
        assert!(Idle.can_transition_to(Collecting));
        assert!(Collecting.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Collecting));
        assert!(Completed.can_transition_to(Collecting));
        assert!(!Idle.can_transition_to(Active));
        assert!(!Collecting.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Paused));
    }

    #[test]
    fn board_clamps_processed_to_total() {
        let board = ProgressBoard::new();
        board.begin();
        board.transition(RunStatus::Active);
        board.set_total(2, false);
        board.advance(true, false);
        board.advance(false, true);
        let s = board.advance(true, false);
        assert_eq!(s.processed, 2);
        assert_eq!(s.delivered, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.percent(), 100.0);
    }

    #[test]
    fn board_ignores_invalid_transition() {
        let board = ProgressBoard::new();
        let s = board.transition(RunStatus::Completed);
        assert_eq!(s.status, RunStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_fires_by_count_and_by_time() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut rep = ProgressReporter::new(
            notifier.clone(),
            ReportPolicy {
                every_messages: 3,
                every_interval: Duration::from_secs(30),
            },
            None,
        );
        let mut snap = ProgressSnapshot {
            status: RunStatus::Active,
            total: 10,
            ..ProgressSnapshot::default()
        };

        snap.processed = 2;
        assert!(!rep.maybe_report(&snap).await);
        snap.processed = 3;
        assert!(rep.maybe_report(&snap).await);

        snap.processed = 4;
        assert!(!rep.maybe_report(&snap).await);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(rep.maybe_report(&snap).await);

        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed_and_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });
        let mut rep = ProgressReporter::new(notifier, ReportPolicy::default(), Some(path.clone()));
        let snap = ProgressSnapshot {
            status: RunStatus::Completed,
            processed: 5,
            total: 5,
            ..ProgressSnapshot::default()
        };
        rep.report(&snap).await;
        assert_eq!(rep.reports_sent(), 1);
        let loaded = load_persisted(&path).unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.processed, 5);
    }
}
