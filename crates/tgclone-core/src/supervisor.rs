//! Control surface for clone runs: start, stop, resume, query.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    cancel::StopSignal,
    checkpoint::CheckpointStore,
    config::{Config, RunConfig},
    errors::Error,
    lock::RunLock,
    orchestrator::{Orchestrator, RunContext, RunPaths},
    ports::{ChannelProvider, ProgressNotifier},
    progress::{load_persisted, ProgressBoard, ProgressSnapshot, RunStatus},
    source::IdRange,
    Result,
};

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    cfg: Arc<Config>,
    provider: Arc<dyn ChannelProvider>,
    stop: StopSignal,
    board: ProgressBoard,
    state: tokio::sync::Mutex<SupervisorState>,
}

#[derive(Default)]
struct SupervisorState {
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(cfg: Arc<Config>, provider: Arc<dyn ChannelProvider>) -> Self {
        let board = restore_board(&cfg);
        Self {
            inner: Arc::new(SupervisorInner {
                cfg,
                provider,
                stop: StopSignal::new(),
                board,
                state: tokio::sync::Mutex::new(SupervisorState::default()),
            }),
        }
    }

    /// Validate, take the target lock and spawn the run. Returns once the run
    /// task is started; progress is observed through `query_progress`.
    pub async fn start_run(
        &self,
        range: IdRange,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Result<()> {
        let run_cfg = match RunConfig::resolve(&self.inner.cfg) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "clone run rejected");
                self.inner.board.set_detail(e.to_string());
                self.inner.board.transition(RunStatus::Error);
                return Err(e);
            }
        };

        let paths = RunPaths::new(&run_cfg.state_dir);
        let lock = RunLock::acquire(&paths.lock, run_cfg.target)?;
        self.inner.stop.clear();

        let orch = Orchestrator::new(RunContext {
            config: run_cfg,
            provider: self.inner.provider.clone(),
            notifier,
            stop: self.inner.stop.clone(),
            board: self.inner.board.clone(),
        });
        let stop = self.inner.stop.clone();
        let handle = tokio::spawn(async move {
            let _lock = lock;
            match orch.run(range).await {
                Ok(out) => tracing::info!(
                    status = out.status.as_str(),
                    last_confirmed = out.checkpoint.last_confirmed_id,
                    rate_limit_waits = out.rate_limit_waits,
                    "clone run finished"
                ),
                Err(e) => tracing::error!(error = %e, "clone run ended with error"),
            }
            stop.clear();
        });

        let mut st = self.inner.state.lock().await;
        st.handle = Some(handle);
        Ok(())
    }

    /// Restart from the stored checkpoint with the range it was created for.
    pub async fn resume(&self, notifier: Arc<dyn ProgressNotifier>) -> Result<IdRange> {
        let run_cfg = RunConfig::resolve(&self.inner.cfg)?;
        let paths = RunPaths::new(&run_cfg.state_dir);
        let checkpoint = CheckpointStore::new(&paths.checkpoint)
            .load()?
            .ok_or(Error::NothingToResume(run_cfg.target.0))?;
        let range = IdRange {
            start: checkpoint.range_start,
            end: checkpoint.range_end,
        };
        self.start_run(range, notifier).await?;
        Ok(range)
    }

    /// Ask the active run to pause at the next message boundary.
    /// Returns `false` when no run is active.
    pub async fn request_stop(&self) -> bool {
        if !self.is_running().await {
            return false;
        }
        self.inner.stop.request();
        tracing::info!("stop requested");
        true
    }

    pub fn query_progress(&self) -> ProgressSnapshot {
        self.inner.board.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the current run task, if any, to finish.
    pub async fn wait(&self) {
        let handle = self.inner.state.lock().await.handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "clone run task panicked");
            }
        }
    }
}

/// Rebuild the board from the persisted snapshot. A snapshot that claims a
/// running state without a live lock belongs to a run that died mid-way.
fn restore_board(cfg: &Config) -> ProgressBoard {
    let Some(target) = cfg.target_channel_id else {
        return ProgressBoard::new();
    };
    let paths = RunPaths::new(&cfg.target_state_dir(target));
    let Some(snapshot) = load_persisted(&paths.progress) else {
        return ProgressBoard::new();
    };

    let was_running = snapshot.status.is_running();
    let board = ProgressBoard::with_snapshot(snapshot);
    if was_running && !RunLock::is_held(&paths.lock) {
        tracing::warn!(target = target.0, "previous run was interrupted");
        board.set_detail("interrupted");
        board.transition(RunStatus::Error);
    }
    board
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checkpoint::write_json_atomic, config::test_config, ports::NoopNotifier,
        source::fake::FakeProvider,
    };

    fn supervisor(cfg: Config, provider: Arc<FakeProvider>) -> Supervisor {
        Supervisor::new(Arc::new(cfg), provider)
    }

    #[tokio::test(start_paused = true)]
    async fn missing_source_is_rejected_before_any_provider_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.source_channel_id = None;
        let ledger = RunPaths::new(&cfg.target_state_dir(crate::domain::ChatId(-1002))).ledger;
        let provider = Arc::new(FakeProvider::text_channel(1..=3));
        let sup = supervisor(cfg, provider.clone());

        let err = sup
            .start_run(IdRange::full(), Arc::new(NoopNotifier))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(provider.calls().is_empty());
        assert!(!ledger.exists());
        assert!(!sup.is_running().await);
        assert_eq!(sup.query_progress().status, RunStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_for_same_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let run_cfg = RunConfig::resolve(&cfg).unwrap();
        let _held = RunLock::acquire(RunPaths::new(&run_cfg.state_dir).lock, run_cfg.target).unwrap();
        let provider = Arc::new(FakeProvider::text_channel(1..=3));
        let sup = supervisor(cfg, provider.clone());

        let err = sup
            .start_run(IdRange::full(), Arc::new(NoopNotifier))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AlreadyRunning { target: -1002, .. }));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_in_background_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let lock = RunPaths::new(&RunConfig::resolve(&cfg).unwrap().state_dir).lock;
        let provider = Arc::new(FakeProvider::text_channel(1..=3));
        let sup = supervisor(cfg, provider.clone());

        sup.start_run(IdRange::full(), Arc::new(NoopNotifier))
            .await
            .unwrap();
        assert!(lock.exists());
        sup.wait().await;

        let snap = sup.query_progress();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.processed, 3);
        assert_eq!(provider.send_attempts(), vec![1, 2, 3]);
        assert!(!lock.exists());
        assert!(!sup.request_stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_resume_uses_stored_range() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::text_channel(1..=8));
        let sup = supervisor(test_config(dir.path()), provider.clone());

        sup.start_run(IdRange::between(2, 5), Arc::new(NoopNotifier))
            .await
            .unwrap();
        // The task has not been polled yet, so it pauses before the first send.
        assert!(sup.request_stop().await);
        sup.wait().await;
        assert_eq!(sup.query_progress().status, RunStatus::Paused);
        assert!(provider.send_attempts().is_empty());

        let range = sup.resume(Arc::new(NoopNotifier)).await.unwrap();
        assert_eq!(range, IdRange::between(2, 5));
        sup.wait().await;
        assert_eq!(sup.query_progress().status, RunStatus::Completed);
        assert_eq!(provider.send_attempts(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn resume_without_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(
            test_config(dir.path()),
            Arc::new(FakeProvider::text_channel(1..=2)),
        );
        let err = sup.resume(Arc::new(NoopNotifier)).await.unwrap_err();
        assert!(matches!(err, Error::NothingToResume(-1002)));
    }

    #[test]
    fn running_snapshot_without_lock_is_marked_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let paths = RunPaths::new(&RunConfig::resolve(&cfg).unwrap().state_dir);
        let stale = ProgressSnapshot {
            status: RunStatus::Active,
            processed: 4,
            total: 9,
            ..ProgressSnapshot::default()
        };
        write_json_atomic(&paths.progress, &stale).unwrap();

        let sup = supervisor(cfg, Arc::new(FakeProvider::default()));
        let snap = sup.query_progress();
        assert_eq!(snap.status, RunStatus::Error);
        assert_eq!(snap.processed, 4);
        assert_eq!(snap.detail.as_deref(), Some("interrupted"));
    }
}
