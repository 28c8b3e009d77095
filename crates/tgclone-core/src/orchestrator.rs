//! Drives one clone run: collect, filter, transfer one message at a time.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    backoff::BackoffController,
    cancel::StopSignal,
    checkpoint::{Checkpoint, CheckpointStore},
    config::RunConfig,
    domain::SourceMessage,
    errors::Error,
    ledger::DedupLedger,
    ports::{ChannelProvider, ProgressNotifier},
    progress::{ProgressBoard, ProgressReporter, ProgressSnapshot, RunStatus},
    source::{IdRange, MessageSource},
    transfer::{TransferError, TransferExecutor, Transferred},
    utils::{FailureEvent, FailureLog},
    Result,
};

pub const LEDGER_FILE: &str = "sent_ids.txt";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const PROGRESS_FILE: &str = "progress.json";
pub const LOCK_FILE: &str = "run.lock";
pub const FAILURE_FILE: &str = "errors.jsonl";

/// Files making up the persisted state of one target.
#[derive(Clone, Debug)]
pub struct RunPaths {
    pub ledger: PathBuf,
    pub checkpoint: PathBuf,
    pub progress: PathBuf,
    pub lock: PathBuf,
    pub failures: PathBuf,
}

impl RunPaths {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            ledger: state_dir.join(LEDGER_FILE),
            checkpoint: state_dir.join(CHECKPOINT_FILE),
            progress: state_dir.join(PROGRESS_FILE),
            lock: state_dir.join(LOCK_FILE),
            failures: state_dir.join(FAILURE_FILE),
        }
    }
}

/// Everything a run needs, created per run. No ambient globals.
#[derive(Clone)]
pub struct RunContext {
    pub config: RunConfig,
    pub provider: Arc<dyn ChannelProvider>,
    pub notifier: Arc<dyn ProgressNotifier>,
    pub stop: StopSignal,
    pub board: ProgressBoard,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub snapshot: ProgressSnapshot,
    pub checkpoint: Checkpoint,
    pub rate_limit_waits: u64,
}

pub struct Orchestrator {
    ctx: RunContext,
    paths: RunPaths,
}

impl Orchestrator {
    pub fn new(ctx: RunContext) -> Self {
        let paths = RunPaths::new(&ctx.config.state_dir);
        Self { ctx, paths }
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Run to a terminal state. The caller must hold the target's `RunLock`.
    ///
    /// Returns `Ok` for `Completed` and `Paused`; fatal failures move the board
    /// to `Error`, are reported, and are returned.
    pub async fn run(&self, range: IdRange) -> Result<RunOutcome> {
        let mut reporter = ProgressReporter::new(
            self.ctx.notifier.clone(),
            self.ctx.config.report,
            Some(self.paths.progress.clone()),
        );
        let mut backoff = BackoffController::new(self.ctx.config.backoff);

        self.ctx.board.begin();
        tracing::info!(
            source = self.ctx.config.source.0,
            target = self.ctx.config.target.0,
            range = %range,
            "clone run started"
        );

        match self.execute(range, &mut reporter, &mut backoff).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(error = %e, "clone run failed");
                self.ctx.board.set_detail(e.to_string());
                let snap = self.ctx.board.transition(RunStatus::Error);
                reporter.report(&snap).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        range: IdRange,
        reporter: &mut ProgressReporter,
        backoff: &mut BackoffController,
    ) -> Result<RunOutcome> {
        let cfg = &self.ctx.config;
        let board = &self.ctx.board;
        let failures = FailureLog::new(&self.paths.failures);

        let store = CheckpointStore::new(&self.paths.checkpoint);
        let mut checkpoint = match store.load()? {
            Some(cp) if cp.same_range(range.start, range.end) => cp,
            _ => Checkpoint::new(range.start, range.end),
        };
        let mut ledger = DedupLedger::open(&self.paths.ledger)?;

        // Collecting
        let source = MessageSource::new(self.ctx.provider.clone(), cfg.page_size);
        let fetched = source.fetch_ordered(cfg.source, range, backoff).await;
        let partial = fetched.is_partial();
        if let Some(err) = &fetched.error {
            log_failure(&failures, FailureEvent::enumeration(&err.to_string()));
            if fetched.messages.is_empty() {
                return Err(Error::Provider(err.clone()));
            }
            board.set_detail(format!("history enumeration incomplete: {err}"));
        }

        let collected = fetched.messages.len();
        let candidates: Vec<SourceMessage> = fetched
            .messages
            .into_iter()
            .filter(|m| !m.is_service() && !ledger.contains(m.id))
            .collect();
        tracing::info!(
            collected,
            pending = candidates.len(),
            already_sent = ledger.len(),
            partial,
            "candidate list ready"
        );

        board.set_total(candidates.len() as u64, partial);
        let snap = board.transition(RunStatus::Active);
        reporter.report(&snap).await;
        store.save(&checkpoint)?;

        // Active
        std::fs::create_dir_all(&cfg.temp_dir)?;
        let executor = TransferExecutor::new(self.ctx.provider.clone(), cfg.temp_dir.clone());
        for msg in &candidates {
            if self.ctx.stop.is_requested() {
                store.save(&checkpoint)?;
                board.set_current(format!("paused before message {}", msg.id));
                let snap = board.transition(RunStatus::Paused);
                tracing::info!(
                    last_confirmed = checkpoint.last_confirmed_id,
                    processed = snap.processed,
                    "stop requested, run paused"
                );
                reporter.report(&snap).await;
                return Ok(self.outcome(snap, checkpoint, backoff));
            }

            board.set_current(format!("message {}", msg.id));
            let result = loop {
                match executor.transfer(msg, cfg.target).await {
                    Err(TransferError::RateLimited(wait)) => backoff.wait(wait).await,
                    other => break other,
                }
            };

            let snap = match result {
                Ok(done) => {
                    if done.is_confirmed() {
                        ledger.record(msg.id)?;
                        checkpoint.confirm(msg.id);
                        store.save(&checkpoint)?;
                    }
                    if done == Transferred::Sent {
                        backoff.pace().await;
                    }
                    board.advance(done.is_confirmed(), false)
                }
                Err(e) => {
                    tracing::error!(message_id = msg.id.0, error = %e, "message transfer failed");
                    log_failure(&failures, FailureEvent::transfer(msg.id, &e.to_string()));
                    board.advance(false, true)
                }
            };
            reporter.maybe_report(&snap).await;
        }

        store.save(&checkpoint)?;
        // A stop that arrived during the last transfer still ends the run paused.
        if self.ctx.stop.is_requested() {
            board.set_current("paused after the last message");
            let snap = board.transition(RunStatus::Paused);
            tracing::info!(
                last_confirmed = checkpoint.last_confirmed_id,
                processed = snap.processed,
                "stop requested, run paused"
            );
            reporter.report(&snap).await;
            return Ok(self.outcome(snap, checkpoint, backoff));
        }

        board.set_current("done");
        let snap = board.transition(RunStatus::Completed);
        tracing::info!(
            delivered = snap.delivered,
            failed = snap.failed,
            total = snap.total,
            "clone run completed"
        );
        reporter.report(&snap).await;
        Ok(self.outcome(snap, checkpoint, backoff))
    }

    fn outcome(
        &self,
        snapshot: ProgressSnapshot,
        checkpoint: Checkpoint,
        backoff: &BackoffController,
    ) -> RunOutcome {
        RunOutcome {
            status: snapshot.status,
            snapshot,
            checkpoint,
            rate_limit_waits: backoff.rate_limit_waits(),
        }
    }
}

fn log_failure(log: &FailureLog, event: FailureEvent) {
    if let Err(e) = log.write(event) {
        tracing::warn!(path = %log.path().display(), error = %e, "failed to append failure log");
    }
}
