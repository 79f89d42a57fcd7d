// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Manager
//!
//! Owns the run/stage state machine: one run row per invocation
//! (`pending → processing → {completed, failed}`), one stage row per
//! stage per run, and the run-wide timeout watchdog.
//!
//! ## Watchdog
//!
//! Started when the run starts. If the deadline passes first, the watchdog
//! marks the run failed with reason `timeout` and cancels the run token -
//! it does not tear down in-flight stage tasks; they observe the token at
//! their own suspension points. Completing or failing the run clears the
//! watchdog.
//!
//! The same lifecycle task also watches the caller's shutdown token, when
//! one was supplied: a process-wide shutdown cancels the run token and
//! records the run as failed with reason `cancelled by shutdown`.
//!
//! ## Idempotence
//!
//! Stage updates carry a monotonic per-stage sequence; the repository keeps
//! the highest, so repeated or stale updates are latest-write-wins.
//! Run-row persistence failures degrade to warnings - losing a status
//! write must never break the pipeline work itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use ingest_pipeline_bootstrap::shutdown::CancellationToken;
use ingest_pipeline_domain::entities::pipeline_run::{RunCounters, RunStatus};
use ingest_pipeline_domain::repositories::run_repository::RunRepository;
use ingest_pipeline_domain::{PipelineError, PipelineRun, PipelineStageRecord, RunId, SourceId, StageName, StageStatus};

/// Error message recorded when the watchdog fires.
pub const TIMEOUT_REASON: &str = "timeout";

/// Error message recorded when a process-wide shutdown cancels the run.
pub const SHUTDOWN_REASON: &str = "cancelled by shutdown";

/// Creates runs and their managers.
pub struct RunManager {
    repository: Arc<dyn RunRepository>,
}

impl RunManager {
    /// Creates a run manager over the given repository.
    pub fn new(repository: Arc<dyn RunRepository>) -> Self {
        Self { repository }
    }

    /// Starts a run: persists the row, transitions it to processing, and
    /// arms the timeout watchdog.
    ///
    /// `shutdown` is the embedder's process-wide token; when it fires, the
    /// lifecycle task cancels this run cooperatively.
    pub async fn start_run(
        &self,
        source_id: SourceId,
        pipeline_version: &str,
        timeout: Duration,
        shutdown: Option<CancellationToken>,
    ) -> Result<ActiveRun, PipelineError> {
        let mut run = PipelineRun::new(source_id, pipeline_version, Utc::now());
        self.repository.insert_run(&run).await?;

        run.begin();
        self.repository.update_run(&run).await?;
        info!(run_id = %run.id, source_id = %source_id, timeout_secs = timeout.as_secs(), "run started");

        let active = ActiveRun {
            inner: Arc::new(ActiveRunInner {
                run_id: run.id,
                source_id,
                repository: self.repository.clone(),
                token: CancellationToken::new(),
                state: Mutex::new(RunState {
                    run,
                    sequences: HashMap::new(),
                    finished: false,
                    timed_out: false,
                }),
                watchdog: Mutex::new(None),
            }),
        };
        active.arm_watchdog(timeout, shutdown);
        Ok(active)
    }
}

struct RunState {
    run: PipelineRun,
    /// Next update sequence per stage
    sequences: HashMap<StageName, u64>,
    /// Set once the run reached a terminal status
    finished: bool,
    /// Set when the watchdog fired
    timed_out: bool,
}

struct ActiveRunInner {
    run_id: RunId,
    source_id: SourceId,
    repository: Arc<dyn RunRepository>,
    token: CancellationToken,
    state: Mutex<RunState>,
    watchdog: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Handle to one in-flight run.
#[derive(Clone)]
pub struct ActiveRun {
    inner: Arc<ActiveRunInner>,
}

impl ActiveRun {
    /// The run identifier
    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// The run's cancellation token
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// True when the watchdog forced this run to fail
    pub fn timed_out(&self) -> bool {
        self.inner.state.lock().timed_out
    }

    fn arm_watchdog(&self, timeout: Duration, shutdown: Option<CancellationToken>) {
        let inner = self.inner.clone();
        // A fresh token stands in when no shutdown signal was supplied; it
        // never fires, so only the deadline branch can trigger
        let shutdown = shutdown.unwrap_or_default();
        let handle = tokio::spawn(async move {
            let token = inner.token.clone();
            tokio::select! {
                _ = token.cancelled() => {}
                _ = shutdown.cancelled() => {
                    let run_snapshot = {
                        let mut state = inner.state.lock();
                        if state.finished {
                            return;
                        }
                        state.finished = true;
                        state.run.fail(SHUTDOWN_REASON, Utc::now());
                        state.run.clone()
                    };
                    info!(run_id = %inner.run_id, source_id = %inner.source_id, "run cancelled by shutdown signal");
                    if let Err(persist_error) = inner.repository.update_run(&run_snapshot).await {
                        warn!(run_id = %inner.run_id, error = %persist_error, "failed to persist shutdown status");
                    }
                    inner.token.cancel();
                }
                _ = tokio::time::sleep(timeout) => {
                    // Mark failed first so late stage updates see the state,
                    // then cancel so in-flight work unwinds cooperatively
                    let run_snapshot = {
                        let mut state = inner.state.lock();
                        if state.finished {
                            return;
                        }
                        state.finished = true;
                        state.timed_out = true;
                        state.run.fail(TIMEOUT_REASON, Utc::now());
                        state.run.clone()
                    };
                    error!(run_id = %inner.run_id, source_id = %inner.source_id, "run watchdog fired");
                    if let Err(persist_error) = inner.repository.update_run(&run_snapshot).await {
                        warn!(run_id = %inner.run_id, error = %persist_error, "failed to persist timeout status");
                    }
                    inner.token.cancel();
                }
            }
        });
        *self.inner.watchdog.lock() = Some(handle);
    }

    fn disarm_watchdog(&self) {
        // Cancel-by-token is not appropriate here: the token also governs
        // stage work. Abort the timer task directly.
        if let Some(handle) = self.inner.watchdog.lock().take() {
            handle.abort();
        }
    }

    /// Records a stage transition.
    ///
    /// Persistence failures are logged, not propagated; the stage row is
    /// bookkeeping, not pipeline state.
    pub async fn update_stage(
        &self,
        stage: StageName,
        status: StageStatus,
        results: serde_json::Value,
        tokens_used: u64,
        api_calls: u64,
        input_count: usize,
        output_count: usize,
        execution_time_ms: u64,
    ) {
        let record = {
            let mut state = self.inner.state.lock();
            let sequence = state.sequences.entry(stage).or_insert(0);
            *sequence += 1;
            PipelineStageRecord {
                run_id: self.inner.run_id,
                stage,
                status,
                input_count,
                output_count,
                execution_time_ms,
                tokens_used,
                api_calls,
                error_message: None,
                stage_results: results,
                sequence: *sequence,
            }
        };

        if let Err(error) = self.inner.repository.upsert_stage(&record).await {
            warn!(run_id = %self.inner.run_id, stage = %stage, error = %error, "failed to persist stage update");
        }
    }

    /// Records a stage failure with its error message.
    pub async fn fail_stage(&self, stage: StageName, error_message: &str) {
        let record = {
            let mut state = self.inner.state.lock();
            let sequence = state.sequences.entry(stage).or_insert(0);
            *sequence += 1;
            let mut record = PipelineStageRecord::pending(self.inner.run_id, stage);
            record.status = StageStatus::Failed;
            record.error_message = Some(error_message.to_string());
            record.sequence = *sequence;
            record
        };
        if let Err(error) = self.inner.repository.upsert_stage(&record).await {
            warn!(run_id = %self.inner.run_id, stage = %stage, error = %error, "failed to persist stage failure");
        }
    }

    /// Best-effort marking of stages as cancelled after the token fired.
    pub async fn cancel_stage(&self, stage: StageName) {
        let record = {
            let mut state = self.inner.state.lock();
            let sequence = state.sequences.entry(stage).or_insert(0);
            *sequence += 1;
            let mut record = PipelineStageRecord::pending(self.inner.run_id, stage);
            record.status = StageStatus::Cancelled;
            record.sequence = *sequence;
            record
        };
        if let Err(error) = self.inner.repository.upsert_stage(&record).await {
            warn!(run_id = %self.inner.run_id, stage = %stage, error = %error, "failed to persist stage cancellation");
        }
    }

    /// Completes the run with its aggregate counters.
    pub async fn complete_run(&self, counters: RunCounters) -> Result<(), PipelineError> {
        self.disarm_watchdog();
        let run_snapshot = {
            let mut state = self.inner.state.lock();
            if state.finished {
                // Watchdog won the race; keep the failed status
                return Ok(());
            }
            state.finished = true;
            state.run.counters = counters;
            state.run.complete(Utc::now());
            state.run.clone()
        };
        info!(run_id = %self.inner.run_id, "run completed");
        self.inner.repository.update_run(&run_snapshot).await
    }

    /// Fails the run with an error message.
    pub async fn fail_run(&self, error_message: &str) -> Result<(), PipelineError> {
        self.disarm_watchdog();
        let run_snapshot = {
            let mut state = self.inner.state.lock();
            if state.finished {
                return Ok(());
            }
            state.finished = true;
            state.run.fail(error_message, Utc::now());
            state.run.clone()
        };
        info!(run_id = %self.inner.run_id, error = error_message, "run failed");
        self.inner.repository.update_run(&run_snapshot).await
    }

    /// Current run status snapshot (for tests and introspection)
    pub fn status(&self) -> RunStatus {
        self.inner.state.lock().run.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingRunRepository {
        runs: Mutex<Vec<PipelineRun>>,
        stages: Mutex<Vec<PipelineStageRecord>>,
    }

    #[async_trait]
    impl RunRepository for RecordingRunRepository {
        async fn insert_run(&self, run: &PipelineRun) -> Result<(), PipelineError> {
            self.runs.lock().push(run.clone());
            Ok(())
        }

        async fn update_run(&self, run: &PipelineRun) -> Result<(), PipelineError> {
            self.runs.lock().push(run.clone());
            Ok(())
        }

        async fn upsert_stage(&self, stage: &PipelineStageRecord) -> Result<(), PipelineError> {
            self.stages.lock().push(stage.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle_completed() {
        let repository = Arc::new(RecordingRunRepository::default());
        let manager = RunManager::new(repository.clone());

        let active = manager
            .start_run(SourceId::new(), "v2.0", Duration::from_secs(60), None)
            .await
            .unwrap();
        assert_eq!(active.status(), RunStatus::Processing);

        active.complete_run(RunCounters::default()).await.unwrap();
        assert_eq!(active.status(), RunStatus::Completed);
        assert!(!active.timed_out());
        assert!(!active.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_watchdog_fires_and_cancels_token() {
        let repository = Arc::new(RecordingRunRepository::default());
        let manager = RunManager::new(repository.clone());

        let active = manager
            .start_run(SourceId::new(), "v2.0", Duration::from_millis(20), None)
            .await
            .unwrap();

        // Wait for the watchdog to fire
        active.token().cancelled().await;

        assert!(active.timed_out());
        assert_eq!(active.status(), RunStatus::Failed);

        // Completion after timeout must not overwrite the failed status
        active.complete_run(RunCounters::default()).await.unwrap();
        assert_eq!(active.status(), RunStatus::Failed);

        let last_run = repository.runs.lock().last().cloned().unwrap();
        assert_eq!(last_run.status, RunStatus::Failed);
        assert_eq!(last_run.error.as_deref(), Some(TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn test_shutdown_token_cancels_run() {
        let repository = Arc::new(RecordingRunRepository::default());
        let manager = RunManager::new(repository.clone());

        let shutdown = CancellationToken::new();
        let active = manager
            .start_run(SourceId::new(), "v2.0", Duration::from_secs(60), Some(shutdown.clone()))
            .await
            .unwrap();

        shutdown.cancel();
        active.token().cancelled().await;

        assert!(!active.timed_out());
        assert_eq!(active.status(), RunStatus::Failed);

        let last_run = repository.runs.lock().last().cloned().unwrap();
        assert_eq!(last_run.error.as_deref(), Some(SHUTDOWN_REASON));
    }

    #[tokio::test]
    async fn test_stage_sequences_are_monotonic() {
        let repository = Arc::new(RecordingRunRepository::default());
        let manager = RunManager::new(repository.clone());

        let active = manager
            .start_run(SourceId::new(), "v2.0", Duration::from_secs(60), None)
            .await
            .unwrap();

        for status in [StageStatus::Processing, StageStatus::Completed] {
            active
                .update_stage(StageName::Analysis, status, serde_json::Value::Null, 0, 0, 5, 5, 10)
                .await;
        }
        active.complete_run(RunCounters::default()).await.unwrap();

        let stages = repository.stages.lock();
        let sequences: Vec<u64> = stages
            .iter()
            .filter(|s| s.stage == StageName::Analysis)
            .map(|s| s.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_completion_disarms_watchdog() {
        let repository = Arc::new(RecordingRunRepository::default());
        let manager = RunManager::new(repository.clone());

        let active = manager
            .start_run(SourceId::new(), "v2.0", Duration::from_millis(30), None)
            .await
            .unwrap();
        active.complete_run(RunCounters::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!active.token().is_cancelled());
        assert_eq!(active.status(), RunStatus::Completed);
    }
}
