// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Coordinator
//!
//! Drives one ingestion run end-to-end for one source:
//!
//! ```text
//! fetch → extraction → detection ─┬─ NEW ──→ analysis → filter → storage ─┐
//!                                 ├─ UPDATE ───────────────→ direct update ┤→ report
//!                                 └─ SKIP ──→ (terminal)                   │
//! ```
//!
//! ## Protocol
//!
//! 1. Take the per-source advisory lock; fail fast with
//!    `ConcurrentRunInProgress` when another run holds it.
//! 2. Resolve force-full-reprocessing: the caller's flag OR'd with the
//!    source's persisted flag (a flag-read failure counts as `false`).
//! 3. Fetch, capture the raw response content-addressed, extract.
//! 4. Classify every extracted record NEW/UPDATE/SKIP - or, under FFR,
//!    route everything NEW with the detector recorded as a bypassed node.
//! 5. NEW: analysis → filter → storage. UPDATE: direct update. Both write
//!    branches join before the run finishes. SKIP is terminal.
//! 6. Aggregate metrics, emit one [`OpportunityPath`] per extracted
//!    record, clear the FFR flag if it was used, release the lock.
//!
//! ## Failure semantics
//!
//! Extraction, detection, and analysis failures are terminal for the run -
//! in particular, an analysis failure also abandons pending UPDATE work
//! (preserved behavior). Storage and direct-update row failures are
//! absorbed into stage metrics. The advisory lock is released on every
//! exit path; a guard with a spawn-on-drop backstop covers unwinds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use ingest_pipeline_bootstrap::shutdown::CancellationToken;
use ingest_pipeline_domain::entities::pipeline_run::RunCounters;
use ingest_pipeline_domain::repositories::opportunity_repository::OpportunityRepository;
use ingest_pipeline_domain::repositories::run_repository::RunRepository;
use ingest_pipeline_domain::services::llm_client::LlmClient;
use ingest_pipeline_domain::services::source_fetcher::{FetchedPayload, SourceFetcher};
use ingest_pipeline_domain::{
    ApiOpportunity, ApiSource, FinalOutcome, OpportunityPath, PathAnalytics, PathReason, PathType, PipelineError,
    RawResponse, SourceConfiguration, SourceId, StageName, StageStatus,
};

use crate::application::report::{PipelineReport, StageMetricsSet, PIPELINE_VERSION};
use crate::application::services::run_manager::{ActiveRun, RunManager};
use crate::application::stages::analysis::AnalysisEngine;
use crate::application::stages::direct_update::{DirectUpdateWriter, UpdateCandidate};
use crate::application::stages::duplicate_detector::EarlyDuplicateDetector;
use crate::application::stages::extraction::ExtractionEngine;
use crate::application::stages::quality_filter::apply_quality_filter;
use crate::application::stages::storage::StorageWriter;
use crate::infrastructure::config::{AnalysisConfig, ExtractionConfig, DEFAULT_RUN_TIMEOUT};
use crate::infrastructure::metrics::PIPELINE_METRICS;

/// Options for one `process_source` invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessSourceOptions {
    /// Bypass duplicate detection for this run, overriding the per-source
    /// persisted flag
    pub force_full_reprocessing: bool,
    /// Lineage tag for an already-captured raw response; when absent the
    /// coordinator captures and persists the fetched payload itself
    pub raw_response_id: Option<i64>,
    /// Watchdog override; defaults to 30 minutes
    pub run_timeout: Option<Duration>,
    /// Embedder's process-wide shutdown token; when it fires the run is
    /// cancelled cooperatively, with the advisory lock still released
    pub shutdown: Option<CancellationToken>,
}

/// Scoped advisory-lock ownership.
///
/// Explicitly released on the normal paths; the `Drop` backstop schedules a
/// release if the guard unwinds without one, so a panic inside the run
/// cannot strand the source locked.
struct AdvisoryLockGuard {
    repository: Arc<dyn OpportunityRepository>,
    source_id: SourceId,
    released: bool,
}

impl AdvisoryLockGuard {
    async fn acquire(
        repository: Arc<dyn OpportunityRepository>,
        source_id: SourceId,
    ) -> Result<Self, PipelineError> {
        match repository.try_advisory_lock(source_id).await {
            Ok(true) => Ok(Self {
                repository,
                source_id,
                released: false,
            }),
            Ok(false) => Err(PipelineError::concurrent_run(format!(
                "source {} already has a run in progress",
                source_id
            ))),
            Err(error) => Err(error),
        }
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(error) = self.repository.release_advisory_lock(self.source_id).await {
            warn!(source_id = %self.source_id, error = %error, "failed to release advisory lock");
        }
    }
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        if !self.released {
            let repository = self.repository.clone();
            let source_id = self.source_id;
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = repository.release_advisory_lock(source_id).await;
                });
            }
        }
    }
}

/// Internal result of the staged execution.
struct StagedOutcome {
    report: PipelineReport,
    counters: RunCounters,
}

/// Orchestrates one ingestion run per call.
pub struct PipelineCoordinator {
    repository: Arc<dyn OpportunityRepository>,
    run_manager: RunManager,
    fetcher: Arc<dyn SourceFetcher>,
    extraction: ExtractionEngine,
    analysis: AnalysisEngine,
    detector: EarlyDuplicateDetector,
    storage: StorageWriter,
    direct_update: DirectUpdateWriter,
    processing_instructions: String,
}

impl PipelineCoordinator {
    /// Wires a coordinator from its collaborators and stage configs.
    pub fn new(
        repository: Arc<dyn OpportunityRepository>,
        run_repository: Arc<dyn RunRepository>,
        fetcher: Arc<dyn SourceFetcher>,
        llm: Arc<dyn LlmClient>,
        extraction_config: ExtractionConfig,
        analysis_config: AnalysisConfig,
        processing_instructions: impl Into<String>,
    ) -> Self {
        Self {
            extraction: ExtractionEngine::new(llm.clone(), extraction_config),
            analysis: AnalysisEngine::new(llm, analysis_config),
            detector: EarlyDuplicateDetector::new(repository.clone()),
            storage: StorageWriter::new(repository.clone()),
            direct_update: DirectUpdateWriter::new(repository.clone()),
            run_manager: RunManager::new(run_repository),
            repository,
            fetcher,
            processing_instructions: processing_instructions.into(),
        }
    }

    /// Wires a coordinator with stage configs read from the environment.
    pub fn from_env(
        repository: Arc<dyn OpportunityRepository>,
        run_repository: Arc<dyn RunRepository>,
        fetcher: Arc<dyn SourceFetcher>,
        llm: Arc<dyn LlmClient>,
        processing_instructions: impl Into<String>,
    ) -> Self {
        Self::new(
            repository,
            run_repository,
            fetcher,
            llm,
            ExtractionConfig::from_env(),
            AnalysisConfig::from_env(),
            processing_instructions,
        )
    }

    /// Processes one source end-to-end.
    ///
    /// Always returns the report shape; terminal failures arrive as
    /// `status: error` with a short message.
    pub async fn process_source(&self, source_id: SourceId, options: ProcessSourceOptions) -> PipelineReport {
        let started = Instant::now();
        PIPELINE_METRICS.record_run_started();

        let lock = match AdvisoryLockGuard::acquire(self.repository.clone(), source_id).await {
            Ok(lock) => lock,
            Err(error) => {
                warn!(source_id = %source_id, error = %error, "run rejected before start");
                PIPELINE_METRICS.record_run_finished("error", started.elapsed().as_secs_f64());
                return PipelineReport::skeleton(None, source_id).into_error(error.to_string());
            }
        };

        let report = self.run_locked(source_id, options, started).await;
        lock.release().await;

        let status_label = match report.status {
            crate::application::report::ReportStatus::Success => "success",
            crate::application::report::ReportStatus::Error => "error",
        };
        PIPELINE_METRICS.record_run_finished(status_label, started.elapsed().as_secs_f64());
        report
    }

    /// The run body executed under the advisory lock.
    async fn run_locked(
        &self,
        source_id: SourceId,
        options: ProcessSourceOptions,
        started: Instant,
    ) -> PipelineReport {
        let source = match self.repository.find_source(source_id).await {
            Ok(source) => source,
            Err(error) => return PipelineReport::skeleton(None, source_id).into_error(error.to_string()),
        };
        if !source.active {
            warn!(source_id = %source_id, "processing a source marked inactive");
        }

        // Per-source overrides; a missing or unreadable row means defaults
        let configuration = match self.repository.find_source_configuration(source_id).await {
            Ok(configuration) => configuration.unwrap_or_default(),
            Err(error) => {
                warn!(source_id = %source_id, error = %error, "source configuration read failed, using defaults");
                SourceConfiguration::default()
            }
        };

        // A flag-read failure must not block ingestion
        let persisted_ffr = match self.repository.should_force_full_reprocessing(source_id).await {
            Ok(flag) => flag,
            Err(error) => {
                warn!(source_id = %source_id, error = %error, "force-full-reprocessing check failed, assuming false");
                false
            }
        };
        let force_full = options.force_full_reprocessing || persisted_ffr;

        let timeout = options
            .run_timeout
            .or(configuration.run_timeout_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_RUN_TIMEOUT);
        let active = match self
            .run_manager
            .start_run(source_id, PIPELINE_VERSION, timeout, options.shutdown.clone())
            .await
        {
            Ok(active) => active,
            Err(error) => return PipelineReport::skeleton(None, source_id).into_error(error.to_string()),
        };
        let cancel = active.token();

        match self
            .execute_stages(&source, &configuration, force_full, &options, &active, &cancel, started)
            .await
        {
            Ok(outcome) => {
                if force_full {
                    // One-shot flag: clear after a successful FFR run
                    if let Err(error) = self.repository.disable_force_full_reprocessing(source_id).await {
                        warn!(source_id = %source_id, error = %error, "failed to clear force-full-reprocessing flag");
                    }
                }
                if let Err(error) = active.complete_run(outcome.counters).await {
                    warn!(run_id = %active.run_id(), error = %error, "failed to persist run completion");
                }
                outcome.report
            }
            Err(error) => {
                let message = if active.timed_out() {
                    "run timed out".to_string()
                } else {
                    error.to_string()
                };
                if let Err(persist_error) = active.fail_run(&message).await {
                    warn!(run_id = %active.run_id(), error = %persist_error, "failed to persist run failure");
                }
                PipelineReport::skeleton(Some(active.run_id()), source_id).into_error(message)
            }
        }
    }

    /// Runs the stage chain; any `Err` is terminal for the run.
    #[allow(clippy::too_many_arguments)]
    async fn execute_stages(
        &self,
        source: &ApiSource,
        configuration: &SourceConfiguration,
        force_full: bool,
        options: &ProcessSourceOptions,
        active: &ActiveRun,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<StagedOutcome, PipelineError> {
        let mut stage_metrics = StageMetricsSet::default();

        // ------------------------------------------------------------------
        // Stage 1: fetch + extraction
        // ------------------------------------------------------------------
        active
            .update_stage(StageName::DataExtraction, StageStatus::Processing, serde_json::Value::Null, 0, 0, 0, 0, 0)
            .await;

        let fetched = match self.fetcher.fetch_raw_items(source).await {
            Ok(fetched) => fetched,
            Err(error) => {
                active.fail_stage(StageName::DataExtraction, &error.to_string()).await;
                return Err(error);
            }
        };

        let raw_response_id = match self.capture_raw_response(source, &fetched, options).await {
            Ok(id) => id,
            Err(error) => {
                active.fail_stage(StageName::DataExtraction, &error.to_string()).await;
                return Err(error);
            }
        };

        let instructions = configuration
            .processing_instructions
            .as_deref()
            .unwrap_or(&self.processing_instructions);
        let extraction = match self.extraction.extract(&fetched.items, source, instructions, cancel).await {
            Ok(extraction) => extraction,
            Err(error) => {
                if cancel.is_cancelled() {
                    active.cancel_stage(StageName::DataExtraction).await;
                } else {
                    active.fail_stage(StageName::DataExtraction, &error.to_string()).await;
                }
                return Err(error);
            }
        };

        let mut opportunities = extraction.opportunities;
        for opportunity in &mut opportunities {
            opportunity.raw_response_id = Some(raw_response_id);
        }

        active
            .update_stage(
                StageName::DataExtraction,
                StageStatus::Completed,
                serde_json::to_value(&extraction.metrics).unwrap_or_default(),
                extraction.metrics.total_tokens,
                extraction.metrics.total_api_calls,
                fetched.items.len(),
                opportunities.len(),
                extraction.metrics.execution_time_ms,
            )
            .await;

        let total_opportunities = opportunities.len();
        let mut paths: Vec<OpportunityPath> = opportunities
            .iter()
            .map(|opportunity| OpportunityPath {
                api_opportunity_id: opportunity.api_opportunity_id.clone(),
                title: opportunity.title.clone(),
                path_type: PathType::New,
                path_reason: PathReason::NoDuplicateFound,
                stages_processed: vec![StageName::DataExtraction],
                final_outcome: FinalOutcome::Skipped,
                analytics: PathAnalytics::default(),
            })
            .collect();
        stage_metrics.data_extraction = Some(extraction.metrics);

        // ------------------------------------------------------------------
        // Stage 2: early duplicate detection (or FFR bypass)
        // ------------------------------------------------------------------
        let mut new_items: Vec<(usize, ApiOpportunity)> = Vec::new();
        let mut update_candidates: Vec<(usize, UpdateCandidate)> = Vec::new();
        let mut skip_count = 0usize;

        if force_full {
            // Bypass: everything NEW; the detector still appears in the
            // trace as a bypassed node
            for (index, path) in paths.iter_mut().enumerate() {
                path.path_type = PathType::New;
                path.path_reason = PathReason::ForceFullProcessing;
                path.record_stage(StageName::EarlyDuplicateDetector);
                new_items.push((index, opportunities[index].clone()));
            }
            active
                .update_stage(
                    StageName::EarlyDuplicateDetector,
                    StageStatus::Completed,
                    serde_json::json!({ "bypassed": true, "reason": "force_full_processing" }),
                    0,
                    0,
                    total_opportunities,
                    total_opportunities,
                    0,
                )
                .await;
            info!(source_id = %source.id, records = total_opportunities, "duplicate detection bypassed (FFR)");
        } else {
            active
                .update_stage(
                    StageName::EarlyDuplicateDetector,
                    StageStatus::Processing,
                    serde_json::Value::Null,
                    0,
                    0,
                    total_opportunities,
                    0,
                    0,
                )
                .await;

            let detection = match self.detector.detect(source.id, opportunities).await {
                Ok(detection) => detection,
                Err(error) => {
                    active
                        .fail_stage(StageName::EarlyDuplicateDetector, &error.to_string())
                        .await;
                    return Err(error);
                }
            };

            for (index, detected) in detection.detections.into_iter().enumerate() {
                let path = &mut paths[index];
                path.path_type = detected.action;
                path.path_reason = detected.reason;
                path.record_stage(StageName::EarlyDuplicateDetector);
                path.analytics.detection_method = Some(detected.method);
                path.analytics.confidence = Some(detected.confidence);
                path.analytics.bypassed_llm = detected.action != PathType::New;

                match detected.action {
                    PathType::New => new_items.push((index, detected.opportunity)),
                    PathType::Update => {
                        let existing = detected
                            .existing
                            .expect("UPDATE classification always carries the matched record");
                        update_candidates.push((
                            index,
                            UpdateCandidate {
                                opportunity: detected.opportunity,
                                existing,
                                reason: detected.reason,
                            },
                        ));
                    }
                    PathType::Skip => skip_count += 1,
                }
            }

            active
                .update_stage(
                    StageName::EarlyDuplicateDetector,
                    StageStatus::Completed,
                    serde_json::to_value(&detection.metrics).unwrap_or_default(),
                    0,
                    0,
                    total_opportunities,
                    new_items.len() + update_candidates.len(),
                    detection.metrics.execution_time_ms,
                )
                .await;
            stage_metrics.early_duplicate_detector = Some(detection.metrics);
        }

        PIPELINE_METRICS.record_routed("NEW", new_items.len() as u64);
        PIPELINE_METRICS.record_routed("UPDATE", update_candidates.len() as u64);
        PIPELINE_METRICS.record_routed("SKIP", skip_count as u64);

        // ------------------------------------------------------------------
        // Stage 3-5: analysis → filter → storage, for NEW records
        // ------------------------------------------------------------------
        let mut stored_success = 0usize;
        let mut filtered_out = 0usize;

        let storage_input = if new_items.is_empty() {
            Vec::new()
        } else {
            if cancel.is_cancelled() {
                return Err(self.cancellation_error(active));
            }

            let path_index_by_key: HashMap<String, usize> = new_items
                .iter()
                .map(|(index, opportunity)| (opportunity.merge_key(), *index))
                .collect();

            active
                .update_stage(StageName::Analysis, StageStatus::Processing, serde_json::Value::Null, 0, 0, new_items.len(), 0, 0)
                .await;

            let analysis_input: Vec<ApiOpportunity> =
                new_items.iter().map(|(_, opportunity)| opportunity.clone()).collect();
            let analysis = match self.analysis.analyze(analysis_input, cancel).await {
                Ok(analysis) => analysis,
                Err(error) => {
                    if cancel.is_cancelled() {
                        active.cancel_stage(StageName::Analysis).await;
                        return Err(self.cancellation_error(active));
                    }
                    active.fail_stage(StageName::Analysis, &error.to_string()).await;
                    // Preserved fail-fast: pending UPDATE work is abandoned
                    // along with storage when analysis dies
                    return Err(error);
                }
            };

            for analyzed in &analysis.opportunities {
                if let Some(&index) = path_index_by_key.get(&analyzed.opportunity.merge_key()) {
                    paths[index].record_stage(StageName::Analysis);
                }
            }
            active
                .update_stage(
                    StageName::Analysis,
                    StageStatus::Completed,
                    serde_json::to_value(&analysis.metrics).unwrap_or_default(),
                    analysis.metrics.total_tokens,
                    analysis.metrics.total_api_calls,
                    new_items.len(),
                    analysis.opportunities.len(),
                    analysis.metrics.execution_time_ms,
                )
                .await;

            let filter = apply_quality_filter(analysis.opportunities);
            for excluded in &filter.excluded {
                if let Some(&index) = path_index_by_key.get(&excluded.opportunity.opportunity.merge_key()) {
                    paths[index].record_stage(StageName::Filter);
                    paths[index].final_outcome = FinalOutcome::FilteredOut;
                }
            }
            for included in &filter.included {
                if let Some(&index) = path_index_by_key.get(&included.opportunity.merge_key()) {
                    paths[index].record_stage(StageName::Filter);
                }
            }
            filtered_out = filter.excluded.len();
            active
                .update_stage(
                    StageName::Filter,
                    StageStatus::Completed,
                    serde_json::to_value(&filter.metrics).unwrap_or_default(),
                    0,
                    0,
                    filter.metrics.total_analyzed,
                    filter.metrics.included,
                    filter.metrics.processing_time_ms as u64,
                )
                .await;
            stage_metrics.analysis = Some(analysis.metrics);
            stage_metrics.filter = Some(filter.metrics);

            filter.included
        };

        // ------------------------------------------------------------------
        // Storage and direct update: both must finish before the run does
        // ------------------------------------------------------------------
        if cancel.is_cancelled() {
            return Err(self.cancellation_error(active));
        }

        let candidates: Vec<UpdateCandidate> = update_candidates
            .iter()
            .map(|(_, candidate)| candidate.clone())
            .collect();
        let run_storage = !storage_input.is_empty();
        let run_updates = !candidates.is_empty();

        let storage_keys: Vec<String> = storage_input
            .iter()
            .map(|record| record.opportunity.merge_key())
            .collect();
        let path_index_by_key: HashMap<String, usize> = new_items
            .iter()
            .map(|(index, opportunity)| (opportunity.merge_key(), *index))
            .collect();

        if run_storage {
            active
                .update_stage(StageName::Storage, StageStatus::Processing, serde_json::Value::Null, 0, 0, storage_input.len(), 0, 0)
                .await;
        }
        if run_updates {
            active
                .update_stage(StageName::DirectUpdate, StageStatus::Processing, serde_json::Value::Null, 0, 0, candidates.len(), 0, 0)
                .await;
        }

        let storage_future = self.storage.store(source.id, storage_input, cancel);
        let updates_future = self.direct_update.apply(&candidates, Utc::now(), cancel);
        let (storage_result, updates_result) = tokio::join!(storage_future, updates_future);

        let storage_outcome = match storage_result {
            Ok(outcome) => outcome,
            Err(error) => {
                active.cancel_stage(StageName::Storage).await;
                return Err(if cancel.is_cancelled() {
                    self.cancellation_error(active)
                } else {
                    error
                });
            }
        };
        let updates_outcome = match updates_result {
            Ok(outcome) => outcome,
            Err(error) => {
                active.cancel_stage(StageName::DirectUpdate).await;
                return Err(if cancel.is_cancelled() {
                    self.cancellation_error(active)
                } else {
                    error
                });
            }
        };

        if run_storage {
            // Row outcomes are returned in input order
            for (key, row) in storage_keys.iter().zip(storage_outcome.results.iter()) {
                if let Some(&index) = path_index_by_key.get(key) {
                    let path = &mut paths[index];
                    path.record_stage(StageName::Storage);
                    path.final_outcome = FinalOutcome::Stored;
                    if !row.success {
                        path.analytics.write_error = row.error.clone();
                    }
                }
            }
            stored_success = storage_outcome.metrics.successful_stores;
            active
                .update_stage(
                    StageName::Storage,
                    StageStatus::Completed,
                    serde_json::to_value(&storage_outcome.metrics).unwrap_or_default(),
                    0,
                    0,
                    storage_outcome.metrics.total_attempted,
                    storage_outcome.metrics.successful_stores,
                    storage_outcome.metrics.execution_time_ms,
                )
                .await;
            stage_metrics.storage = Some(storage_outcome.metrics);
            PIPELINE_METRICS.record_stored(stored_success as u64);
        }

        if run_updates {
            for ((index, _), detail) in update_candidates.iter().zip(updates_outcome.update_details.iter()) {
                let path = &mut paths[*index];
                path.record_stage(StageName::DirectUpdate);
                path.final_outcome = FinalOutcome::Updated;
                if !detail.success {
                    path.analytics.write_error = detail.error.clone();
                }
            }
            active
                .update_stage(
                    StageName::DirectUpdate,
                    StageStatus::Completed,
                    serde_json::to_value(&updates_outcome.update_details).unwrap_or_default(),
                    0,
                    0,
                    updates_outcome.metrics.total_candidates,
                    updates_outcome.successful,
                    updates_outcome.metrics.execution_time_ms,
                )
                .await;
            stage_metrics.direct_update = Some(updates_outcome.metrics);
        }

        // ------------------------------------------------------------------
        // Report assembly
        // ------------------------------------------------------------------
        let bypassed_llm = if force_full {
            0
        } else {
            update_candidates.len() + skip_count
        };
        let total_tokens = stage_metrics
            .data_extraction
            .as_ref()
            .map(|m| m.total_tokens)
            .unwrap_or(0)
            + stage_metrics.analysis.as_ref().map(|m| m.total_tokens).unwrap_or(0);
        let total_api_calls = stage_metrics
            .data_extraction
            .as_ref()
            .map(|m| m.total_api_calls)
            .unwrap_or(0)
            + stage_metrics.analysis.as_ref().map(|m| m.total_api_calls).unwrap_or(0);
        PIPELINE_METRICS.record_tokens(total_tokens);

        let mut report = PipelineReport::skeleton(Some(active.run_id()), source.id);
        report.enhanced_metrics.total_tokens_used = total_tokens;
        report.enhanced_metrics.total_api_calls = total_api_calls;
        report.enhanced_metrics.total_execution_time = started.elapsed().as_millis() as u64;
        report.enhanced_metrics.optimization_impact.total_opportunities = total_opportunities;
        report.enhanced_metrics.optimization_impact.bypassed_llm = bypassed_llm;
        report.enhanced_metrics.optimization_impact.successful_opportunities =
            stored_success + updates_outcome.successful;
        report.enhanced_metrics.force_full_processing_used = force_full;
        report.enhanced_metrics.stage_metrics = stage_metrics;
        report.enhanced_metrics.opportunity_paths = paths;

        let counters = RunCounters {
            total_opportunities: total_opportunities as u64,
            stored: stored_success as u64,
            updated: updates_outcome.successful as u64,
            skipped: skip_count as u64,
            filtered_out: filtered_out as u64,
        };

        info!(
            run_id = %active.run_id(),
            source_id = %source.id,
            total = total_opportunities,
            stored = counters.stored,
            updated = counters.updated,
            skipped = counters.skipped,
            bypassed_llm,
            "run succeeded"
        );

        Ok(StagedOutcome { report, counters })
    }

    /// Captures the fetched payload content-addressed, unless the caller
    /// already supplied a lineage id.
    async fn capture_raw_response(
        &self,
        source: &ApiSource,
        fetched: &FetchedPayload,
        options: &ProcessSourceOptions,
    ) -> Result<i64, PipelineError> {
        if let Some(id) = options.raw_response_id {
            return Ok(id);
        }
        let raw = RawResponse::capture(
            source.id,
            fetched.endpoint.clone(),
            fetched.call_type,
            fetched.payload.clone(),
            Utc::now(),
        );
        self.repository.insert_raw_response(&raw).await
    }

    /// Maps a cancelled run to its caller-visible error.
    fn cancellation_error(&self, active: &ActiveRun) -> PipelineError {
        if active.timed_out() {
            PipelineError::timeout("run watchdog fired")
        } else {
            PipelineError::cancelled_with_msg("run cancelled")
        }
    }
}
