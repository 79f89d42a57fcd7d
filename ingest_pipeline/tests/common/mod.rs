// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared test doubles and fixtures for the integration suite.
//!
//! The doubles implement the domain ports (`OpportunityRepository`,
//! `RunRepository`, `LlmClient`, `SourceFetcher`) so the real engines and
//! coordinator run unchanged; behavior knobs simulate partial write
//! failures, transport errors, and slow upstreams.

// Each test binary compiles this module independently and uses a subset
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use ingest_pipeline::application::stages::analysis::opportunity_refs_from_prompt;
use ingest_pipeline::application::stages::extraction::raw_items_from_prompt;
use ingest_pipeline::infrastructure::config::{AnalysisConfig, ExtractionConfig};
use ingest_pipeline::{PipelineCoordinator, PipelineError, SourceId};
use ingest_pipeline_domain::entities::source::{SourceConfiguration, SourceEndpoint};
use ingest_pipeline_domain::repositories::opportunity_repository::{
    OpportunityFieldUpdates, OpportunityRepository, RowWriteOutcome,
};
use ingest_pipeline_domain::repositories::run_repository::RunRepository;
use ingest_pipeline_domain::services::change_detector::parse_wire_date;
use ingest_pipeline_domain::services::freshness::parse_wire_timestamp;
use ingest_pipeline_domain::services::llm_client::{
    BatchSizeHint, LlmClient, LlmPerformanceMetrics, SchemaCallOptions, SchemaCallResult,
};
use ingest_pipeline_domain::services::source_fetcher::{FetchedPayload, SourceFetcher};
use ingest_pipeline_domain::{
    AnalyzedOpportunity, ApiCallType, ApiSource, PipelineRun, PipelineStageRecord, RawResponse, StoredOpportunity,
};

// ============================================================================
// In-memory repository double
// ============================================================================

#[derive(Default)]
struct RepositoryState {
    sources: HashMap<SourceId, ApiSource>,
    configurations: HashMap<SourceId, SourceConfiguration>,
    opportunities: Vec<StoredOpportunity>,
    next_id: i64,
    raw_responses: HashMap<(SourceId, String), i64>,
    next_raw_id: i64,
    locks: HashSet<SourceId>,
    runs: Vec<PipelineRun>,
    stages: Vec<PipelineStageRecord>,
}

/// In-memory implementation of both persistence ports.
#[derive(Default)]
pub struct MockRepository {
    state: Mutex<RepositoryState>,
    /// api_opportunity_ids whose inserts should fail
    pub fail_insert_ids: Mutex<HashSet<String>>,
    /// Deadlocks to inject into field updates before succeeding
    pub update_deadlocks_remaining: AtomicU32,
    /// Recorded field updates, in call order
    pub update_log: Mutex<Vec<(i64, OpportunityFieldUpdates)>>,
    /// Calls to disable_force_full_reprocessing
    pub disable_ffr_calls: AtomicU32,
}

impl MockRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_source(&self, source: ApiSource) {
        self.state.lock().sources.insert(source.id, source);
    }

    pub fn seed_configuration(&self, source_id: SourceId, configuration: SourceConfiguration) {
        self.state.lock().configurations.insert(source_id, configuration);
    }

    pub fn stored_count(&self) -> usize {
        self.state.lock().opportunities.len()
    }

    pub fn stored_titles(&self) -> Vec<String> {
        self.state.lock().opportunities.iter().map(|o| o.title.clone()).collect()
    }

    pub fn stored_by_api_id(&self, api_id: &str) -> Option<StoredOpportunity> {
        self.state
            .lock()
            .opportunities
            .iter()
            .find(|o| o.api_opportunity_id == api_id)
            .cloned()
    }

    pub fn lock_held(&self, source_id: SourceId) -> bool {
        self.state.lock().locks.contains(&source_id)
    }

    pub fn runs(&self) -> Vec<PipelineRun> {
        self.state.lock().runs.clone()
    }

    pub fn stage_rows(&self) -> Vec<PipelineStageRecord> {
        self.state.lock().stages.clone()
    }
}

#[async_trait]
impl OpportunityRepository for MockRepository {
    async fn find_source(&self, source_id: SourceId) -> Result<ApiSource, PipelineError> {
        self.state
            .lock()
            .sources
            .get(&source_id)
            .cloned()
            .ok_or_else(|| PipelineError::SourceNotFound(source_id.to_string()))
    }

    async fn find_source_configuration(
        &self,
        source_id: SourceId,
    ) -> Result<Option<SourceConfiguration>, PipelineError> {
        Ok(self.state.lock().configurations.get(&source_id).cloned())
    }

    async fn find_by_api_ids(
        &self,
        source_id: SourceId,
        ids: &[String],
    ) -> Result<Vec<StoredOpportunity>, PipelineError> {
        let wanted: HashSet<&String> = ids.iter().collect();
        Ok(self
            .state
            .lock()
            .opportunities
            .iter()
            .filter(|o| o.source_id == source_id && wanted.contains(&o.api_opportunity_id))
            .cloned()
            .collect())
    }

    async fn find_by_titles(
        &self,
        source_id: SourceId,
        titles: &[String],
    ) -> Result<Vec<StoredOpportunity>, PipelineError> {
        let wanted: HashSet<&String> = titles.iter().collect();
        Ok(self
            .state
            .lock()
            .opportunities
            .iter()
            .filter(|o| o.source_id == source_id && wanted.contains(&o.title))
            .cloned()
            .collect())
    }

    async fn insert_opportunities(
        &self,
        source_id: SourceId,
        records: &[AnalyzedOpportunity],
    ) -> Result<Vec<RowWriteOutcome>, PipelineError> {
        let failing = self.fail_insert_ids.lock().clone();
        let mut state = self.state.lock();
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let opportunity = &record.opportunity;
            if failing.contains(&opportunity.api_opportunity_id) {
                outcomes.push(RowWriteOutcome {
                    api_opportunity_id: opportunity.api_opportunity_id.clone(),
                    success: false,
                    database_id: None,
                    error: Some("simulated insert failure".to_string()),
                });
                continue;
            }

            let existing_index = state.opportunities.iter().position(|o| {
                o.source_id == source_id && o.api_opportunity_id == opportunity.api_opportunity_id
            });

            let id = match existing_index {
                Some(index) => state.opportunities[index].id,
                None => {
                    state.next_id += 1;
                    state.next_id
                }
            };

            let stored = StoredOpportunity {
                id,
                source_id,
                api_opportunity_id: opportunity.api_opportunity_id.clone(),
                title: opportunity.title.trim().to_string(),
                description: opportunity.description.clone(),
                total_funding_available: opportunity.total_funding_available,
                minimum_award: opportunity.minimum_award,
                maximum_award: opportunity.maximum_award,
                open_date: opportunity.open_date.as_deref().and_then(parse_wire_date),
                close_date: opportunity.close_date.as_deref().and_then(parse_wire_date),
                eligible_applicants: opportunity.eligible_applicants.clone(),
                eligible_project_types: opportunity.eligible_project_types.clone(),
                eligible_activities: opportunity.eligible_activities.clone(),
                funding_type: opportunity.funding_type.clone(),
                updated_at: Utc::now(),
                api_updated_at: opportunity.api_updated_at.as_deref().and_then(parse_wire_timestamp),
                last_checked: Some(Utc::now()),
                scoring: record.scoring.clone(),
                enhanced_description: record.enhanced_description.clone(),
                actionable_summary: record.actionable_summary.clone(),
            };

            match existing_index {
                Some(index) => state.opportunities[index] = stored,
                None => state.opportunities.push(stored),
            }
            outcomes.push(RowWriteOutcome {
                api_opportunity_id: opportunity.api_opportunity_id.clone(),
                success: true,
                database_id: Some(id),
                error: None,
            });
        }

        Ok(outcomes)
    }

    async fn update_opportunity_fields(
        &self,
        opportunity_id: i64,
        updates: &OpportunityFieldUpdates,
    ) -> Result<(), PipelineError> {
        if self.update_deadlocks_remaining.load(Ordering::SeqCst) > 0 {
            self.update_deadlocks_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineError::deadlock("simulated 40P01"));
        }

        let mut state = self.state.lock();
        let record = state
            .opportunities
            .iter_mut()
            .find(|o| o.id == opportunity_id)
            .ok_or_else(|| PipelineError::database_error(format!("no row with id {}", opportunity_id)))?;

        if let Some(title) = &updates.title {
            record.title = title.clone();
        }
        if let Some(minimum_award) = updates.minimum_award {
            record.minimum_award = minimum_award;
        }
        if let Some(maximum_award) = updates.maximum_award {
            record.maximum_award = maximum_award;
        }
        if let Some(total) = updates.total_funding_available {
            record.total_funding_available = total;
        }
        if let Some(open_date) = updates.open_date {
            record.open_date = open_date;
        }
        if let Some(close_date) = updates.close_date {
            record.close_date = close_date;
        }
        if let Some(api_updated_at) = updates.api_updated_at {
            record.api_updated_at = api_updated_at;
        }
        record.last_checked = updates.last_checked.or(record.last_checked);
        record.updated_at = Utc::now();

        self.update_log.lock().push((opportunity_id, updates.clone()));
        Ok(())
    }

    async fn insert_raw_response(&self, raw: &RawResponse) -> Result<i64, PipelineError> {
        let mut state = self.state.lock();
        let key = (raw.source_id, raw.content_hash.clone());
        if let Some(id) = state.raw_responses.get(&key) {
            return Ok(*id);
        }
        state.next_raw_id += 1;
        let id = state.next_raw_id;
        state.raw_responses.insert(key, id);
        Ok(id)
    }

    async fn try_advisory_lock(&self, source_id: SourceId) -> Result<bool, PipelineError> {
        Ok(self.state.lock().locks.insert(source_id))
    }

    async fn release_advisory_lock(&self, source_id: SourceId) -> Result<(), PipelineError> {
        self.state.lock().locks.remove(&source_id);
        Ok(())
    }

    async fn should_force_full_reprocessing(&self, source_id: SourceId) -> Result<bool, PipelineError> {
        Ok(self
            .state
            .lock()
            .sources
            .get(&source_id)
            .map(|s| s.force_full_reprocessing)
            .unwrap_or(false))
    }

    async fn disable_force_full_reprocessing(&self, source_id: SourceId) -> Result<(), PipelineError> {
        self.disable_ffr_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(source) = self.state.lock().sources.get_mut(&source_id) {
            source.force_full_reprocessing = false;
        }
        Ok(())
    }
}

#[async_trait]
impl RunRepository for MockRepository {
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        self.state.lock().runs.push(run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.runs.iter_mut().find(|r| r.id == run.id) {
            *existing = run.clone();
        } else {
            state.runs.push(run.clone());
        }
        Ok(())
    }

    async fn upsert_stage(&self, stage: &PipelineStageRecord) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .stages
            .iter_mut()
            .find(|s| s.run_id == stage.run_id && s.stage == stage.stage)
        {
            if stage.sequence > existing.sequence {
                *existing = stage.clone();
            }
        } else {
            state.stages.push(stage.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Scripted LLM double
// ============================================================================

/// Scripted `LlmClient`: answers extraction prompts by passing the raw
/// items through, and enhancement prompts by echoing per-id content.
/// Failure queues inject errors ahead of the scripted response.
#[derive(Default)]
pub struct MockLlm {
    /// Errors returned (in order) by upcoming extraction calls
    pub extraction_failures: Mutex<VecDeque<PipelineError>>,
    /// Errors returned (in order) by upcoming enhancement calls
    pub enhancement_failures: Mutex<VecDeque<PipelineError>>,
    total_tokens: AtomicU64,
    total_calls: AtomicU64,
    /// Batch size advertised by `calculate_optimal_batch_size`
    pub batch_size: usize,
}

impl MockLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batch_size: 4,
            ..Self::default()
        })
    }

    pub fn with_batch_size(batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            batch_size,
            ..Self::default()
        })
    }

    pub fn queue_enhancement_failure(&self, error: PipelineError) {
        self.enhancement_failures.lock().push_back(error);
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn call_with_schema(
        &self,
        prompt: &str,
        _schema: &serde_json::Value,
        _options: SchemaCallOptions,
    ) -> Result<SchemaCallResult, PipelineError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(items) = raw_items_from_prompt(prompt) {
            if let Some(error) = self.extraction_failures.lock().pop_front() {
                return Err(error);
            }
            let tokens = 100 * items.len() as u64;
            self.total_tokens.fetch_add(tokens, Ordering::SeqCst);
            return Ok(SchemaCallResult {
                data: json!({ "opportunities": items }),
                tokens,
            });
        }

        if let Some(refs) = opportunity_refs_from_prompt(prompt) {
            if let Some(error) = self.enhancement_failures.lock().pop_front() {
                return Err(error);
            }
            let enhancements: Vec<serde_json::Value> = refs
                .iter()
                .map(|item| {
                    json!({
                        "id": item["id"],
                        "enhancedDescription": format!("Enhanced: {}", item["title"].as_str().unwrap_or("")),
                        "actionableSummary": "Apply before the close date.",
                    })
                })
                .collect();
            let tokens = 50 * refs.len() as u64;
            self.total_tokens.fetch_add(tokens, Ordering::SeqCst);
            return Ok(SchemaCallResult {
                data: json!({ "enhancements": enhancements }),
                tokens,
            });
        }

        Err(PipelineError::extraction_parse("unrecognized prompt shape"))
    }

    fn get_performance_metrics(&self) -> LlmPerformanceMetrics {
        LlmPerformanceMetrics {
            total_tokens: self.total_tokens.load(Ordering::SeqCst),
            total_calls: self.total_calls.load(Ordering::SeqCst),
        }
    }

    fn calculate_optimal_batch_size(&self, avg_char_len: usize) -> BatchSizeHint {
        BatchSizeHint {
            batch_size: self.batch_size.max(1),
            max_tokens: 2000,
            model_capacity: 8192,
            tokens_per_opportunity: 300 + (avg_char_len / 4) as u32,
            base_tokens: 400,
            model_name: "mock-structured-model".to_string(),
            reason: "scripted".to_string(),
        }
    }
}

// ============================================================================
// Fetcher double
// ============================================================================

/// Scripted `SourceFetcher` returning fixed items, optionally slowly.
pub struct MockFetcher {
    pub items: Mutex<Vec<serde_json::Value>>,
    pub delay: Duration,
}

impl MockFetcher {
    pub fn new(items: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(items: Vec<serde_json::Value>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            delay,
        })
    }

    pub fn set_items(&self, items: Vec<serde_json::Value>) {
        *self.items.lock() = items;
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch_raw_items(&self, source: &ApiSource) -> Result<FetchedPayload, PipelineError> {
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        let items = self.items.lock().clone();
        Ok(FetchedPayload {
            payload: serde_json::Value::Array(items.clone()),
            items,
            endpoint: source.endpoint.url.clone(),
            call_type: ApiCallType::List,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A high-relevance raw item: survives the quality filter.
pub fn hot_item(id: &str) -> serde_json::Value {
    json!({
        "api_opportunity_id": id,
        "title": format!("Municipal Building Retrofit Grant {}", id),
        "description": "Funding for energy efficiency retrofits of municipal facilities.",
        "total_funding_available": 60_000_000.0,
        "minimum_award": 250_000.0,
        "maximum_award": 4_000_000.0,
        "open_date": "2024-01-15",
        "close_date": "2024-12-31",
        "eligible_applicants": ["local government", "county"],
        "eligible_project_types": ["energy efficiency", "building retrofit"],
        "eligible_activities": ["construction", "installation"],
        "funding_type": "grant",
        "api_updated_at": "2024-06-01T00:00:00Z",
    })
}

/// A no-relevance raw item: excluded by the quality filter (all three core
/// categories score zero).
pub fn weak_item(id: &str) -> serde_json::Value {
    json!({
        "api_opportunity_id": id,
        "title": format!("Individual Research Fellowship {}", id),
        "description": "Stipends for individual researchers.",
        "total_funding_available": 200_000.0,
        "maximum_award": 25_000.0,
        "eligible_applicants": ["individuals"],
        "eligible_project_types": ["research"],
        "eligible_activities": ["research"],
        "funding_type": "loan",
        "api_updated_at": "2024-06-01T00:00:00Z",
    })
}

/// A seeded source descriptor.
pub fn test_source() -> ApiSource {
    ApiSource::new(
        SourceId::new(),
        "State Grants Portal",
        SourceEndpoint::new("https://api.grants.example.gov/v1/opportunities"),
    )
}

/// Wires a coordinator from the doubles with fast retry settings.
///
/// Also installs the tracing subscriber so pipeline log output is visible
/// under `RUST_LOG` while the suite runs.
pub fn build_coordinator(
    repository: Arc<MockRepository>,
    fetcher: Arc<MockFetcher>,
    llm: Arc<MockLlm>,
) -> PipelineCoordinator {
    ingest_pipeline_bootstrap::init_tracing();
    let extraction_config = ExtractionConfig {
        retry_delay_ms: 1,
        ..ExtractionConfig::default()
    };
    let analysis_config = AnalysisConfig {
        batch_delay_ms: 1,
        ..AnalysisConfig::default()
    };
    PipelineCoordinator::new(
        repository.clone(),
        repository,
        fetcher,
        llm,
        extraction_config,
        analysis_config,
        "Extract funding opportunities relevant to public-sector facility owners.",
    )
}
