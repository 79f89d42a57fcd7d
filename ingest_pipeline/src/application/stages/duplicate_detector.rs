// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Early Duplicate Detector
//!
//! Classifies each extracted opportunity against the system of record as
//! NEW, UPDATE, or SKIP - before any LLM analysis money is spent. Records
//! routed away from analysis are the pipeline's main cost optimization;
//! the detector reports the estimated tokens saved.
//!
//! ## Protocol
//!
//! 1. **Batch fetch** - exactly two queries: stored records matching the
//!    distinct non-empty upstream ids, and stored records matching the
//!    distinct titles of length ≥ 10. Two in-memory maps result.
//! 2. **Validation** - an id hit is confirmed by title similarity
//!    (normalized equality, or token-Jaccard ≥ 0.8). A divergent title is
//!    suspicious - upstream id reuse - so the hit is logged as a
//!    validation failure and the record falls through to title lookup.
//! 3. **Freshness** - the four-scenario `api_updated_at` matrix; a
//!    not-newer timestamp short-circuits to SKIP.
//! 4. **Critical-field check** - the six-field change detection; any
//!    difference promotes to UPDATE (carrying the freshness reason),
//!    otherwise SKIP with `no_critical_changes`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ingest_pipeline_domain::repositories::opportunity_repository::OpportunityRepository;
use ingest_pipeline_domain::services::change_detector::{detect_critical_changes, normalize_text};
use ingest_pipeline_domain::services::freshness::{evaluate_freshness, FreshnessDecision};
use ingest_pipeline_domain::{
    ApiOpportunity, DetectionConfidence, DetectionMethod, PathReason, PathType, PipelineError, SourceId,
    StoredOpportunity,
};

/// Tokens an UPDATE/SKIP record would have cost in analysis.
const ESTIMATED_TOKENS_PER_BYPASS: u64 = 1500;

/// Minimum title length for the title-keyed batch fetch.
const MIN_TITLE_LOOKUP_LEN: usize = 10;

/// Jaccard token-overlap threshold for id-hit title validation.
const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

/// One classified opportunity.
#[derive(Debug, Clone)]
pub struct DetectedOpportunity {
    pub opportunity: ApiOpportunity,
    pub action: PathType,
    pub reason: PathReason,
    pub method: DetectionMethod,
    pub confidence: DetectionConfidence,
    /// The matched stored record, for UPDATE routing
    pub existing: Option<StoredOpportunity>,
}

/// Per-method decision counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionMethodCounts {
    pub id_validation: usize,
    pub title_only: usize,
    pub no_match: usize,
}

/// Detector timing breakdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPerformance {
    #[serde(rename = "batchFetchTime")]
    pub batch_fetch_time_ms: f64,
    #[serde(rename = "categorizationTime")]
    pub categorization_time_ms: f64,
    #[serde(rename = "avgTimePerOpportunity")]
    pub avg_time_per_opportunity_ms: f64,
}

/// Enhanced metrics emitted by the detection stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionMetrics {
    pub total_opportunities: usize,
    pub new_count: usize,
    pub update_count: usize,
    pub skip_count: usize,
    pub detection_methods: DetectionMethodCounts,
    pub validation_failures: u64,
    pub freshness_skips: u64,
    pub performance_data: DetectionPerformance,
    pub estimated_tokens_saved: u64,
    pub execution_time_ms: u64,
}

/// Result of one detection pass.
#[derive(Debug)]
pub struct DetectionOutcome {
    pub detections: Vec<DetectedOpportunity>,
    pub metrics: DetectionMetrics,
}

impl DetectionOutcome {
    /// Records classified NEW, in input order
    pub fn new_opportunities(&self) -> impl Iterator<Item = &DetectedOpportunity> {
        self.detections.iter().filter(|d| d.action == PathType::New)
    }

    /// Records classified UPDATE, in input order
    pub fn updates(&self) -> impl Iterator<Item = &DetectedOpportunity> {
        self.detections.iter().filter(|d| d.action == PathType::Update)
    }

    /// Records classified SKIP, in input order
    pub fn skips(&self) -> impl Iterator<Item = &DetectedOpportunity> {
        self.detections.iter().filter(|d| d.action == PathType::Skip)
    }
}

/// Batch duplicate classification against the system of record.
pub struct EarlyDuplicateDetector {
    repository: Arc<dyn OpportunityRepository>,
}

impl EarlyDuplicateDetector {
    /// Creates a detector over the given repository.
    pub fn new(repository: Arc<dyn OpportunityRepository>) -> Self {
        Self { repository }
    }

    /// Classifies a batch of extracted opportunities.
    ///
    /// Persistence failures during the batch fetch are terminal
    /// (`DetectionQuery`); classification itself never fails.
    pub async fn detect(
        &self,
        source_id: SourceId,
        opportunities: Vec<ApiOpportunity>,
    ) -> Result<DetectionOutcome, PipelineError> {
        let started = Instant::now();
        let total = opportunities.len();

        // Step A: batch fetch, one query per key kind
        let fetch_started = Instant::now();
        let (id_map, title_map) = self.batch_fetch(source_id, &opportunities).await?;
        let batch_fetch_time_ms = fetch_started.elapsed().as_secs_f64() * 1000.0;

        // Steps B-D: in-memory categorization
        let categorize_started = Instant::now();
        let mut detections = Vec::with_capacity(total);
        let mut metrics = DetectionMetrics {
            total_opportunities: total,
            ..DetectionMetrics::default()
        };

        for opportunity in opportunities {
            let detection = self.classify(opportunity, &id_map, &title_map, &mut metrics);
            match detection.action {
                PathType::New => metrics.new_count += 1,
                PathType::Update => metrics.update_count += 1,
                PathType::Skip => metrics.skip_count += 1,
            }
            detections.push(detection);
        }

        let categorization_time_ms = categorize_started.elapsed().as_secs_f64() * 1000.0;
        let bypassed = (metrics.update_count + metrics.skip_count) as u64;
        metrics.estimated_tokens_saved = bypassed * ESTIMATED_TOKENS_PER_BYPASS;
        metrics.performance_data = DetectionPerformance {
            batch_fetch_time_ms,
            categorization_time_ms,
            avg_time_per_opportunity_ms: if total > 0 {
                (batch_fetch_time_ms + categorization_time_ms) / total as f64
            } else {
                0.0
            },
        };
        metrics.execution_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            total,
            new = metrics.new_count,
            update = metrics.update_count,
            skip = metrics.skip_count,
            tokens_saved = metrics.estimated_tokens_saved,
            "duplicate detection complete"
        );

        Ok(DetectionOutcome { detections, metrics })
    }

    /// Runs the two keyed batch lookups and builds the in-memory maps.
    async fn batch_fetch(
        &self,
        source_id: SourceId,
        opportunities: &[ApiOpportunity],
    ) -> Result<(HashMap<String, StoredOpportunity>, HashMap<String, StoredOpportunity>), PipelineError> {
        let ids: Vec<String> = opportunities
            .iter()
            .filter(|o| o.has_api_id())
            .map(|o| o.api_opportunity_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let titles: Vec<String> = opportunities
            .iter()
            .map(|o| o.title.trim().to_string())
            .filter(|t| t.len() >= MIN_TITLE_LOOKUP_LEN)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let by_id = if ids.is_empty() {
            Vec::new()
        } else {
            self.repository
                .find_by_api_ids(source_id, &ids)
                .await
                .map_err(|e| PipelineError::detection_query(format!("id batch fetch failed: {}", e)))?
        };

        let by_title = if titles.is_empty() {
            Vec::new()
        } else {
            self.repository
                .find_by_titles(source_id, &titles)
                .await
                .map_err(|e| PipelineError::detection_query(format!("title batch fetch failed: {}", e)))?
        };

        let mut id_map = HashMap::with_capacity(by_id.len());
        for record in by_id {
            id_map.insert(record.api_opportunity_id.clone(), record);
        }

        let mut title_map = HashMap::with_capacity(by_title.len());
        for record in by_title {
            // First record wins for colliding titles; collisions are why
            // title-only matches carry medium confidence
            if let Entry::Vacant(entry) = title_map.entry(normalize_text(&record.title)) {
                entry.insert(record);
            }
        }

        Ok((id_map, title_map))
    }

    /// Steps B-D for one opportunity.
    fn classify(
        &self,
        opportunity: ApiOpportunity,
        id_map: &HashMap<String, StoredOpportunity>,
        title_map: &HashMap<String, StoredOpportunity>,
        metrics: &mut DetectionMetrics,
    ) -> DetectedOpportunity {
        // Step B: id validation, then title fallback
        let mut matched: Option<(&StoredOpportunity, DetectionMethod)> = None;

        if opportunity.has_api_id() {
            if let Some(record) = id_map.get(&opportunity.api_opportunity_id) {
                if titles_similar(&opportunity.title, &record.title) {
                    matched = Some((record, DetectionMethod::IdValidation));
                } else {
                    // Likely upstream id reuse; distrust the id hit
                    metrics.validation_failures += 1;
                    warn!(
                        api_opportunity_id = %opportunity.api_opportunity_id,
                        incoming_title = %opportunity.title,
                        stored_title = %record.title,
                        "id match with divergent title, falling back to title lookup"
                    );
                }
            }
        }

        if matched.is_none() {
            if let Some(record) = title_map.get(&normalize_text(&opportunity.title)) {
                matched = Some((record, DetectionMethod::TitleOnly));
            }
        }

        let (record, method) = match matched {
            Some(found) => found,
            None => {
                metrics.detection_methods.no_match += 1;
                return DetectedOpportunity {
                    opportunity,
                    action: PathType::New,
                    reason: PathReason::NoDuplicateFound,
                    method: DetectionMethod::NoMatch,
                    confidence: DetectionConfidence::High,
                    existing: None,
                };
            }
        };

        let confidence = match method {
            DetectionMethod::IdValidation => {
                metrics.detection_methods.id_validation += 1;
                DetectionConfidence::High
            }
            DetectionMethod::TitleOnly => {
                metrics.detection_methods.title_only += 1;
                DetectionConfidence::Medium
            }
            DetectionMethod::NoMatch => DetectionConfidence::High,
        };

        // Step C: freshness
        let freshness = evaluate_freshness(opportunity.api_updated_at.as_deref(), record.api_updated_at);
        let carried_reason = match freshness {
            FreshnessDecision::Skip(reason) => {
                metrics.freshness_skips += 1;
                return DetectedOpportunity {
                    opportunity,
                    action: PathType::Skip,
                    reason,
                    method,
                    confidence,
                    existing: Some(record.clone()),
                };
            }
            FreshnessDecision::Proceed(reason) => reason,
        };

        // Step D: critical-field change check
        let changes = detect_critical_changes(&opportunity, record);
        if changes.is_empty() {
            DetectedOpportunity {
                opportunity,
                action: PathType::Skip,
                reason: PathReason::NoCriticalChanges,
                method,
                confidence,
                existing: Some(record.clone()),
            }
        } else {
            DetectedOpportunity {
                opportunity,
                action: PathType::Update,
                reason: carried_reason,
                method,
                confidence,
                existing: Some(record.clone()),
            }
        }
    }
}

/// Title similarity: normalized equality, or token-Jaccard ≥ 0.8.
fn titles_similar(a: &str, b: &str) -> bool {
    let normalized_a = normalize_text(a);
    let normalized_b = normalize_text(b);
    if normalized_a == normalized_b {
        return true;
    }
    jaccard_similarity(&normalized_a, &normalized_b) >= TITLE_SIMILARITY_THRESHOLD
}

/// Token-set Jaccard overlap over whitespace-split words.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}
