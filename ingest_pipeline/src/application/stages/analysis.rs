// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Analysis Engine
//!
//! Enriches NEW opportunities with deterministic relevance scoring and LLM
//! content enhancement. The two halves of each batch run concurrently and
//! join at a barrier:
//!
//! - **Scoring** is pure CPU work over the taxonomy tables, executed on the
//!   blocking pool (rayon underneath) so it can never starve the LLM call.
//! - **Enhancement** is one schema-bound LLM call per batch producing an
//!   enhanced description and actionable summary per record.
//!
//! Batch size adapts to content: the LLM wrapper translates mean
//! description length and model capacity into a per-batch record count and
//! token budget.
//!
//! ## Failure Policy
//!
//! A parse/validation failure of the enhancement call fails the batch (and
//! with it the run - preserved fail-fast behavior). A transport-level
//! failure falls back to enhancing records serially with a small delay;
//! if the serial pass also fails, the error propagates. A record the
//! scorer cannot handle degrades to zeroed scores with a manual-review
//! note and never fails anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ingest_pipeline_bootstrap::shutdown::CancellationToken;
use ingest_pipeline_domain::services::llm_client::{BatchSizeHint, LlmClient, SchemaCallOptions};
use ingest_pipeline_domain::services::scoring;
use ingest_pipeline_domain::{AnalyzedOpportunity, ApiOpportunity, PipelineError};

use crate::infrastructure::config::AnalysisConfig;

/// Analysis batches in flight at once.
const BATCH_CONCURRENCY: usize = 2;

/// Stable prompt marker preceding the batch payload.
const OPPORTUNITIES_MARKER: &str = "Opportunities JSON:";

/// JSON schema for the enhancement response.
static ENHANCEMENT_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    serde_json::json!({
        "type": "object",
        "required": ["enhancements"],
        "properties": {
            "enhancements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "enhancedDescription", "actionableSummary"],
                    "properties": {
                        "id": {"type": "string"},
                        "enhancedDescription": {"type": "string"},
                        "actionableSummary": {"type": "string"}
                    }
                }
            }
        }
    })
});

/// One enhancement item in the response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnhancementItem {
    id: String,
    enhanced_description: String,
    actionable_summary: String,
}

/// Score-distribution buckets over the configured thresholds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Mean score per core category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub avg_client_relevance: f64,
    pub avg_project_type_relevance: f64,
    pub avg_funding_attractiveness: f64,
}

/// Funding-amount coverage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingStatistics {
    pub with_total_funding: usize,
    pub with_maximum_award: usize,
    pub total_funding_sum: f64,
}

/// Metrics emitted by the analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetrics {
    pub total_tokens: u64,
    pub total_api_calls: u64,
    pub execution_time_ms: u64,
    pub average_score: f64,
    pub score_distribution: ScoreDistribution,
    pub category_breakdown: CategoryBreakdown,
    pub funding_statistics: FundingStatistics,
    pub batch_sizing: BatchSizeHint,
}

/// Result of one analysis pass.
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// Analyzed records; order across batches is not guaranteed
    pub opportunities: Vec<AnalyzedOpportunity>,
    pub metrics: AnalysisMetrics,
}

/// Parallel scoring + enhancement over adaptive batches.
pub struct AnalysisEngine {
    llm: Arc<dyn LlmClient>,
    config: AnalysisConfig,
}

impl AnalysisEngine {
    /// Creates an engine over the given LLM client.
    pub fn new(llm: Arc<dyn LlmClient>, config: AnalysisConfig) -> Self {
        Self { llm, config }
    }

    /// Analyzes a batch of NEW opportunities.
    pub async fn analyze(
        &self,
        opportunities: Vec<ApiOpportunity>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let started = Instant::now();

        let avg_char_len = if opportunities.is_empty() {
            0
        } else {
            opportunities.iter().map(|o| o.description.len()).sum::<usize>() / opportunities.len()
        };
        let hint = self.llm.calculate_optimal_batch_size(avg_char_len);
        debug!(
            records = opportunities.len(),
            batch_size = hint.batch_size,
            max_tokens = hint.max_tokens,
            reason = %hint.reason,
            "starting analysis"
        );

        if opportunities.is_empty() {
            return Ok(AnalysisOutcome {
                opportunities: Vec::new(),
                metrics: Self::build_metrics(&[], 0, 0, started, hint, &self.config),
            });
        }

        let batches: Vec<Vec<ApiOpportunity>> = opportunities
            .chunks(hint.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();

        let mut analyzed = Vec::with_capacity(opportunities.len());
        let mut total_tokens = 0u64;
        let mut total_calls = 0u64;

        let max_tokens = hint.max_tokens;
        let mut stream = futures::stream::iter(batches.into_iter())
            .map(|batch| self.process_batch(batch, max_tokens, cancel))
            .buffer_unordered(BATCH_CONCURRENCY);

        while let Some(result) = stream.next().await {
            let (mut batch_analyzed, tokens, calls) = result?;
            analyzed.append(&mut batch_analyzed);
            total_tokens += tokens;
            total_calls += calls;
        }
        drop(stream);

        let metrics = Self::build_metrics(&analyzed, total_tokens, total_calls, started, hint, &self.config);
        Ok(AnalysisOutcome {
            opportunities: analyzed,
            metrics,
        })
    }

    /// Scores and enhances one batch, joining both tasks at a barrier.
    async fn process_batch(
        &self,
        batch: Vec<ApiOpportunity>,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<(Vec<AnalyzedOpportunity>, u64, u64), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::cancelled_with_msg("analysis cancelled"));
        }

        let scoring_input = batch.clone();
        let scoring_task = tokio::task::spawn_blocking(move || scoring::score_batch(&scoring_input));
        let enhancement_task = self.enhance_batch(&batch, max_tokens, cancel);

        // Barrier: the merge needs both halves
        let (scoring_result, enhancement_result) = tokio::join!(scoring_task, enhancement_task);

        let scores = scoring_result
            .map_err(|e| PipelineError::internal_error(format!("scoring task panicked: {}", e)))?;
        let (enhancements, tokens, calls) = enhancement_result?;

        let analyzed = batch
            .into_iter()
            .zip(scores.into_iter())
            .map(|(opportunity, score)| {
                let enhancement = enhancements.get(&opportunity.merge_key());
                AnalyzedOpportunity {
                    enhanced_description: enhancement.map(|e| e.enhanced_description.clone()),
                    actionable_summary: enhancement.map(|e| e.actionable_summary.clone()),
                    scoring: Some(score),
                    opportunity,
                }
            })
            .collect();

        Ok((analyzed, tokens, calls))
    }

    /// One batched enhancement call, with serial per-record fallback on
    /// transport failure.
    async fn enhance_batch(
        &self,
        batch: &[ApiOpportunity],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<(HashMap<String, EnhancementItem>, u64, u64), PipelineError> {
        match self.call_enhancement(batch, max_tokens, cancel).await {
            Ok((items, tokens)) => Ok((items, tokens, 1)),
            Err(error) if is_parse_failure(&error) => Err(PipelineError::analysis_failure(format!(
                "content enhancement response invalid: {}",
                error
            ))),
            Err(error @ PipelineError::Cancelled(_)) => Err(error),
            Err(error) => {
                warn!(error = %error, "batched enhancement failed, retrying records serially");
                self.enhance_serially(batch, max_tokens, cancel).await
            }
        }
    }

    /// Per-record serial fallback with a small delay between calls.
    async fn enhance_serially(
        &self,
        batch: &[ApiOpportunity],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<(HashMap<String, EnhancementItem>, u64, u64), PipelineError> {
        let mut merged = HashMap::new();
        let mut tokens = 0u64;
        let mut calls = 0u64;

        for opportunity in batch {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled_with_msg("analysis cancelled"));
            }
            tokio::time::sleep(std::time::Duration::from_millis(self.config.batch_delay_ms)).await;

            calls += 1;
            match self.call_enhancement(std::slice::from_ref(opportunity), max_tokens, cancel).await {
                Ok((items, item_tokens)) => {
                    tokens += item_tokens;
                    merged.extend(items);
                }
                Err(error) => {
                    return Err(PipelineError::analysis_failure(format!(
                        "serial enhancement failed for {:?}: {}",
                        opportunity.merge_key(),
                        error
                    )));
                }
            }
        }

        Ok((merged, tokens, calls))
    }

    /// Executes one enhancement call and parses the response.
    async fn call_enhancement(
        &self,
        batch: &[ApiOpportunity],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<(HashMap<String, EnhancementItem>, u64), PipelineError> {
        let prompt = build_enhancement_prompt(batch);
        let options = SchemaCallOptions {
            max_tokens,
            ..SchemaCallOptions::default()
        };

        let call = self.llm.call_with_schema(&prompt, &ENHANCEMENT_SCHEMA, options);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::cancelled_with_msg("analysis cancelled")),
            result = call => result?,
        };

        let items = result
            .data
            .get("enhancements")
            .ok_or_else(|| PipelineError::extraction_parse("response missing 'enhancements' array"))?;
        let items: Vec<EnhancementItem> = serde_json::from_value(items.clone())
            .map_err(|e| PipelineError::extraction_parse(format!("enhancement not schema-conformant: {}", e)))?;

        let mut by_key = HashMap::with_capacity(items.len());
        for item in items {
            by_key.insert(item.id.clone(), item);
        }
        Ok((by_key, result.tokens))
    }

    fn build_metrics(
        analyzed: &[AnalyzedOpportunity],
        total_tokens: u64,
        total_calls: u64,
        started: Instant,
        hint: BatchSizeHint,
        config: &AnalysisConfig,
    ) -> AnalysisMetrics {
        let mut distribution = ScoreDistribution::default();
        let mut breakdown = CategoryBreakdown::default();
        let mut funding = FundingStatistics::default();
        let mut score_sum = 0.0;

        for record in analyzed {
            if let Some(scoring) = &record.scoring {
                score_sum += scoring.final_score;
                if scoring.final_score >= config.high_score_threshold {
                    distribution.high += 1;
                } else if scoring.final_score >= config.medium_score_threshold {
                    distribution.medium += 1;
                } else {
                    distribution.low += 1;
                }
                breakdown.avg_client_relevance += f64::from(scoring.client_relevance);
                breakdown.avg_project_type_relevance += f64::from(scoring.project_type_relevance);
                breakdown.avg_funding_attractiveness += f64::from(scoring.funding_attractiveness);
            }
            if let Some(total) = record.opportunity.total_funding_available {
                funding.with_total_funding += 1;
                funding.total_funding_sum += total;
            }
            if record.opportunity.maximum_award.is_some() {
                funding.with_maximum_award += 1;
            }
        }

        let count = analyzed.len();
        if count > 0 {
            breakdown.avg_client_relevance /= count as f64;
            breakdown.avg_project_type_relevance /= count as f64;
            breakdown.avg_funding_attractiveness /= count as f64;
        }

        AnalysisMetrics {
            total_tokens,
            total_api_calls: total_calls,
            execution_time_ms: started.elapsed().as_millis() as u64,
            average_score: if count > 0 { score_sum / count as f64 } else { 0.0 },
            score_distribution: distribution,
            category_breakdown: breakdown,
            funding_statistics: funding,
            batch_sizing: hint,
        }
    }
}

/// True for failure kinds that mean the response itself was bad (fail the
/// batch) rather than the transport (retry serially).
fn is_parse_failure(error: &PipelineError) -> bool {
    matches!(
        error,
        PipelineError::ExtractionParse(_) | PipelineError::SerializationError(_)
    )
}

fn build_enhancement_prompt(batch: &[ApiOpportunity]) -> String {
    let payload: Vec<serde_json::Value> = batch
        .iter()
        .map(|o| {
            serde_json::json!({
                "id": o.merge_key(),
                "title": o.title,
                "description": o.description,
            })
        })
        .collect();
    format!(
        "Rewrite each opportunity description for a public-sector facilities audience and \
         produce a one-paragraph actionable summary. Return one enhancement per input id.\n\n{}\n{}",
        OPPORTUNITIES_MARKER,
        serde_json::Value::Array(payload)
    )
}

/// Extracts the batch payload back out of an enhancement prompt.
///
/// Shared with test doubles, which answer enhancement calls by echoing the
/// ids the prompt carries.
pub fn opportunity_refs_from_prompt(prompt: &str) -> Option<Vec<serde_json::Value>> {
    let start = prompt.find(OPPORTUNITIES_MARKER)? + OPPORTUNITIES_MARKER.len();
    serde_json::from_str(prompt[start..].trim()).ok()
}
