// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Extraction Engine
//!
//! Turns raw upstream items into schema-conformant [`ApiOpportunity`]
//! records through chunked, schema-bound LLM calls.
//!
//! ## Behavior
//!
//! - Raw items are packed into chunks under a character budget (default
//!   8000 chars; halved when the whole payload exceeds the memory
//!   threshold).
//! - Each chunk is submitted with a schema-constrained prompt and retried
//!   up to the configured limit, stepping temperature down 0.05 per retry.
//!   Retry classification is an explicit sum - a chunk attempt is
//!   retryable (parse mismatch, transport failure, timeout) or terminal
//!   (cancellation) - never exception-driven control flow.
//! - Chunks run concurrently under a bounded window; each attempt carries
//!   a 30-second timeout.
//! - A circuit breaker aborts extraction when more than half the processed
//!   chunks failed outright, or more than 30% returned anomalous results
//!   (zero records from a non-empty chunk, or more records than raw items
//!   - the hallucination signature).

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ingest_pipeline_bootstrap::shutdown::CancellationToken;
use ingest_pipeline_domain::services::llm_client::{LlmClient, SchemaCallOptions};
use ingest_pipeline_domain::{ApiOpportunity, ApiSource, PipelineError};

use crate::infrastructure::config::{ExtractionConfig, CHUNK_TIMEOUT};

/// Temperature reduction applied per retry of one chunk.
const TEMPERATURE_STEP: f32 = 0.05;

/// Completed chunks required before the circuit breaker may trip early.
const CIRCUIT_MIN_SAMPLE: usize = 4;

/// Stable prompt marker preceding the chunk payload.
const RAW_ITEMS_MARKER: &str = "Raw items JSON:";

/// JSON schema for the extraction response.
static EXTRACTION_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    serde_json::json!({
        "type": "object",
        "required": ["opportunities"],
        "properties": {
            "opportunities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["title"],
                    "properties": {
                        "api_opportunity_id": {"type": "string"},
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "total_funding_available": {"type": ["number", "null"]},
                        "minimum_award": {"type": ["number", "null"]},
                        "maximum_award": {"type": ["number", "null"]},
                        "open_date": {"type": ["string", "null"]},
                        "close_date": {"type": ["string", "null"]},
                        "eligible_applicants": {"type": "array", "items": {"type": "string"}},
                        "eligible_project_types": {"type": "array", "items": {"type": "string"}},
                        "eligible_activities": {"type": "array", "items": {"type": "string"}},
                        "funding_type": {"type": ["string", "null"]},
                        "api_updated_at": {"type": ["string", "null"]}
                    }
                }
            }
        }
    })
});

/// Metrics emitted by the extraction stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetrics {
    pub total_tokens: u64,
    pub total_api_calls: u64,
    pub execution_time_ms: u64,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub chunks_anomalous: usize,
    pub retries: u64,
}

/// Result of a successful extraction pass.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub opportunities: Vec<ApiOpportunity>,
    pub metrics: ExtractionMetrics,
}

/// Per-chunk processing report.
#[derive(Debug)]
enum ChunkOutcome {
    Extracted {
        opportunities: Vec<ApiOpportunity>,
        tokens: u64,
        calls: u64,
        retries: u64,
        anomalous: bool,
    },
    Failed {
        tokens: u64,
        calls: u64,
        retries: u64,
    },
}

/// Classification of one chunk attempt.
enum AttemptOutcome {
    Ok {
        opportunities: Vec<ApiOpportunity>,
        tokens: u64,
    },
    Retryable {
        error: PipelineError,
        tokens: u64,
    },
    Terminal(PipelineError),
}

/// Chunked, schema-bound LLM extraction.
pub struct ExtractionEngine {
    llm: Arc<dyn LlmClient>,
    config: ExtractionConfig,
}

impl ExtractionEngine {
    /// Creates an engine over the given LLM client.
    pub fn new(llm: Arc<dyn LlmClient>, config: ExtractionConfig) -> Self {
        Self { llm, config }
    }

    /// Extracts opportunities from raw items.
    ///
    /// Returns an error only for terminal conditions: cancellation, or the
    /// circuit breaker tripping. Individual chunk failures within the
    /// breaker's tolerance are reported through the metrics.
    pub async fn extract(
        &self,
        raw_items: &[serde_json::Value],
        source: &ApiSource,
        processing_instructions: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let started = Instant::now();

        if raw_items.is_empty() {
            return Ok(ExtractionOutcome {
                opportunities: Vec::new(),
                metrics: ExtractionMetrics {
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    ..ExtractionMetrics::default()
                },
            });
        }

        let chunks = self.build_chunks(raw_items);
        let chunks_total = chunks.len();
        debug!(source = %source.id, chunks = chunks_total, items = raw_items.len(), "starting extraction");

        let mut opportunities = Vec::new();
        let mut metrics = ExtractionMetrics {
            chunks_total,
            ..ExtractionMetrics::default()
        };
        let mut processed = 0usize;

        let mut stream = futures::stream::iter(chunks.into_iter())
            .map(|chunk| self.process_chunk(chunk, processing_instructions, cancel))
            .buffer_unordered(self.config.concurrency);

        while let Some(outcome) = stream.next().await {
            processed += 1;
            match outcome? {
                ChunkOutcome::Extracted {
                    opportunities: mut extracted,
                    tokens,
                    calls,
                    retries,
                    anomalous,
                } => {
                    for opportunity in &mut extracted {
                        opportunity.source_id = Some(source.id);
                        opportunity.source_name = Some(source.name.clone());
                    }
                    opportunities.append(&mut extracted);
                    metrics.total_tokens += tokens;
                    metrics.total_api_calls += calls;
                    metrics.retries += retries;
                    if anomalous {
                        metrics.chunks_anomalous += 1;
                    }
                }
                ChunkOutcome::Failed { tokens, calls, retries } => {
                    metrics.chunks_failed += 1;
                    metrics.total_tokens += tokens;
                    metrics.total_api_calls += calls;
                    metrics.retries += retries;
                }
            }

            if processed >= CIRCUIT_MIN_SAMPLE {
                self.check_circuit(&metrics, processed)?;
            }
        }
        drop(stream);

        // Final evaluation covers small inputs below the early-trip sample
        self.check_circuit(&metrics, processed)?;

        metrics.execution_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            extracted = opportunities.len(),
            failed_chunks = metrics.chunks_failed,
            tokens = metrics.total_tokens,
            "extraction complete"
        );

        Ok(ExtractionOutcome { opportunities, metrics })
    }

    /// Packs raw items into chunks under the character budget.
    ///
    /// The budget halves when the total payload crosses the memory
    /// threshold. A single oversized item still gets its own chunk.
    fn build_chunks(&self, raw_items: &[serde_json::Value]) -> Vec<Vec<serde_json::Value>> {
        let serialized: Vec<String> = raw_items.iter().map(|item| item.to_string()).collect();
        let total_bytes: usize = serialized.iter().map(String::len).sum();

        let mut budget = self.config.chunk_size.max(1);
        if total_bytes as u64 > self.config.memory_threshold_mb * 1024 * 1024 {
            budget = (budget / 2).max(1);
            warn!(
                total_bytes,
                threshold_mb = self.config.memory_threshold_mb,
                "payload over memory threshold, halving chunk budget"
            );
        }

        let mut chunks = Vec::new();
        let mut current = Vec::new();
        let mut current_len = 0usize;

        for (item, item_len) in raw_items.iter().zip(serialized.iter().map(String::len)) {
            if !current.is_empty() && current_len + item_len > budget {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(item.clone());
            current_len += item_len;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Processes one chunk with bounded retries.
    async fn process_chunk(
        &self,
        chunk: Vec<serde_json::Value>,
        processing_instructions: &str,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome, PipelineError> {
        let item_count = chunk.len();
        let prompt = self.build_prompt(&chunk, processing_instructions);

        let mut tokens = 0u64;
        let mut calls = 0u64;
        let mut retries = 0u64;

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled_with_msg("extraction cancelled"));
            }
            if attempt > 0 {
                retries += 1;
                tokio::time::sleep(std::time::Duration::from_millis(self.config.retry_delay_ms)).await;
            }

            let temperature = (self.config.temperature - TEMPERATURE_STEP * attempt as f32).max(0.0);
            calls += 1;

            match self.attempt_chunk(&prompt, temperature, cancel).await {
                AttemptOutcome::Ok {
                    opportunities,
                    tokens: attempt_tokens,
                } => {
                    tokens += attempt_tokens;
                    let anomalous = (opportunities.is_empty() && item_count > 0) || opportunities.len() > item_count;
                    if anomalous {
                        warn!(
                            items = item_count,
                            extracted = opportunities.len(),
                            "anomalous extraction result for chunk"
                        );
                    }
                    return Ok(ChunkOutcome::Extracted {
                        opportunities,
                        tokens,
                        calls,
                        retries,
                        anomalous,
                    });
                }
                AttemptOutcome::Retryable {
                    error,
                    tokens: attempt_tokens,
                } => {
                    tokens += attempt_tokens;
                    warn!(attempt, error = %error, "chunk attempt failed");
                }
                AttemptOutcome::Terminal(error) => return Err(error),
            }
        }

        Ok(ChunkOutcome::Failed { tokens, calls, retries })
    }

    /// One timed, cancellable chunk attempt.
    async fn attempt_chunk(&self, prompt: &str, temperature: f32, cancel: &CancellationToken) -> AttemptOutcome {
        let options = SchemaCallOptions {
            max_tokens: self.config.max_tokens,
            temperature,
        };

        let call = self.llm.call_with_schema(prompt, &EXTRACTION_SCHEMA, options);
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return AttemptOutcome::Terminal(PipelineError::cancelled_with_msg("extraction cancelled"));
            }
            result = tokio::time::timeout(CHUNK_TIMEOUT, call) => result,
        };

        match result {
            Err(_) => AttemptOutcome::Retryable {
                error: PipelineError::timeout(format!("chunk call exceeded {:?}", CHUNK_TIMEOUT)),
                tokens: 0,
            },
            Ok(Err(error @ PipelineError::Cancelled(_))) => AttemptOutcome::Terminal(error),
            Ok(Err(error)) => AttemptOutcome::Retryable { error, tokens: 0 },
            Ok(Ok(result)) => match Self::parse_opportunities(&result.data) {
                Ok(opportunities) => AttemptOutcome::Ok {
                    opportunities,
                    tokens: result.tokens,
                },
                Err(error) => AttemptOutcome::Retryable {
                    error,
                    tokens: result.tokens,
                },
            },
        }
    }

    fn build_prompt(&self, chunk: &[serde_json::Value], processing_instructions: &str) -> String {
        format!(
            "{}\n\nExtract every funding opportunity from the raw items below into the \
             required schema. Emit one record per opportunity; do not invent records.\n\n{}\n{}",
            processing_instructions,
            RAW_ITEMS_MARKER,
            serde_json::Value::Array(chunk.to_vec())
        )
    }

    fn parse_opportunities(data: &serde_json::Value) -> Result<Vec<ApiOpportunity>, PipelineError> {
        let items = data
            .get("opportunities")
            .ok_or_else(|| PipelineError::extraction_parse("response missing 'opportunities' array"))?;
        serde_json::from_value(items.clone())
            .map_err(|e| PipelineError::extraction_parse(format!("response not schema-conformant: {}", e)))
    }

    /// Trips the circuit breaker when failure ratios are exceeded.
    fn check_circuit(&self, metrics: &ExtractionMetrics, processed: usize) -> Result<(), PipelineError> {
        if processed == 0 {
            return Ok(());
        }
        let failed_ratio = metrics.chunks_failed as f64 / processed as f64;
        let anomalous_ratio = metrics.chunks_anomalous as f64 / processed as f64;

        if failed_ratio > self.config.max_failed_ratio {
            return Err(PipelineError::extraction_parse(format!(
                "circuit breaker: {}/{} chunks failed (limit {:.0}%)",
                metrics.chunks_failed,
                processed,
                self.config.max_failed_ratio * 100.0
            )));
        }
        if anomalous_ratio > self.config.max_anomalous_ratio {
            return Err(PipelineError::extraction_parse(format!(
                "circuit breaker: {}/{} chunks anomalous (limit {:.0}%)",
                metrics.chunks_anomalous,
                processed,
                self.config.max_anomalous_ratio * 100.0
            )));
        }
        Ok(())
    }
}

/// Extracts the raw-item array back out of an extraction prompt.
///
/// Shared with test doubles, which answer extraction calls by transforming
/// the very items the prompt carries.
pub fn raw_items_from_prompt(prompt: &str) -> Option<Vec<serde_json::Value>> {
    let start = prompt.find(RAW_ITEMS_MARKER)? + RAW_ITEMS_MARKER.len();
    serde_json::from_str(prompt[start..].trim()).ok()
}
