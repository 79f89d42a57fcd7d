// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Instrumented LLM Client
//!
//! The pipeline-facing implementation of the `LlmClient` port. It wraps a
//! vendor transport (out of scope here; any structured-completion backend
//! satisfies [`LlmTransport`]) and adds the three concerns the pipeline
//! contracts for:
//!
//! - **Schema binding**: every call carries a JSON schema; the transport
//!   must return conformant data or a parse-kind error
//! - **Token accounting**: cumulative tokens and call counts, held in
//!   atomics so concurrent stages can share one client instance. Counters
//!   are instance-owned - stage code reads snapshots via
//!   `get_performance_metrics()` at stage boundaries rather than poking at
//!   globals.
//! - **Adaptive batch sizing**: translates a mean description length and
//!   the model's declared output capacity into an analysis batch size

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use ingest_pipeline_domain::services::llm_client::{
    BatchSizeHint, LlmClient, LlmPerformanceMetrics, SchemaCallOptions, SchemaCallResult,
};
use ingest_pipeline_domain::PipelineError;

/// Fixed per-call prompt/formatting overhead assumed by batch sizing.
const BASE_TOKENS: u32 = 400;

/// Per-opportunity response floor before description length is considered.
const TOKENS_PER_OPPORTUNITY_FLOOR: u32 = 300;

/// Ceiling on analysis batch size regardless of model capacity.
const MAX_BATCH_SIZE: usize = 10;

/// One structured-completion request to the vendor backend.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub prompt: String,
    pub schema: serde_json::Value,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// One structured-completion response from the vendor backend.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub data: serde_json::Value,
    pub tokens: u64,
}

/// Vendor transport contract.
///
/// Implementations must surface schema non-conformance as
/// `PipelineError::ExtractionParse` and transport-level failures as
/// `UpstreamFetch` or `TimeoutError`, since callers route retries on the
/// variant.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Executes one structured completion
    async fn complete_structured(&self, request: TransportRequest) -> Result<TransportResponse, PipelineError>;

    /// Model identifier, for batch-size hints and logging
    fn model_name(&self) -> &str;

    /// Declared output-token capacity of the model
    fn model_capacity(&self) -> u32;
}

/// `LlmClient` implementation with instance-owned usage counters.
pub struct InstrumentedLlmClient {
    transport: Arc<dyn LlmTransport>,
    total_tokens: AtomicU64,
    total_calls: AtomicU64,
}

impl InstrumentedLlmClient {
    /// Wraps a vendor transport
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            transport,
            total_tokens: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for InstrumentedLlmClient {
    async fn call_with_schema(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        options: SchemaCallOptions,
    ) -> Result<SchemaCallResult, PipelineError> {
        let response = self
            .transport
            .complete_structured(TransportRequest {
                prompt: prompt.to_string(),
                schema: schema.clone(),
                max_tokens: options.max_tokens,
                temperature: options.temperature,
            })
            .await?;

        self.total_tokens.fetch_add(response.tokens, Ordering::Relaxed);
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        Ok(SchemaCallResult {
            data: response.data,
            tokens: response.tokens,
        })
    }

    fn get_performance_metrics(&self) -> LlmPerformanceMetrics {
        LlmPerformanceMetrics {
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_calls: self.total_calls.load(Ordering::Relaxed),
        }
    }

    fn calculate_optimal_batch_size(&self, avg_char_len: usize) -> BatchSizeHint {
        let model_capacity = self.transport.model_capacity();
        // ~4 chars per token for the enhanced content echoed back per record
        let tokens_per_opportunity = TOKENS_PER_OPPORTUNITY_FLOOR + (avg_char_len / 4) as u32;

        let usable = model_capacity.saturating_sub(BASE_TOKENS);
        let raw_batch = (usable / tokens_per_opportunity.max(1)) as usize;
        let batch_size = raw_batch.clamp(1, MAX_BATCH_SIZE);

        let max_tokens = (BASE_TOKENS + batch_size as u32 * tokens_per_opportunity).min(model_capacity);

        let reason = if raw_batch == 0 {
            format!(
                "descriptions averaging {} chars exceed per-batch budget; forcing single-record batches",
                avg_char_len
            )
        } else if raw_batch > MAX_BATCH_SIZE {
            format!(
                "capacity allows {} records, capped at {} to bound failure blast radius",
                raw_batch, MAX_BATCH_SIZE
            )
        } else {
            format!(
                "{} records of ~{} tokens fit the {}-token capacity",
                batch_size, tokens_per_opportunity, model_capacity
            )
        };

        BatchSizeHint {
            batch_size,
            max_tokens,
            model_capacity,
            tokens_per_opportunity,
            base_tokens: BASE_TOKENS,
            model_name: self.transport.model_name().to_string(),
            reason,
        }
    }
}
