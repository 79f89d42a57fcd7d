// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # LLM Client Port
//!
//! The contract the pipeline holds toward its language-model client. The
//! vendor SDK lives behind this trait in the infrastructure layer; domain
//! and application code see only schema-bound calls, cumulative usage
//! metrics, and batch-size hints.
//!
//! All three operations must be safe for concurrent use - extraction runs
//! several chunks in flight and analysis overlaps with other sources' runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::pipeline_error::PipelineError;

/// Options for one schema-bound call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchemaCallOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SchemaCallOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            temperature: 0.2,
        }
    }
}

/// Result of one schema-bound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaCallResult {
    /// Payload conforming to the requested schema
    pub data: serde_json::Value,
    /// Tokens consumed by the call
    pub tokens: u64,
}

/// Cumulative usage snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmPerformanceMetrics {
    pub total_tokens: u64,
    pub total_calls: u64,
}

/// Adaptive batch-size recommendation for the analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSizeHint {
    pub batch_size: usize,
    pub max_tokens: u32,
    pub model_capacity: u32,
    pub tokens_per_opportunity: u32,
    pub base_tokens: u32,
    pub model_name: String,
    pub reason: String,
}

/// Schema-bound LLM client contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Executes one schema-constrained call.
    ///
    /// Implementations must distinguish failure kinds through the error
    /// variant: `ExtractionParse` for responses that do not conform to the
    /// schema, `UpstreamFetch`/`TimeoutError` for transport-level failures
    /// (which callers treat as retryable).
    async fn call_with_schema(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        options: SchemaCallOptions,
    ) -> Result<SchemaCallResult, PipelineError>;

    /// Snapshot of cumulative token and call counts.
    fn get_performance_metrics(&self) -> LlmPerformanceMetrics;

    /// Computes the optimal analysis batch size for the given mean
    /// description length.
    fn calculate_optimal_batch_size(&self, avg_char_len: usize) -> BatchSizeHint;
}
