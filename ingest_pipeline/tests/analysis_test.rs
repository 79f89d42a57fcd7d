// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Analysis Engine Integration Tests
//!
//! The scoring/enhancement barrier, adaptive batching, the serial
//! fallback on transport failure, and the fail-the-batch rule on parse
//! failure - exercised against the scripted LLM double.

mod common;

use common::{MockLlm, hot_item, weak_item};
use ingest_pipeline::application::stages::analysis::AnalysisEngine;
use ingest_pipeline::infrastructure::config::AnalysisConfig;
use ingest_pipeline::{ApiOpportunity, PipelineError};
use ingest_pipeline_bootstrap::shutdown::CancellationToken;

fn fast_config() -> AnalysisConfig {
    AnalysisConfig {
        batch_delay_ms: 1,
        ..AnalysisConfig::default()
    }
}

fn opportunities(count: usize) -> Vec<ApiOpportunity> {
    (1..=count)
        .map(|i| serde_json::from_value(hot_item(&format!("HOT-{}", i))).unwrap())
        .collect()
}

#[tokio::test]
async fn test_scoring_and_enhancement_merge() {
    let llm = MockLlm::new();
    let engine = AnalysisEngine::new(llm, fast_config());

    let outcome = engine
        .analyze(opportunities(10), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.opportunities.len(), 10);
    for analyzed in &outcome.opportunities {
        let scoring = analyzed.scoring.as_ref().expect("every record gets scoring");
        assert_eq!(scoring.client_relevance, 3);
        assert_eq!(scoring.final_score, 10.0);
        // Enhancement merged by id
        let enhanced = analyzed.enhanced_description.as_deref().unwrap();
        assert!(enhanced.starts_with("Enhanced:"));
        assert!(analyzed.actionable_summary.is_some());
    }

    assert_eq!(outcome.metrics.batch_sizing.batch_size, 4);
    assert!(outcome.metrics.total_tokens > 0);
    // 10 records at batch size 4 → 3 enhancement calls
    assert_eq!(outcome.metrics.total_api_calls, 3);
    assert_eq!(outcome.metrics.average_score, 10.0);
    assert_eq!(outcome.metrics.score_distribution.high, 10);
}

#[tokio::test]
async fn test_weak_records_score_zero_but_analyze_fine() {
    let llm = MockLlm::new();
    let engine = AnalysisEngine::new(llm, fast_config());

    let weak: Vec<ApiOpportunity> = vec![serde_json::from_value(weak_item("WEAK-1")).unwrap()];
    let outcome = engine.analyze(weak, &CancellationToken::new()).await.unwrap();

    let scoring = outcome.opportunities[0].scoring.as_ref().unwrap();
    assert_eq!(scoring.client_relevance, 0);
    assert_eq!(scoring.project_type_relevance, 0);
    assert_eq!(scoring.funding_attractiveness, 0);
    assert_eq!(outcome.metrics.score_distribution.low, 1);
}

#[tokio::test]
async fn test_transient_enhancement_failure_falls_back_to_serial() {
    let llm = MockLlm::new();
    llm.queue_enhancement_failure(PipelineError::upstream_fetch("simulated 503"));
    let engine = AnalysisEngine::new(llm, fast_config());

    let outcome = engine
        .analyze(opportunities(3), &CancellationToken::new())
        .await
        .unwrap();

    // The serial pass issues one call per record
    assert_eq!(outcome.metrics.total_api_calls, 3);
    for analyzed in &outcome.opportunities {
        assert!(analyzed.enhanced_description.is_some());
    }
}

#[tokio::test]
async fn test_parse_failure_fails_the_batch() {
    let llm = MockLlm::new();
    llm.queue_enhancement_failure(PipelineError::extraction_parse("not schema-conformant"));
    let engine = AnalysisEngine::new(llm, fast_config());

    let error = engine
        .analyze(opportunities(2), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, PipelineError::AnalysisFailure(_)));
}

#[tokio::test]
async fn test_serial_fallback_failure_propagates() {
    let llm = MockLlm::new();
    // Batched call fails transiently, then the first serial call fails too
    llm.queue_enhancement_failure(PipelineError::upstream_fetch("simulated 503"));
    llm.queue_enhancement_failure(PipelineError::upstream_fetch("still down"));
    let engine = AnalysisEngine::new(llm, fast_config());

    let error = engine
        .analyze(opportunities(2), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, PipelineError::AnalysisFailure(_)));
}

#[tokio::test]
async fn test_empty_input_returns_empty_outcome() {
    let llm = MockLlm::new();
    let engine = AnalysisEngine::new(llm, fast_config());

    let outcome = engine.analyze(Vec::new(), &CancellationToken::new()).await.unwrap();
    assert!(outcome.opportunities.is_empty());
    assert_eq!(outcome.metrics.total_api_calls, 0);
    assert_eq!(outcome.metrics.average_score, 0.0);
}

#[tokio::test]
async fn test_cancellation_stops_analysis() {
    let llm = MockLlm::new();
    let engine = AnalysisEngine::new(llm, fast_config());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = engine.analyze(opportunities(2), &cancel).await.unwrap_err();
    assert!(matches!(error, PipelineError::Cancelled(_)));
}
