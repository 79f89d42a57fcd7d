// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Detection and Direct-Update Integration Tests
//!
//! The UPDATE/SKIP routing scenarios: timestamp-newer updates, updates
//! without a usable timestamp, skips on unchanged critical fields, id
//! validation fallback, and the field-scoped write the UPDATE path issues.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{build_coordinator, hot_item, test_source, MockFetcher, MockLlm, MockRepository};
use ingest_pipeline::application::report::ReportStatus;
use ingest_pipeline::application::stages::duplicate_detector::EarlyDuplicateDetector;
use ingest_pipeline::{ApiOpportunity, PathReason, PathType, ProcessSourceOptions};
use ingest_pipeline_domain::{DetectionConfidence, DetectionMethod, FinalOutcome, StageName};

async fn seeded(items: Vec<serde_json::Value>) -> (Arc<MockRepository>, ingest_pipeline_domain::ApiSource) {
    let repository = MockRepository::new();
    let source = test_source();
    repository.seed_source(source.clone());

    let coordinator = build_coordinator(repository.clone(), MockFetcher::new(items), MockLlm::new());
    let report = coordinator.process_source(source.id, ProcessSourceOptions::default()).await;
    assert_eq!(report.status, ReportStatus::Success);
    (repository, source)
}

fn opportunity_from(item: &serde_json::Value) -> ApiOpportunity {
    serde_json::from_value(item.clone()).unwrap()
}

/// Scenario: same id and title, newer timestamp, changed close date -
/// UPDATE with `api_timestamp_newer`, and the write touches only the
/// changed field plus the bookkeeping timestamps.
#[tokio::test]
async fn test_update_via_newer_timestamp_and_field_change() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;

    let mut changed = hot_item("HOT-1");
    changed["close_date"] = serde_json::json!("2025-01-15");
    changed["api_updated_at"] = serde_json::json!("2024-06-02T00:00:00Z");

    let coordinator = build_coordinator(
        repository.clone(),
        MockFetcher::new(vec![changed]),
        MockLlm::new(),
    );
    let report = coordinator.process_source(source.id, ProcessSourceOptions::default()).await;
    assert_eq!(report.status, ReportStatus::Success);

    let path = &report.enhanced_metrics.opportunity_paths[0];
    assert_eq!(path.path_type, PathType::Update);
    assert_eq!(path.path_reason, PathReason::ApiTimestampNewer);
    assert_eq!(path.final_outcome, FinalOutcome::Updated);
    assert!(path.stages_processed.contains(&StageName::DirectUpdate));
    assert!(!path.stages_processed.contains(&StageName::Analysis));
    assert_eq!(path.analytics.detection_method, Some(DetectionMethod::IdValidation));
    assert!(path.analytics.bypassed_llm);

    // Field-scoped write: close_date plus timestamps, nothing else
    let update_log = repository.update_log.lock().clone();
    assert_eq!(update_log.len(), 1);
    let (_, updates) = &update_log[0];
    assert_eq!(updates.touched_fields(), vec!["close_date"]);
    assert!(updates.api_updated_at.is_some());
    assert!(updates.last_checked.is_some());

    let stored = repository.stored_by_api_id("HOT-1").unwrap();
    assert_eq!(
        stored.close_date,
        ingest_pipeline_domain::services::change_detector::parse_wire_date("2025-01-15")
    );
    // Untouched critical fields survive
    assert_eq!(stored.total_funding_available, Some(60_000_000.0));

    assert_eq!(report.enhanced_metrics.optimization_impact.bypassed_llm, 1);
    assert_eq!(report.enhanced_metrics.optimization_impact.successful_opportunities, 1);
}

/// Scenario: missing API timestamp with a changed field - UPDATE with
/// `no_api_timestamp_check_fields`.
#[tokio::test]
async fn test_update_without_timestamp_falls_back_to_field_check() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;

    let mut changed = hot_item("HOT-1");
    changed["close_date"] = serde_json::json!("2025-01-15");
    changed.as_object_mut().unwrap().remove("api_updated_at");

    let coordinator = build_coordinator(
        repository.clone(),
        MockFetcher::new(vec![changed]),
        MockLlm::new(),
    );
    let report = coordinator.process_source(source.id, ProcessSourceOptions::default()).await;
    assert_eq!(report.status, ReportStatus::Success);

    let path = &report.enhanced_metrics.opportunity_paths[0];
    assert_eq!(path.path_type, PathType::Update);
    assert_eq!(path.path_reason, PathReason::NoApiTimestampCheckFields);
}

/// Scenario: only non-critical wording changed - SKIP with
/// `no_critical_changes`, nothing written.
#[tokio::test]
async fn test_skip_when_only_description_changes() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;

    let mut reworded = hot_item("HOT-1");
    reworded["description"] = serde_json::json!("Funding for energy efficiency retrofits (updated wording).");
    reworded.as_object_mut().unwrap().remove("api_updated_at");

    let coordinator = build_coordinator(
        repository.clone(),
        MockFetcher::new(vec![reworded]),
        MockLlm::new(),
    );
    let report = coordinator.process_source(source.id, ProcessSourceOptions::default()).await;
    assert_eq!(report.status, ReportStatus::Success);

    let path = &report.enhanced_metrics.opportunity_paths[0];
    assert_eq!(path.path_type, PathType::Skip);
    assert_eq!(path.path_reason, PathReason::NoCriticalChanges);
    assert_eq!(path.final_outcome, FinalOutcome::Skipped);
    assert!(repository.update_log.lock().is_empty());
}

/// Formatting noise in critical fields must not trigger UPDATE: trailing
/// whitespace in the title, `.000Z` on dates, identical amounts.
#[tokio::test]
async fn test_normalization_noise_does_not_trigger_update() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;

    let mut noisy = hot_item("HOT-1");
    noisy["title"] = serde_json::json!("  Municipal Building Retrofit Grant HOT-1  ");
    noisy["close_date"] = serde_json::json!("2024-12-31T00:00:00.000Z");
    noisy["open_date"] = serde_json::json!("2024-01-15T00:00:00Z");
    noisy.as_object_mut().unwrap().remove("api_updated_at");

    let coordinator = build_coordinator(
        repository.clone(),
        MockFetcher::new(vec![noisy]),
        MockLlm::new(),
    );
    let report = coordinator.process_source(source.id, ProcessSourceOptions::default()).await;

    let path = &report.enhanced_metrics.opportunity_paths[0];
    assert_eq!(path.path_type, PathType::Skip);
    assert_eq!(path.path_reason, PathReason::NoCriticalChanges);
    assert!(repository.update_log.lock().is_empty());
}

/// An id hit whose title diverges falls through to title lookup (and,
/// finding nothing, classifies NEW): preserved id-reuse behavior.
#[tokio::test]
async fn test_id_reuse_with_divergent_title_falls_through() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;

    let detector = EarlyDuplicateDetector::new(repository.clone());
    let reused = ApiOpportunity {
        api_opportunity_id: "HOT-1".to_string(),
        title: "Completely Unrelated Broadband Initiative".to_string(),
        description: "different program".to_string(),
        ..Default::default()
    };

    let outcome = detector.detect(source.id, vec![reused]).await.unwrap();
    assert_eq!(outcome.detections[0].action, PathType::New);
    assert_eq!(outcome.detections[0].method, DetectionMethod::NoMatch);
    assert_eq!(outcome.metrics.validation_failures, 1);
    assert_eq!(outcome.metrics.detection_methods.no_match, 1);
}

/// A record without an id that matches a stored title is a medium-
/// confidence title-only duplicate.
#[tokio::test]
async fn test_title_only_match_has_medium_confidence() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;

    let detector = EarlyDuplicateDetector::new(repository.clone());
    let unidentified = {
        let mut item = opportunity_from(&hot_item("HOT-1"));
        item.api_opportunity_id = String::new();
        item
    };

    let outcome = detector.detect(source.id, vec![unidentified]).await.unwrap();
    let detection = &outcome.detections[0];
    assert_eq!(detection.method, DetectionMethod::TitleOnly);
    assert_eq!(detection.confidence, DetectionConfidence::Medium);
    // Same timestamp as stored → freshness SKIP
    assert_eq!(detection.action, PathType::Skip);
    assert_eq!(detection.reason, PathReason::ApiTimestampNotNewer);
    assert_eq!(outcome.metrics.freshness_skips, 1);
}

/// Detector metrics: bypass estimate and method counts.
#[tokio::test]
async fn test_detection_metrics_token_estimate() {
    let (repository, source) = seeded(vec![hot_item("HOT-1"), hot_item("HOT-2")]).await;

    let detector = EarlyDuplicateDetector::new(repository.clone());
    let batch = vec![
        opportunity_from(&hot_item("HOT-1")), // SKIP (timestamp not newer)
        opportunity_from(&hot_item("HOT-2")), // SKIP
        opportunity_from(&hot_item("HOT-9")), // NEW
    ];

    let outcome = detector.detect(source.id, batch).await.unwrap();
    assert_eq!(outcome.metrics.new_count, 1);
    assert_eq!(outcome.metrics.skip_count, 2);
    assert_eq!(outcome.metrics.estimated_tokens_saved, 2 * 1500);
    assert_eq!(outcome.metrics.detection_methods.id_validation, 2);
    assert_eq!(outcome.metrics.detection_methods.no_match, 1);
}

/// Deadlock on the UPDATE path is retried once and succeeds.
#[tokio::test]
async fn test_direct_update_retries_deadlock_once() {
    let (repository, source) = seeded(vec![hot_item("HOT-1")]).await;
    repository.update_deadlocks_remaining.store(1, Ordering::SeqCst);

    let mut changed = hot_item("HOT-1");
    changed["maximum_award"] = serde_json::json!(4_500_000.0);
    changed["api_updated_at"] = serde_json::json!("2024-06-02T00:00:00Z");

    let coordinator = build_coordinator(
        repository.clone(),
        MockFetcher::new(vec![changed]),
        MockLlm::new(),
    );
    let report = coordinator.process_source(source.id, ProcessSourceOptions::default()).await;
    assert_eq!(report.status, ReportStatus::Success);

    let path = &report.enhanced_metrics.opportunity_paths[0];
    assert_eq!(path.path_type, PathType::Update);
    assert!(path.analytics.write_error.is_none());

    let stored = repository.stored_by_api_id("HOT-1").unwrap();
    assert_eq!(stored.maximum_award, Some(4_500_000.0));
}
