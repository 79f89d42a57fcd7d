// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Direct Update Writer
//!
//! Applies field-scoped updates for opportunities the detector classified
//! UPDATE. For each candidate the writer recomputes the changed critical
//! fields (same rule as detection), then issues an UPDATE touching only
//! those fields plus `api_updated_at` and `last_checked`.
//!
//! Deadlocks are retried once with randomized 50-150 ms backoff (via the
//! shared retry policy); a record that still fails is reported failed in
//! the outcome - never terminal for the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ingest_pipeline_bootstrap::shutdown::CancellationToken;
use ingest_pipeline_domain::repositories::opportunity_repository::{OpportunityFieldUpdates, OpportunityRepository};
use ingest_pipeline_domain::services::change_detector::{detect_critical_changes, parse_wire_date, CriticalField};
use ingest_pipeline_domain::services::freshness::parse_wire_timestamp;
use ingest_pipeline_domain::{ApiOpportunity, PathReason, PipelineError, StoredOpportunity};

use crate::application::utilities::retry::retry_db_write;

/// One UPDATE-classified record with its stored counterpart.
#[derive(Debug, Clone)]
pub struct UpdateCandidate {
    pub opportunity: ApiOpportunity,
    pub existing: StoredOpportunity,
    pub reason: PathReason,
}

/// Per-record update report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDetail {
    pub api_opportunity_id: String,
    pub database_id: i64,
    pub updated_fields: Vec<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metrics emitted by the direct-update stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUpdateMetrics {
    pub total_candidates: usize,
    pub execution_time_ms: u64,
}

/// Result of one direct-update pass.
#[derive(Debug, Default)]
pub struct DirectUpdateOutcome {
    pub successful: usize,
    pub failed: usize,
    pub update_details: Vec<UpdateDetail>,
    pub metrics: DirectUpdateMetrics,
}

/// Field-scoped updates for detected duplicates with changes.
pub struct DirectUpdateWriter {
    repository: Arc<dyn OpportunityRepository>,
}

impl DirectUpdateWriter {
    /// Creates a writer over the given repository.
    pub fn new(repository: Arc<dyn OpportunityRepository>) -> Self {
        Self { repository }
    }

    /// Applies updates for all candidates.
    ///
    /// Only cancellation is surfaced as an error; per-record persistence
    /// failures are reported in the outcome.
    pub async fn apply(
        &self,
        candidates: &[UpdateCandidate],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<DirectUpdateOutcome, PipelineError> {
        let started = Instant::now();
        let mut outcome = DirectUpdateOutcome {
            metrics: DirectUpdateMetrics {
                total_candidates: candidates.len(),
                ..DirectUpdateMetrics::default()
            },
            ..DirectUpdateOutcome::default()
        };

        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled_with_msg("direct update cancelled"));
            }

            let updates = build_field_updates(&candidate.opportunity, &candidate.existing, now);
            let touched: Vec<String> = updates.touched_fields().iter().map(|f| f.to_string()).collect();

            if updates.is_empty() {
                // Changes evaporated between detection and write (another
                // writer got there first); count as success, nothing to do
                debug!(
                    database_id = candidate.existing.id,
                    "no remaining field changes, skipping update statement"
                );
                outcome.successful += 1;
                outcome.update_details.push(UpdateDetail {
                    api_opportunity_id: candidate.opportunity.api_opportunity_id.clone(),
                    database_id: candidate.existing.id,
                    updated_fields: Vec::new(),
                    success: true,
                    error: None,
                });
                continue;
            }

            let write = retry_db_write("update_opportunity_fields", || {
                self.repository.update_opportunity_fields(candidate.existing.id, &updates)
            })
            .await;

            match write {
                Ok(()) => {
                    outcome.successful += 1;
                    outcome.update_details.push(UpdateDetail {
                        api_opportunity_id: candidate.opportunity.api_opportunity_id.clone(),
                        database_id: candidate.existing.id,
                        updated_fields: touched,
                        success: true,
                        error: None,
                    });
                }
                Err(error) => {
                    warn!(database_id = candidate.existing.id, error = %error, "direct update failed");
                    outcome.failed += 1;
                    outcome.update_details.push(UpdateDetail {
                        api_opportunity_id: candidate.opportunity.api_opportunity_id.clone(),
                        database_id: candidate.existing.id,
                        updated_fields: touched,
                        success: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        outcome.metrics.execution_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            candidates = candidates.len(),
            successful = outcome.successful,
            failed = outcome.failed,
            "direct update complete"
        );
        Ok(outcome)
    }
}

/// Builds the field-scoped update set for one candidate.
///
/// Only fields the change detector flags are written, plus the two
/// bookkeeping timestamps.
fn build_field_updates(api: &ApiOpportunity, stored: &StoredOpportunity, now: DateTime<Utc>) -> OpportunityFieldUpdates {
    let mut updates = OpportunityFieldUpdates {
        last_checked: Some(now),
        ..OpportunityFieldUpdates::default()
    };

    for change in detect_critical_changes(api, stored) {
        match change.field {
            CriticalField::Title => updates.title = Some(api.title.trim().to_string()),
            CriticalField::MinimumAward => updates.minimum_award = Some(api.minimum_award),
            CriticalField::MaximumAward => updates.maximum_award = Some(api.maximum_award),
            CriticalField::TotalFundingAvailable => {
                updates.total_funding_available = Some(api.total_funding_available)
            }
            CriticalField::CloseDate => {
                updates.close_date = Some(api.close_date.as_deref().and_then(parse_wire_date))
            }
            CriticalField::OpenDate => updates.open_date = Some(api.open_date.as_deref().and_then(parse_wire_date)),
        }
    }

    if !updates.is_empty() {
        updates.api_updated_at = Some(api.api_updated_at.as_deref().and_then(parse_wire_timestamp));
    }

    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ingest_pipeline_domain::SourceId;

    fn stored() -> StoredOpportunity {
        StoredOpportunity {
            id: 7,
            source_id: SourceId::new(),
            api_opportunity_id: "GRANT-7".to_string(),
            title: "Water Infrastructure Grant".to_string(),
            description: "desc".to_string(),
            total_funding_available: Some(10_000_000.0),
            minimum_award: None,
            maximum_award: Some(1_000_000.0),
            open_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            close_date: NaiveDate::from_ymd_opt(2024, 12, 31),
            eligible_applicants: vec![],
            eligible_project_types: vec![],
            eligible_activities: vec![],
            funding_type: None,
            updated_at: Utc::now(),
            api_updated_at: None,
            last_checked: None,
            scoring: None,
            enhanced_description: None,
            actionable_summary: None,
        }
    }

    #[test]
    fn test_only_changed_fields_written() {
        let api = ApiOpportunity {
            api_opportunity_id: "GRANT-7".to_string(),
            title: "Water Infrastructure Grant".to_string(),
            total_funding_available: Some(10_000_000.0),
            maximum_award: Some(1_000_000.0),
            open_date: Some("2024-03-01".to_string()),
            close_date: Some("2025-01-15".to_string()),
            api_updated_at: Some("2024-06-01T00:00:00Z".to_string()),
            ..Default::default()
        };

        let updates = build_field_updates(&api, &stored(), Utc::now());
        assert_eq!(updates.touched_fields(), vec!["close_date"]);
        assert_eq!(
            updates.close_date,
            Some(NaiveDate::from_ymd_opt(2025, 1, 15))
        );
        assert!(updates.api_updated_at.is_some());
        assert!(updates.last_checked.is_some());
        assert!(updates.title.is_none());
    }

    #[test]
    fn test_unchanged_candidate_produces_empty_update() {
        let api = ApiOpportunity {
            api_opportunity_id: "GRANT-7".to_string(),
            title: "Water Infrastructure Grant".to_string(),
            total_funding_available: Some(10_000_000.0),
            maximum_award: Some(1_000_000.0),
            open_date: Some("2024-03-01".to_string()),
            close_date: Some("2024-12-31".to_string()),
            ..Default::default()
        };

        let updates = build_field_updates(&api, &stored(), Utc::now());
        assert!(updates.is_empty());
        // Without a field write, the timestamps stay untouched too
        assert!(updates.api_updated_at.is_none());
    }
}
