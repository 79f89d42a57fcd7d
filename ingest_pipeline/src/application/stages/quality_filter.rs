// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Quality Filter Stage
//!
//! Applies the domain inclusion rule to analyzed opportunities: exclude on
//! missing scoring, or when two of the three core category scores are
//! zero. Excluded records terminate here with outcome `filtered_out`; they
//! are deliberately not persisted, so a later run sees them as NEW again.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ingest_pipeline_domain::services::quality_filter::{inclusion_decision, ExclusionReason};
use ingest_pipeline_domain::AnalyzedOpportunity;

/// Exclusion counts by reason, under the wire keys.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExclusionReasonCounts {
    #[serde(rename = "missingScoring")]
    pub missing_scoring: usize,
    #[serde(rename = "twoZeroCategories")]
    pub two_zero_categories: usize,
}

/// Metrics emitted by the filter stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMetrics {
    pub total_analyzed: usize,
    pub included: usize,
    pub excluded: usize,
    pub exclusion_reasons: ExclusionReasonCounts,
    #[serde(rename = "processingTime")]
    pub processing_time_ms: f64,
}

/// A record excluded by the filter, with its reason.
#[derive(Debug, Clone)]
pub struct ExcludedOpportunity {
    pub opportunity: AnalyzedOpportunity,
    pub reason: ExclusionReason,
}

/// Result of one filter pass.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub included: Vec<AnalyzedOpportunity>,
    pub excluded: Vec<ExcludedOpportunity>,
    pub metrics: FilterMetrics,
}

/// Partitions analyzed opportunities by the inclusion rule.
pub fn apply_quality_filter(opportunities: Vec<AnalyzedOpportunity>) -> FilterOutcome {
    let started = Instant::now();
    let total = opportunities.len();

    let mut included = Vec::with_capacity(total);
    let mut excluded = Vec::new();
    let mut reasons = ExclusionReasonCounts::default();

    for opportunity in opportunities {
        match inclusion_decision(opportunity.scoring.as_ref()) {
            Ok(()) => included.push(opportunity),
            Err(reason) => {
                match reason {
                    ExclusionReason::MissingScoring => reasons.missing_scoring += 1,
                    ExclusionReason::TwoZeroCategories => reasons.two_zero_categories += 1,
                }
                excluded.push(ExcludedOpportunity { opportunity, reason });
            }
        }
    }

    let metrics = FilterMetrics {
        total_analyzed: total,
        included: included.len(),
        excluded: excluded.len(),
        exclusion_reasons: reasons,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    };

    debug!(
        total,
        included = metrics.included,
        excluded = metrics.excluded,
        "quality filter complete"
    );

    FilterOutcome {
        included,
        excluded,
        metrics,
    }
}
