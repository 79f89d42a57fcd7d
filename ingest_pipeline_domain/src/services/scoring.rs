// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Deterministic Relevance Scoring
//!
//! The no-I/O half of the analysis stage. For each opportunity:
//!
//! - `client_relevance` (0..=3): hottest applicant-taxonomy tier matched
//! - `project_type_relevance` (0..=3): hottest project-type tier matched
//! - `funding_attractiveness` (0..=3): dollar thresholds - 3 when total
//!   funding ≥ $50M or max award ≥ $5M; 2 at $25M / $2M; 1 at $10M / $1M
//!   or when both amounts are unknown; otherwise 0
//! - `funding_type_score` (0 | 0.5 | 1): hot/strong funding types score 1,
//!   mild 0.5, weak or unknown 0
//! - `activity_multiplier` (0.25 | 0.5 | 0.75 | 1.0): hot 1.0, strong 0.75,
//!   mild 0.5, weak 0.25; a record listing no activities keeps the neutral
//!   1.0 - absent detail must not penalize
//! - `base_score` = sum of the first four; `final_score` = base ×
//!   multiplier, rounded to one decimal
//!
//! Scoring is total: a record that defeats the scorer (panic in a
//! formula over hostile input) degrades to the zeroed fallback with a
//! manual-review reasoning string instead of sinking its batch.

use rayon::prelude::*;

use crate::entities::opportunity::{ApiOpportunity, OpportunityScoring};
use crate::services::taxonomy::{
    TaxonomyTier, ACTIVITY_TAXONOMY, APPLICANT_TAXONOMY, FUNDING_TYPE_TAXONOMY, PROJECT_TYPE_TAXONOMY,
};
use crate::value_objects::funding_amount::FundingAmount;

/// Reasoning string attached when scoring a record fails outright.
pub const FALLBACK_REASONING: &str = "Analysis failed - manual review required";

const TIER_HIGH: FundingAmount = FundingAmount::from_cents(50_000_000 * 100);
const TIER_HIGH_MAX: FundingAmount = FundingAmount::from_cents(5_000_000 * 100);
const TIER_MID: FundingAmount = FundingAmount::from_cents(25_000_000 * 100);
const TIER_MID_MAX: FundingAmount = FundingAmount::from_cents(2_000_000 * 100);
const TIER_LOW: FundingAmount = FundingAmount::from_cents(10_000_000 * 100);
const TIER_LOW_MAX: FundingAmount = FundingAmount::from_cents(1_000_000 * 100);

fn relevance_points(tier: Option<TaxonomyTier>) -> u8 {
    match tier {
        Some(TaxonomyTier::Hot) => 3,
        Some(TaxonomyTier::Strong) => 2,
        Some(TaxonomyTier::Mild) => 1,
        Some(TaxonomyTier::Weak) | None => 0,
    }
}

fn funding_type_points(tier: Option<TaxonomyTier>) -> f64 {
    match tier {
        Some(TaxonomyTier::Hot) | Some(TaxonomyTier::Strong) => 1.0,
        Some(TaxonomyTier::Mild) => 0.5,
        Some(TaxonomyTier::Weak) | None => 0.0,
    }
}

fn activity_multiplier(tier: Option<TaxonomyTier>, has_activities: bool) -> f64 {
    if !has_activities {
        return 1.0;
    }
    match tier {
        Some(TaxonomyTier::Hot) => 1.0,
        Some(TaxonomyTier::Strong) => 0.75,
        Some(TaxonomyTier::Mild) => 0.5,
        Some(TaxonomyTier::Weak) | None => 0.25,
    }
}

/// Dollar-threshold attractiveness tier.
///
/// Unknown on both sides scores 1, not 0: a source that never publishes
/// amounts should not be filtered out wholesale.
fn funding_attractiveness(total: Option<f64>, max_award: Option<f64>) -> u8 {
    if total.is_none() && max_award.is_none() {
        return 1;
    }
    let total = FundingAmount::coalesce(total);
    let max_award = FundingAmount::coalesce(max_award);
    if total >= TIER_HIGH || max_award >= TIER_HIGH_MAX {
        3
    } else if total >= TIER_MID || max_award >= TIER_MID_MAX {
        2
    } else if total >= TIER_LOW || max_award >= TIER_LOW_MAX {
        1
    } else {
        0
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Scores one opportunity against the taxonomy tables.
pub fn score_opportunity(opportunity: &ApiOpportunity) -> OpportunityScoring {
    let applicant_tier = APPLICANT_TAXONOMY.best_tier(opportunity.eligible_applicants.iter().map(String::as_str));
    let project_tier = PROJECT_TYPE_TAXONOMY.best_tier(opportunity.eligible_project_types.iter().map(String::as_str));
    let activity_tier = ACTIVITY_TAXONOMY.best_tier(opportunity.eligible_activities.iter().map(String::as_str));
    let funding_tier = opportunity
        .funding_type
        .as_deref()
        .and_then(|t| FUNDING_TYPE_TAXONOMY.term_tier(t));

    let client_relevance = relevance_points(applicant_tier);
    let project_type_relevance = relevance_points(project_tier);
    let attractiveness = funding_attractiveness(opportunity.total_funding_available, opportunity.maximum_award);
    let funding_type_score = funding_type_points(funding_tier);
    let multiplier = activity_multiplier(activity_tier, !opportunity.eligible_activities.is_empty());

    let base_score = f64::from(client_relevance) + f64::from(project_type_relevance) + f64::from(attractiveness)
        + funding_type_score;
    let final_score = round1(base_score * multiplier);

    let relevance_reasoning = build_reasoning(
        applicant_tier,
        project_tier,
        attractiveness,
        funding_tier,
        activity_tier,
        final_score,
    );

    OpportunityScoring {
        client_relevance,
        project_type_relevance,
        funding_attractiveness: attractiveness,
        funding_type_score,
        activity_multiplier: multiplier,
        base_score,
        final_score,
        relevance_reasoning,
    }
}

/// Scores a batch in parallel, degrading failed records to the fallback.
///
/// Output order matches input order. A panic while scoring one record is
/// contained to that record.
pub fn score_batch(opportunities: &[ApiOpportunity]) -> Vec<OpportunityScoring> {
    opportunities
        .par_iter()
        .map(|opportunity| {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| score_opportunity(opportunity)))
                .unwrap_or_else(|_| fallback_scoring())
        })
        .collect()
}

/// The zeroed scoring emitted when a record cannot be scored.
pub fn fallback_scoring() -> OpportunityScoring {
    OpportunityScoring {
        client_relevance: 0,
        project_type_relevance: 0,
        funding_attractiveness: 0,
        funding_type_score: 0.0,
        activity_multiplier: 1.0,
        base_score: 0.0,
        final_score: 0.0,
        relevance_reasoning: FALLBACK_REASONING.to_string(),
    }
}

fn tier_phrase(label: &str, tier: Option<TaxonomyTier>) -> String {
    match tier {
        Some(t) => format!("{} matched {} tier", label, t),
        None => format!("{} unmatched", label),
    }
}

fn build_reasoning(
    applicant_tier: Option<TaxonomyTier>,
    project_tier: Option<TaxonomyTier>,
    attractiveness: u8,
    funding_tier: Option<TaxonomyTier>,
    activity_tier: Option<TaxonomyTier>,
    final_score: f64,
) -> String {
    format!(
        "{}; {}; funding attractiveness {}/3; {}; {}; final score {:.1}",
        tier_phrase("applicants", applicant_tier),
        tier_phrase("project types", project_tier),
        attractiveness,
        tier_phrase("funding type", funding_tier),
        tier_phrase("activities", activity_tier),
        final_score
    )
}
