// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Quality Filter Rule
//!
//! The inclusion decision applied to analyzed opportunities before storage:
//! a record is excluded when its scoring is missing, or when at least two of
//! the three core categories (client relevance, project-type relevance,
//! funding attractiveness) scored zero. One zero category is survivable -
//! sources often under-describe one dimension - but two means the record is
//! noise for this profile.

use serde::{Deserialize, Serialize};

use crate::entities::opportunity::OpportunityScoring;

/// Number of zero core categories at which a record is excluded.
pub const ZERO_CATEGORY_LIMIT: usize = 2;

/// Why a record was excluded.
///
/// Serialized forms are the wire keys of the filter stage's
/// `exclusionReasons` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExclusionReason {
    #[serde(rename = "missingScoring")]
    MissingScoring,
    #[serde(rename = "twoZeroCategories")]
    TwoZeroCategories,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::MissingScoring => write!(f, "missingScoring"),
            ExclusionReason::TwoZeroCategories => write!(f, "twoZeroCategories"),
        }
    }
}

/// Applies the inclusion rule to one record's scoring.
///
/// Returns `Ok(())` to include, `Err(reason)` to exclude.
pub fn inclusion_decision(scoring: Option<&OpportunityScoring>) -> Result<(), ExclusionReason> {
    let scoring = scoring.ok_or(ExclusionReason::MissingScoring)?;
    if scoring.zero_category_count() >= ZERO_CATEGORY_LIMIT {
        Err(ExclusionReason::TwoZeroCategories)
    } else {
        Ok(())
    }
}
