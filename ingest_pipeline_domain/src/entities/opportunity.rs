// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Opportunity Records
//!
//! The three shapes an opportunity takes as it moves through the pipeline:
//!
//! - [`ApiOpportunity`] - the schema-conformant record the extraction engine
//!   produces from raw upstream items. Dates and timestamps are still in
//!   wire form (`Option<String>`) because their validity is a *decision*
//!   made later, by the freshness check and change detector.
//! - [`AnalyzedOpportunity`] - an API record joined with its deterministic
//!   scoring and LLM content enhancement, ready for filtering and storage.
//! - [`StoredOpportunity`] - the system-of-record row, with parsed dates and
//!   the derived scoring columns the storage writer persists.
//!
//! ## Critical Fields
//!
//! Exactly six fields are change-triggering for duplicates: `title`,
//! `minimum_award`, `maximum_award`, `total_funding_available`,
//! `close_date`, `open_date`. No other field difference alone promotes a
//! duplicate to UPDATE.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::source_id::SourceId;

/// An extracted, schema-conformant opportunity record (pre-database).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiOpportunity {
    /// Upstream identifier; may be empty when the source does not issue ids
    pub api_opportunity_id: String,
    pub title: String,
    pub description: String,
    pub total_funding_available: Option<f64>,
    pub minimum_award: Option<f64>,
    pub maximum_award: Option<f64>,
    /// Wire-form date (validity decided by the change detector)
    pub open_date: Option<String>,
    /// Wire-form date (validity decided by the change detector)
    pub close_date: Option<String>,
    pub eligible_applicants: Vec<String>,
    pub eligible_project_types: Vec<String>,
    pub eligible_activities: Vec<String>,
    pub funding_type: Option<String>,
    /// Wire-form timestamp (validity decided by the freshness check)
    pub api_updated_at: Option<String>,

    // Attached at ingestion, after extraction
    pub source_id: Option<SourceId>,
    pub source_name: Option<String>,
    pub raw_response_id: Option<i64>,
}

impl ApiOpportunity {
    /// Key used to join scoring and enhancement results for one record.
    ///
    /// Prefers the upstream id; falls back to the title for sources that do
    /// not issue ids.
    pub fn merge_key(&self) -> String {
        if self.api_opportunity_id.is_empty() {
            format!("title:{}", self.title.trim().to_lowercase())
        } else {
            format!("id:{}", self.api_opportunity_id)
        }
    }

    /// True when the record carries a non-empty upstream id
    pub fn has_api_id(&self) -> bool {
        !self.api_opportunity_id.trim().is_empty()
    }
}

/// Derived relevance scoring for one opportunity.
///
/// The three integer categories (`client_relevance`,
/// `project_type_relevance`, `funding_attractiveness`) each range 0..=3 and
/// drive the quality filter; the remaining fields feed the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityScoring {
    pub client_relevance: u8,
    pub project_type_relevance: u8,
    pub funding_attractiveness: u8,
    pub funding_type_score: f64,
    pub activity_multiplier: f64,
    pub base_score: f64,
    pub final_score: f64,
    pub relevance_reasoning: String,
}

impl OpportunityScoring {
    /// Number of zero-valued core categories (drives the quality filter)
    pub fn zero_category_count(&self) -> usize {
        [
            self.client_relevance,
            self.project_type_relevance,
            self.funding_attractiveness,
        ]
        .iter()
        .filter(|v| **v == 0)
        .count()
    }
}

/// An opportunity that has passed through the analysis stage.
///
/// `scoring` is optional at the type level because the quality filter's
/// first rule is "exclude when scoring is missing"; the analysis engine
/// normally guarantees a value (degrading to the zeroed fallback rather
/// than omitting it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedOpportunity {
    pub opportunity: ApiOpportunity,
    pub scoring: Option<OpportunityScoring>,
    pub enhanced_description: Option<String>,
    pub actionable_summary: Option<String>,
}

/// A persisted opportunity row from the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOpportunity {
    pub id: i64,
    pub source_id: SourceId,
    pub api_opportunity_id: String,
    pub title: String,
    pub description: String,
    pub total_funding_available: Option<f64>,
    pub minimum_award: Option<f64>,
    pub maximum_award: Option<f64>,
    pub open_date: Option<NaiveDate>,
    pub close_date: Option<NaiveDate>,
    pub eligible_applicants: Vec<String>,
    pub eligible_project_types: Vec<String>,
    pub eligible_activities: Vec<String>,
    pub funding_type: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub api_updated_at: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub scoring: Option<OpportunityScoring>,
    pub enhanced_description: Option<String>,
    pub actionable_summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_key_prefers_api_id() {
        let opp = ApiOpportunity {
            api_opportunity_id: "GRANT-42".to_string(),
            title: "Building Retrofit Program".to_string(),
            ..Default::default()
        };
        assert_eq!(opp.merge_key(), "id:GRANT-42");
    }

    #[test]
    fn test_merge_key_falls_back_to_title() {
        let opp = ApiOpportunity {
            title: "  Building Retrofit Program ".to_string(),
            ..Default::default()
        };
        assert_eq!(opp.merge_key(), "title:building retrofit program");
    }

    #[test]
    fn test_zero_category_count() {
        let scoring = OpportunityScoring {
            client_relevance: 0,
            project_type_relevance: 2,
            funding_attractiveness: 0,
            funding_type_score: 1.0,
            activity_multiplier: 1.0,
            base_score: 3.0,
            final_score: 3.0,
            relevance_reasoning: String::new(),
        };
        assert_eq!(scoring.zero_category_count(), 2);
    }

    #[test]
    fn test_deserializes_sparse_records() {
        // Extraction output routinely omits fields; serde(default) must fill them
        let opp: ApiOpportunity = serde_json::from_str(r#"{"title": "Water Grant"}"#).unwrap();
        assert_eq!(opp.title, "Water Grant");
        assert!(opp.api_opportunity_id.is_empty());
        assert!(opp.total_funding_available.is_none());
        assert!(opp.eligible_applicants.is_empty());
    }
}
