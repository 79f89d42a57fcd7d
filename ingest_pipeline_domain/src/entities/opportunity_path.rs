// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Opportunity Path Trace
//!
//! One [`OpportunityPath`] exists for every opportunity extracted in a run -
//! no more, no less. The path records how the routing decision was made
//! (NEW / UPDATE / SKIP and why), which stages the record actually
//! traversed, and where it ended up.
//!
//! `stages_processed` lists only stages the opportunity genuinely passed
//! through, in execution order, with one deliberate exception: under force
//! full reprocessing the duplicate detector appears as a bypassed node, so
//! consumers can see the stage was skipped rather than never reached.

use serde::{Deserialize, Serialize};

use crate::entities::pipeline_run::StageName;

/// Routing classification for one opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathType {
    New,
    Update,
    Skip,
}

impl std::fmt::Display for PathType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathType::New => write!(f, "NEW"),
            PathType::Update => write!(f, "UPDATE"),
            PathType::Skip => write!(f, "SKIP"),
        }
    }
}

/// Why the routing decision came out the way it did.
///
/// `material_changes` and `exact_duplicate` are retained for wire
/// compatibility with earlier pipeline versions; the current detector emits
/// the freshness-matrix reasons plus `no_critical_changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathReason {
    NoDuplicateFound,
    ForceFullProcessing,
    ApiTimestampNewer,
    NoApiTimestampCheckFields,
    MaterialChanges,
    ExactDuplicate,
    ApiTimestampNotNewer,
    NoCriticalChanges,
}

impl std::fmt::Display for PathReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PathReason::NoDuplicateFound => "no_duplicate_found",
            PathReason::ForceFullProcessing => "force_full_processing",
            PathReason::ApiTimestampNewer => "api_timestamp_newer",
            PathReason::NoApiTimestampCheckFields => "no_api_timestamp_check_fields",
            PathReason::MaterialChanges => "material_changes",
            PathReason::ExactDuplicate => "exact_duplicate",
            PathReason::ApiTimestampNotNewer => "api_timestamp_not_newer",
            PathReason::NoCriticalChanges => "no_critical_changes",
        };
        write!(f, "{}", s)
    }
}

/// Terminal disposition of one opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalOutcome {
    Stored,
    Updated,
    Skipped,
    FilteredOut,
}

/// How the duplicate detector matched this record against the system of
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    IdValidation,
    TitleOnly,
    NoMatch,
}

/// Confidence in the detection decision.
///
/// ID-validated matches and clean misses are high confidence; title-only
/// matches are medium because titles collide across programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionConfidence {
    High,
    Medium,
}

/// Detection flags attached to a path for analytics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathAnalytics {
    pub detection_method: Option<DetectionMethod>,
    pub confidence: Option<DetectionConfidence>,
    /// True when the record skipped the expensive LLM analysis stage
    pub bypassed_llm: bool,
    /// Persistence error for this record, when its write failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error: Option<String>,
}

/// Per-opportunity trace emitted in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityPath {
    pub api_opportunity_id: String,
    pub title: String,
    pub path_type: PathType,
    pub path_reason: PathReason,
    pub stages_processed: Vec<StageName>,
    pub final_outcome: FinalOutcome,
    pub analytics: PathAnalytics,
}

impl OpportunityPath {
    /// Appends a stage to the trace if it is not already the last entry
    pub fn record_stage(&mut self, stage: StageName) {
        if self.stages_processed.last() != Some(&stage) {
            self.stages_processed.push(stage);
        }
    }
}
