// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain entities for the ingestion pipeline.
//!
//! Entities with identity and lifecycle: sources, opportunity records,
//! captured raw responses, pipeline runs with their stage rows, and the
//! per-opportunity path trace the coordinator emits.

pub mod opportunity;
pub mod opportunity_path;
pub mod pipeline_run;
pub mod raw_response;
pub mod source;

pub use opportunity::{AnalyzedOpportunity, ApiOpportunity, OpportunityScoring, StoredOpportunity};
pub use opportunity_path::{
    DetectionConfidence, DetectionMethod, FinalOutcome, OpportunityPath, PathAnalytics, PathReason, PathType,
};
pub use pipeline_run::{PipelineRun, PipelineStageRecord, RunStatus, StageName, StageStatus};
pub use raw_response::{ApiCallType, RawResponse, RawResponseMetadata};
pub use source::{ApiSource, SourceConfiguration, SourceEndpoint};
