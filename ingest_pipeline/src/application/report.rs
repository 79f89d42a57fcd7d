// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Report
//!
//! The typed result the coordinator returns to callers. Field names are
//! wire-stable (camelCase) because downstream consumers - dashboards,
//! queue workers, notification jobs - parse the serialized form:
//!
//! ```json
//! {
//!   "status": "success",
//!   "version": "v2.0",
//!   "pipeline": "v2-optimized-with-metrics",
//!   "enhancedMetrics": {
//!     "totalTokensUsed": 0,
//!     "totalApiCalls": 0,
//!     "totalExecutionTime": 0,
//!     "stageMetrics": {},
//!     "optimizationImpact": {},
//!     "opportunityPaths": [],
//!     "forceFullProcessingUsed": false
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use ingest_pipeline_domain::{OpportunityPath, RunId, SourceId};

use crate::application::stages::analysis::AnalysisMetrics;
use crate::application::stages::direct_update::DirectUpdateMetrics;
use crate::application::stages::duplicate_detector::DetectionMetrics;
use crate::application::stages::extraction::ExtractionMetrics;
use crate::application::stages::quality_filter::FilterMetrics;
use crate::application::stages::storage::StorageMetrics;

/// Pipeline version reported to callers.
pub const PIPELINE_VERSION: &str = "v2.0";

/// Pipeline variant name reported to callers.
pub const PIPELINE_NAME: &str = "v2-optimized-with-metrics";

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Error,
}

/// Per-stage typed metrics; stages that did not run stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetricsSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_extraction: Option<ExtractionMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_duplicate_detector: Option<DetectionMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_update: Option<DirectUpdateMetrics>,
}

/// How much expensive work the detector routed away from the LLM.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationImpact {
    pub total_opportunities: usize,
    #[serde(rename = "bypassedLLM")]
    pub bypassed_llm: usize,
    pub successful_opportunities: usize,
}

/// Aggregated run metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMetrics {
    pub total_tokens_used: u64,
    pub total_api_calls: u64,
    /// Wall time of the whole run, milliseconds
    pub total_execution_time: u64,
    pub stage_metrics: StageMetricsSet,
    pub optimization_impact: OptimizationImpact,
    pub opportunity_paths: Vec<OpportunityPath>,
    pub force_full_processing_used: bool,
}

/// The caller-visible result of one `process_source` invocation.
///
/// Shape is identical for success and error; on error `status` is
/// `error` and `error` carries a short human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub status: ReportStatus,
    pub version: String,
    pub pipeline: String,
    /// Absent when the run never started (advisory lock unavailable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub source_id: SourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enhanced_metrics: EnhancedMetrics,
}

impl PipelineReport {
    /// Starts a report skeleton for a run.
    pub fn skeleton(run_id: Option<RunId>, source_id: SourceId) -> Self {
        Self {
            status: ReportStatus::Success,
            version: PIPELINE_VERSION.to_string(),
            pipeline: PIPELINE_NAME.to_string(),
            run_id,
            source_id,
            error: None,
            enhanced_metrics: EnhancedMetrics::default(),
        }
    }

    /// Converts the report into its error form.
    pub fn into_error(mut self, message: impl Into<String>) -> Self {
        self.status = ReportStatus::Error;
        self.error = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_wire_names() {
        let report = PipelineReport::skeleton(Some(RunId::new()), SourceId::new());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["version"], "v2.0");
        assert_eq!(json["pipeline"], "v2-optimized-with-metrics");
        assert!(json["enhancedMetrics"]["totalTokensUsed"].is_number());
        assert!(json["enhancedMetrics"]["optimizationImpact"]["bypassedLLM"].is_number());
        assert!(json["enhancedMetrics"]["opportunityPaths"].is_array());
        assert_eq!(json["enhancedMetrics"]["forceFullProcessingUsed"], false);
        // Error key is omitted entirely on success
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_form() {
        let report = PipelineReport::skeleton(Some(RunId::new()), SourceId::new()).into_error("watchdog timeout");
        assert_eq!(report.status, ReportStatus::Error);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "watchdog timeout");
    }
}
