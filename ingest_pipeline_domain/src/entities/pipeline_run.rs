// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Run and Stage Entities
//!
//! A [`PipelineRun`] records one invocation of the pipeline against one
//! source: `pending → processing → {completed, failed}`. Each run owns up to
//! six [`PipelineStageRecord`] rows, one per stage, with their own
//! `pending → processing → {completed, failed}` transitions (plus
//! `cancelled`, recorded best-effort when the run token fires mid-stage).
//!
//! Stage rows carry a monotonic `sequence` so repeated updates are
//! latest-write-wins: a stale write (lower sequence) must be ignored by the
//! persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::pipeline_error::PipelineError;
use crate::value_objects::run_id::RunId;
use crate::value_objects::source_id::SourceId;

/// Lifecycle state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Processing => write!(f, "processing"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The six pipeline stages, in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    DataExtraction,
    EarlyDuplicateDetector,
    Analysis,
    Filter,
    Storage,
    DirectUpdate,
}

impl StageName {
    /// All stages in canonical order
    pub const ALL: [StageName; 6] = [
        StageName::DataExtraction,
        StageName::EarlyDuplicateDetector,
        StageName::Analysis,
        StageName::Filter,
        StageName::Storage,
        StageName::DirectUpdate,
    ];

    /// Canonical snake_case name, as persisted and reported
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::DataExtraction => "data_extraction",
            StageName::EarlyDuplicateDetector => "early_duplicate_detector",
            StageName::Analysis => "analysis",
            StageName::Filter => "filter",
            StageName::Storage => "storage",
            StageName::DirectUpdate => "direct_update",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_extraction" => Ok(StageName::DataExtraction),
            "early_duplicate_detector" => Ok(StageName::EarlyDuplicateDetector),
            "analysis" => Ok(StageName::Analysis),
            "filter" => Ok(StageName::Filter),
            "storage" => Ok(StageName::Storage),
            "direct_update" => Ok(StageName::DirectUpdate),
            _ => Err(PipelineError::invalid_input(format!("unknown stage name: {}", s))),
        }
    }
}

/// Lifecycle state of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Processing => write!(f, "processing"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Aggregate counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total_opportunities: u64,
    pub stored: u64,
    pub updated: u64,
    pub skipped: u64,
    pub filtered_out: u64,
}

/// One invocation of the pipeline against one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub source_id: SourceId,
    pub pipeline_version: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counters: RunCounters,
    pub error: Option<String>,
}

impl PipelineRun {
    /// Creates a pending run for a source
    pub fn new(source_id: SourceId, pipeline_version: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            source_id,
            pipeline_version: pipeline_version.into(),
            status: RunStatus::Pending,
            started_at,
            completed_at: None,
            counters: RunCounters::default(),
            error: None,
        }
    }

    /// Marks the run processing
    pub fn begin(&mut self) {
        self.status = RunStatus::Processing;
    }

    /// Marks the run completed
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(at);
    }

    /// Marks the run failed with an error message
    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(at);
    }
}

/// One stage row within a run.
///
/// `stage_results` is an arbitrary per-stage blob (serialized stage metrics);
/// the typed aggregate lives in the coordinator's report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStageRecord {
    pub run_id: RunId,
    pub stage: StageName,
    pub status: StageStatus,
    pub input_count: usize,
    pub output_count: usize,
    pub execution_time_ms: u64,
    pub tokens_used: u64,
    pub api_calls: u64,
    pub error_message: Option<String>,
    pub stage_results: serde_json::Value,
    /// Monotonic update sequence; persistence keeps the highest
    pub sequence: u64,
}

impl PipelineStageRecord {
    /// Creates a pending stage row
    pub fn pending(run_id: RunId, stage: StageName) -> Self {
        Self {
            run_id,
            stage,
            status: StageStatus::Pending,
            input_count: 0,
            output_count: 0,
            execution_time_ms: 0,
            tokens_used: 0,
            api_calls: 0,
            error_message: None,
            stage_results: serde_json::Value::Null,
            sequence: 0,
        }
    }
}
