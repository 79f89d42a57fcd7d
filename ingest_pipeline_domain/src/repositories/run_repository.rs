// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Repository Port
//!
//! Persistence contract for pipeline runs and their stage rows, owned by
//! the run manager. Stage rows are keyed `(run_id, stage_name)`;
//! `upsert_stage` must keep the row with the highest `sequence`, which is
//! what makes repeated stage updates idempotent (latest write wins, stale
//! writes ignored).

use async_trait::async_trait;

use crate::entities::pipeline_run::{PipelineRun, PipelineStageRecord};
use crate::error::pipeline_error::PipelineError;

/// Persistence contract for runs and stage rows.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Inserts a new run row
    async fn insert_run(&self, run: &PipelineRun) -> Result<(), PipelineError>;

    /// Writes the current state of a run row
    async fn update_run(&self, run: &PipelineRun) -> Result<(), PipelineError>;

    /// Inserts or updates a stage row, keeping the highest sequence
    async fn upsert_stage(&self, stage: &PipelineStageRecord) -> Result<(), PipelineError>;
}
