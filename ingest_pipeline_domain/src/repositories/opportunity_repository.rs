// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Opportunity Repository Port
//!
//! The persistence contract the pipeline holds toward the system of record.
//!
//! ## Contract Notes
//!
//! - `find_by_api_ids` / `find_by_titles` are the duplicate detector's two
//!   batch lookups - one query per key kind, never per record.
//! - `insert_opportunities` writes one batch transactionally with
//!   conflict resolution on `(source_id, api_opportunity_id)`
//!   (update-or-ignore), returning a per-row outcome either way.
//! - `update_opportunity_fields` touches only the fields named in the
//!   update set, plus `api_updated_at` and `last_checked`.
//! - `insert_raw_response` is idempotent on the content hash: re-inserting
//!   an already-captured payload returns the existing row id.
//! - `try_advisory_lock` must be atomic; it is the primitive that
//!   guarantees at most one processing run per source.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::opportunity::{AnalyzedOpportunity, StoredOpportunity};
use crate::entities::raw_response::RawResponse;
use crate::entities::source::{ApiSource, SourceConfiguration};
use crate::error::pipeline_error::PipelineError;
use crate::value_objects::source_id::SourceId;

/// Per-row result of a batch insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowWriteOutcome {
    pub api_opportunity_id: String,
    pub success: bool,
    pub database_id: Option<i64>,
    pub error: Option<String>,
}

/// Field-scoped update for one stored opportunity.
///
/// `None` leaves a column untouched; `Some(inner)` writes it, including
/// `Some(None)` to null it out. `last_checked` is always written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpportunityFieldUpdates {
    pub title: Option<String>,
    pub minimum_award: Option<Option<f64>>,
    pub maximum_award: Option<Option<f64>>,
    pub total_funding_available: Option<Option<f64>>,
    pub open_date: Option<Option<NaiveDate>>,
    pub close_date: Option<Option<NaiveDate>>,
    pub api_updated_at: Option<Option<DateTime<Utc>>>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl OpportunityFieldUpdates {
    /// True when no critical field is being written
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.minimum_award.is_none()
            && self.maximum_award.is_none()
            && self.total_funding_available.is_none()
            && self.open_date.is_none()
            && self.close_date.is_none()
    }

    /// Names of the critical fields being written, for metrics and logging
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.minimum_award.is_some() {
            fields.push("minimum_award");
        }
        if self.maximum_award.is_some() {
            fields.push("maximum_award");
        }
        if self.total_funding_available.is_some() {
            fields.push("total_funding_available");
        }
        if self.open_date.is_some() {
            fields.push("open_date");
        }
        if self.close_date.is_some() {
            fields.push("close_date");
        }
        fields
    }
}

/// Persistence contract for sources, opportunities, raw responses, and the
/// per-source coordination primitives.
#[async_trait]
pub trait OpportunityRepository: Send + Sync {
    /// Loads a source descriptor
    async fn find_source(&self, source_id: SourceId) -> Result<ApiSource, PipelineError>;

    /// Loads the per-source pipeline overrides, if any exist
    async fn find_source_configuration(
        &self,
        source_id: SourceId,
    ) -> Result<Option<SourceConfiguration>, PipelineError>;

    /// Batch lookup by upstream id
    async fn find_by_api_ids(&self, source_id: SourceId, ids: &[String]) -> Result<Vec<StoredOpportunity>, PipelineError>;

    /// Batch lookup by title
    async fn find_by_titles(
        &self,
        source_id: SourceId,
        titles: &[String],
    ) -> Result<Vec<StoredOpportunity>, PipelineError>;

    /// Transactional batch insert with conflict resolution on
    /// `(source_id, api_opportunity_id)`
    async fn insert_opportunities(
        &self,
        source_id: SourceId,
        records: &[AnalyzedOpportunity],
    ) -> Result<Vec<RowWriteOutcome>, PipelineError>;

    /// Field-scoped update of one stored opportunity
    async fn update_opportunity_fields(
        &self,
        opportunity_id: i64,
        updates: &OpportunityFieldUpdates,
    ) -> Result<(), PipelineError>;

    /// Idempotent raw-response capture; returns the row id
    async fn insert_raw_response(&self, raw: &RawResponse) -> Result<i64, PipelineError>;

    /// Attempts to take the per-source advisory lock; `false` when held
    async fn try_advisory_lock(&self, source_id: SourceId) -> Result<bool, PipelineError>;

    /// Releases the per-source advisory lock
    async fn release_advisory_lock(&self, source_id: SourceId) -> Result<(), PipelineError>;

    /// Reads the per-source force-full-reprocessing flag
    async fn should_force_full_reprocessing(&self, source_id: SourceId) -> Result<bool, PipelineError>;

    /// Clears the per-source force-full-reprocessing flag
    async fn disable_force_full_reprocessing(&self, source_id: SourceId) -> Result<(), PipelineError>;
}
