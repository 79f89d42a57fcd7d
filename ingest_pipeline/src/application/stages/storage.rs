// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Writer
//!
//! Persists filtered NEW opportunities in batches. Each batch goes to the
//! repository as one transactional insert with conflict resolution on
//! `(source_id, api_opportunity_id)`; the writer collects per-row outcomes
//! and aggregate metrics.
//!
//! Failures here never fail the run: a batch that errors (after the
//! transient retry policy) marks its rows failed in the outcome and the
//! coordinator reports them through stage metrics.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ingest_pipeline_bootstrap::shutdown::CancellationToken;
use ingest_pipeline_domain::repositories::opportunity_repository::{OpportunityRepository, RowWriteOutcome};
use ingest_pipeline_domain::{AnalyzedOpportunity, PipelineError, SourceId};

use crate::application::utilities::retry::retry_db_write;

/// Rows per transactional insert batch.
const STORAGE_BATCH_SIZE: usize = 25;

/// Metrics emitted by the storage stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetrics {
    pub total_attempted: usize,
    pub successful_stores: usize,
    pub failed_stores: usize,
    pub execution_time_ms: u64,
}

/// Result of one storage pass.
#[derive(Debug, Default)]
pub struct StorageOutcome {
    pub results: Vec<RowWriteOutcome>,
    pub metrics: StorageMetrics,
}

/// Batched, transactional persistence of NEW opportunities.
pub struct StorageWriter {
    repository: Arc<dyn OpportunityRepository>,
    batch_size: usize,
}

impl StorageWriter {
    /// Creates a writer over the given repository.
    pub fn new(repository: Arc<dyn OpportunityRepository>) -> Self {
        Self {
            repository,
            batch_size: STORAGE_BATCH_SIZE,
        }
    }

    /// Overrides the batch size (mainly for tests).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stores filtered opportunities, returning per-row outcomes.
    ///
    /// Only cancellation is surfaced as an error; every persistence
    /// failure is absorbed into the outcome.
    pub async fn store(
        &self,
        source_id: SourceId,
        records: Vec<AnalyzedOpportunity>,
        cancel: &CancellationToken,
    ) -> Result<StorageOutcome, PipelineError> {
        let started = Instant::now();
        let total = records.len();
        let mut results = Vec::with_capacity(total);

        for batch in records.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled_with_msg("storage cancelled"));
            }

            let insert =
                retry_db_write("insert_opportunities", || self.repository.insert_opportunities(source_id, batch)).await;

            match insert {
                Ok(mut batch_results) => results.append(&mut batch_results),
                Err(error) => {
                    // Batch aborted and rolled back; report every row failed
                    warn!(batch = batch.len(), error = %error, "storage batch failed");
                    for record in batch {
                        results.push(RowWriteOutcome {
                            api_opportunity_id: record.opportunity.api_opportunity_id.clone(),
                            success: false,
                            database_id: None,
                            error: Some(error.to_string()),
                        });
                    }
                }
            }
        }

        let successful_stores = results.iter().filter(|r| r.success).count();
        let metrics = StorageMetrics {
            total_attempted: total,
            successful_stores,
            failed_stores: total - successful_stores,
            execution_time_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            attempted = metrics.total_attempted,
            stored = metrics.successful_stores,
            failed = metrics.failed_stores,
            "storage complete"
        );

        Ok(StorageOutcome { results, metrics })
    }
}
