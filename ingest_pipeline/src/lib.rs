// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Pipeline
//!
//! Staged ingestion and deduplication pipeline for funding-opportunity
//! records drawn from heterogeneous remote APIs. For each configured source
//! the pipeline:
//!
//! 1. fetches paginated raw responses and captures them content-addressed,
//! 2. extracts schema-conformant opportunity records with an LLM,
//! 3. classifies each record against the system of record as NEW, UPDATE,
//!    or SKIP,
//! 4. runs analysis scoring and quality filtering on NEW records only,
//! 5. persists NEW records and applies field-scoped updates for UPDATE
//!    records, and
//! 6. emits per-stage metrics, per-opportunity path traces, and an
//!    optimization summary (how many records bypassed the expensive LLM
//!    analysis stage).
//!
//! ## Architecture
//!
//! The crate follows the workspace's layered layout:
//!
//! ### Application Layer
//! - **Pipeline Coordinator**: stage orchestration, NEW/UPDATE/SKIP
//!   routing, per-source advisory locking, force-full-reprocess handling,
//!   metrics aggregation
//! - **Run Manager**: run/stage state machine with a timeout watchdog
//! - **Stage Engines**: extraction, early duplicate detection, analysis,
//!   quality filter, storage writer, direct-update writer
//!
//! ### Infrastructure Layer
//! - **LLM client wrapper**: schema-bound calls with token accounting and
//!   adaptive batch sizing over a vendor transport
//! - **Configuration**: environment-variable settings with documented
//!   defaults
//! - **Metrics**: prometheus counters and histograms for run outcomes
//! - **Repositories**: sqlx/SQLite implementation of the domain
//!   persistence ports
//!
//! ## Concurrency Model
//!
//! Cooperative tasks with a single cancellation signal rooted at the
//! coordinator. Runs on the same source are serialized by an atomic
//! advisory lock; runs on different sources are fully concurrent. Within a
//! run, the analysis stage overlaps deterministic CPU-bound scoring with
//! LLM content enhancement and joins both at a barrier.

pub mod application;
pub mod infrastructure;

// Re-export domain types for convenient access
pub use ingest_pipeline_domain::{
    AnalyzedOpportunity, ApiOpportunity, ApiSource, OpportunityPath, PathReason, PathType, PipelineError, PipelineRun,
    RunId, SourceId, StageName,
};

pub use crate::application::report::{EnhancedMetrics, OptimizationImpact, PipelineReport, ReportStatus};
pub use crate::application::services::pipeline_coordinator::{PipelineCoordinator, ProcessSourceOptions};
