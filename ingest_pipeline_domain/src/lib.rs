// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Ingestion Pipeline Domain
//!
//! Pure domain layer for the funding-opportunity ingestion and deduplication
//! pipeline. This crate holds the business rules that make the pipeline what
//! it is - no I/O, no database drivers, no LLM vendor SDKs.
//!
//! ## What Lives Here
//!
//! - **Entities**: sources, opportunity records (API-side and stored),
//!   raw responses, pipeline runs and stages, per-opportunity path traces
//! - **Value Objects**: typed identifiers (`RunId`, `SourceId`) and
//!   normalized funding amounts
//! - **Domain Services**: the tiered taxonomy tables, critical-field change
//!   detection, the `api_updated_at` freshness matrix, deterministic
//!   relevance scoring, and the quality-filter inclusion rule
//! - **Ports**: async traits for the persistence layer and the LLM client,
//!   implemented by the infrastructure layer and by test doubles
//!
//! ## Layering
//!
//! The application crate (`ingest-pipeline`) orchestrates these rules into
//! the staged pipeline: extraction, early duplicate detection, analysis,
//! filtering, storage, and direct updates. Everything it routes on - the
//! NEW/UPDATE/SKIP partition, the path reasons, the score formulas - is
//! decided by code in this crate, which keeps the routing logic testable
//! without a database or a network.

pub mod entities;
pub mod error;
pub mod repositories;
pub mod services;
pub mod value_objects;

// Re-export commonly used types at the crate root
pub use entities::opportunity::{AnalyzedOpportunity, ApiOpportunity, OpportunityScoring, StoredOpportunity};
pub use entities::opportunity_path::{
    DetectionConfidence, DetectionMethod, FinalOutcome, OpportunityPath, PathAnalytics, PathReason, PathType,
};
pub use entities::pipeline_run::{PipelineRun, PipelineStageRecord, RunStatus, StageName, StageStatus};
pub use entities::raw_response::{ApiCallType, RawResponse, RawResponseMetadata};
pub use entities::source::{ApiSource, SourceConfiguration, SourceEndpoint};
pub use error::pipeline_error::PipelineError;
pub use value_objects::funding_amount::FundingAmount;
pub use value_objects::run_id::RunId;
pub use value_objects::source_id::SourceId;
