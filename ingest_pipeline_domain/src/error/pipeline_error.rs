// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Hierarchical error type for the ingestion pipeline domain. Errors are
//! organized by failure kind so the coordinator can decide, per kind, whether
//! a failure is terminal for the run or only mutates stage metrics.
//!
//! ## Error Categories
//!
//! - **Input errors**: `InvalidInput`, `InvalidConfiguration` - malformed job
//!   payloads or settings; surfaced to the caller before any stage runs
//! - **Exclusion errors**: `ConcurrentRunInProgress` - the per-source
//!   advisory lock is held by another run; surfaced immediately
//! - **Stage errors**: `UpstreamFetch`, `ExtractionParse`, `DetectionQuery`,
//!   `AnalysisFailure` - terminal for the run in which they occur
//! - **Persistence errors**: `DatabaseError`, `DeadlockDetected`,
//!   `PartialWrite` - deadlocks are retried once; partial writes are
//!   reported in stage metrics and never fail the run
//! - **Lifecycle errors**: `TimeoutError` (watchdog fired), `Cancelled`
//!   (cooperative cancellation observed)
//! - **System errors**: `SerializationError`, `SourceNotFound`,
//!   `MetricsError`, `InternalError`
//!
//! ## Propagation Policy
//!
//! Non-terminal errors never unwind past the stage that produced them;
//! terminal errors unwind to the coordinator, which releases the advisory
//! lock, records the run error, and shapes the caller-visible report.

use thiserror::Error;

/// Domain-specific errors for the ingestion pipeline.
///
/// Each variant carries a descriptive message. Variants map one-to-one onto
/// the pipeline's error taxonomy so routing decisions (retry, report,
/// fail-fast) can be made by matching on the variant alone.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Concurrent run in progress: {0}")]
    ConcurrentRunInProgress(String),

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("Extraction parse failed: {0}")]
    ExtractionParse(String),

    #[error("Detection query failed: {0}")]
    DetectionQuery(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailure(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Deadlock detected: {0}")]
    DeadlockDetected(String),

    #[error("Partial write: {0}")]
    PartialWrite(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new concurrent-run error
    pub fn concurrent_run(msg: impl Into<String>) -> Self {
        Self::ConcurrentRunInProgress(msg.into())
    }

    /// Creates a new upstream fetch error
    pub fn upstream_fetch(msg: impl Into<String>) -> Self {
        Self::UpstreamFetch(msg.into())
    }

    /// Creates a new extraction parse error
    pub fn extraction_parse(msg: impl Into<String>) -> Self {
        Self::ExtractionParse(msg.into())
    }

    /// Creates a new detection query error
    pub fn detection_query(msg: impl Into<String>) -> Self {
        Self::DetectionQuery(msg.into())
    }

    /// Creates a new analysis failure error
    pub fn analysis_failure(msg: impl Into<String>) -> Self {
        Self::AnalysisFailure(msg.into())
    }

    /// Creates a new database error
    pub fn database_error(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    /// Creates a new deadlock error
    pub fn deadlock(msg: impl Into<String>) -> Self {
        Self::DeadlockDetected(msg.into())
    }

    /// Creates a new partial write error
    pub fn partial_write(msg: impl Into<String>) -> Self {
        Self::PartialWrite(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::TimeoutError(msg.into())
    }

    /// Creates a cancellation error
    pub fn cancelled() -> Self {
        Self::Cancelled("operation cancelled".to_string())
    }

    /// Creates a cancellation error with a message
    pub fn cancelled_with_msg(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a new metrics error
    pub fn metrics_error(msg: impl Into<String>) -> Self {
        Self::MetricsError(msg.into())
    }

    /// Checks if the error indicates a transient condition worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::UpstreamFetch(_) | PipelineError::TimeoutError(_) | PipelineError::DeadlockDetected(_)
        )
    }

    /// Checks if the error is a database deadlock
    pub fn is_deadlock(&self) -> bool {
        matches!(self, PipelineError::DeadlockDetected(_))
    }

    /// Checks if the error is terminal for the run it occurred in
    ///
    /// Partial writes are the only stage-level failures that the coordinator
    /// absorbs into metrics instead of failing the run.
    pub fn is_terminal_for_run(&self) -> bool {
        !matches!(self, PipelineError::PartialWrite(_))
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "input",
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::ConcurrentRunInProgress(_) => "exclusion",
            PipelineError::UpstreamFetch(_) => "upstream",
            PipelineError::ExtractionParse(_) => "extraction",
            PipelineError::DetectionQuery(_) => "detection",
            PipelineError::AnalysisFailure(_) => "analysis",
            PipelineError::DatabaseError(_) => "database",
            PipelineError::DeadlockDetected(_) => "database",
            PipelineError::PartialWrite(_) => "database",
            PipelineError::TimeoutError(_) => "timeout",
            PipelineError::Cancelled(_) => "cancellation",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::SourceNotFound(_) => "source",
            PipelineError::MetricsError(_) => "metrics",
            PipelineError::InternalError(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_message() {
        let err = PipelineError::detection_query("batch fetch failed");
        assert_eq!(err.to_string(), "Detection query failed: batch fetch failed");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(PipelineError::upstream_fetch("503").is_recoverable());
        assert!(PipelineError::deadlock("40P01").is_recoverable());
        assert!(!PipelineError::extraction_parse("bad schema").is_recoverable());
    }

    #[test]
    fn test_partial_write_is_not_terminal() {
        assert!(!PipelineError::partial_write("2 rows failed").is_terminal_for_run());
        assert!(PipelineError::analysis_failure("enhancement failed").is_terminal_for_run());
    }

    #[test]
    fn test_categories() {
        assert_eq!(PipelineError::deadlock("x").category(), "database");
        assert_eq!(PipelineError::cancelled().category(), "cancellation");
        assert_eq!(PipelineError::timeout("watchdog").category(), "timeout");
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PipelineError = parse_err.into();
        assert_eq!(err.category(), "serialization");
    }
}
