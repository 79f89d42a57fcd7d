// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Service
//!
//! Prometheus counters and histograms for run-level observability. The
//! per-stage, per-run numbers live in the run report; these metrics are the
//! process-wide aggregates an operator scrapes.
//!
//! A process-global instance is exposed as [`PIPELINE_METRICS`]; embedders
//! that need an isolated registry (tests, multi-tenant processes) construct
//! their own [`MetricsService`].

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

use ingest_pipeline_domain::PipelineError;

/// Process-global metrics instance.
pub static PIPELINE_METRICS: Lazy<MetricsService> =
    Lazy::new(|| MetricsService::new().expect("default metrics registry must initialize"));

/// Prometheus metrics for the ingestion pipeline.
pub struct MetricsService {
    registry: Registry,
    runs_started_total: IntCounter,
    runs_completed_total: IntCounterVec,
    opportunities_routed_total: IntCounterVec,
    opportunities_stored_total: IntCounter,
    llm_tokens_used_total: IntCounter,
    run_duration_seconds: Histogram,
}

impl MetricsService {
    /// Creates a metrics service with its own registry.
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();

        let runs_started_total = IntCounter::with_opts(Opts::new(
            "ingest_runs_started_total",
            "Total pipeline runs started",
        ))
        .map_err(|e| PipelineError::metrics_error(format!("Failed to create runs_started_total: {}", e)))?;

        let runs_completed_total = IntCounterVec::new(
            Opts::new("ingest_runs_completed_total", "Total pipeline runs finished, by status"),
            &["status"],
        )
        .map_err(|e| PipelineError::metrics_error(format!("Failed to create runs_completed_total: {}", e)))?;

        let opportunities_routed_total = IntCounterVec::new(
            Opts::new(
                "ingest_opportunities_routed_total",
                "Opportunities routed by the duplicate detector, by path",
            ),
            &["path"],
        )
        .map_err(|e| PipelineError::metrics_error(format!("Failed to create opportunities_routed_total: {}", e)))?;

        let opportunities_stored_total = IntCounter::with_opts(Opts::new(
            "ingest_opportunities_stored_total",
            "Opportunities successfully stored",
        ))
        .map_err(|e| PipelineError::metrics_error(format!("Failed to create opportunities_stored_total: {}", e)))?;

        let llm_tokens_used_total = IntCounter::with_opts(Opts::new(
            "ingest_llm_tokens_used_total",
            "Cumulative LLM tokens consumed",
        ))
        .map_err(|e| PipelineError::metrics_error(format!("Failed to create llm_tokens_used_total: {}", e)))?;

        let run_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("ingest_run_duration_seconds", "Pipeline run wall time")
                .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0]),
        )
        .map_err(|e| PipelineError::metrics_error(format!("Failed to create run_duration_seconds: {}", e)))?;

        registry
            .register(Box::new(runs_started_total.clone()))
            .map_err(|e| PipelineError::metrics_error(format!("Failed to register runs_started_total: {}", e)))?;
        registry
            .register(Box::new(runs_completed_total.clone()))
            .map_err(|e| PipelineError::metrics_error(format!("Failed to register runs_completed_total: {}", e)))?;
        registry
            .register(Box::new(opportunities_routed_total.clone()))
            .map_err(|e| {
                PipelineError::metrics_error(format!("Failed to register opportunities_routed_total: {}", e))
            })?;
        registry
            .register(Box::new(opportunities_stored_total.clone()))
            .map_err(|e| {
                PipelineError::metrics_error(format!("Failed to register opportunities_stored_total: {}", e))
            })?;
        registry
            .register(Box::new(llm_tokens_used_total.clone()))
            .map_err(|e| PipelineError::metrics_error(format!("Failed to register llm_tokens_used_total: {}", e)))?;
        registry
            .register(Box::new(run_duration_seconds.clone()))
            .map_err(|e| PipelineError::metrics_error(format!("Failed to register run_duration_seconds: {}", e)))?;

        Ok(Self {
            registry,
            runs_started_total,
            runs_completed_total,
            opportunities_routed_total,
            opportunities_stored_total,
            llm_tokens_used_total,
            run_duration_seconds,
        })
    }

    /// The registry, for scrape endpoints
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Records a run start
    pub fn record_run_started(&self) {
        self.runs_started_total.inc();
    }

    /// Records a run finishing with the given status label
    pub fn record_run_finished(&self, status: &str, duration_secs: f64) {
        self.runs_completed_total.with_label_values(&[status]).inc();
        self.run_duration_seconds.observe(duration_secs);
    }

    /// Records routing decisions by path label
    pub fn record_routed(&self, path: &str, count: u64) {
        self.opportunities_routed_total.with_label_values(&[path]).inc_by(count);
    }

    /// Records successfully stored opportunities
    pub fn record_stored(&self, count: u64) {
        self.opportunities_stored_total.inc_by(count);
    }

    /// Records LLM token consumption
    pub fn record_tokens(&self, tokens: u64) {
        self.llm_tokens_used_total.inc_by(tokens);
    }
}
