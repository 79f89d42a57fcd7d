// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Configuration
//!
//! Environment-variable configuration for the extraction and analysis
//! stages. Every recognized variable has a documented default; an
//! unparseable value logs a warning and falls back rather than failing the
//! process.
//!
//! | Variable | Default |
//! |---|---|
//! | `EXTRACTION_CHUNK_SIZE` | 8000 chars |
//! | `EXTRACTION_MEMORY_THRESHOLD_MB` | 512 |
//! | `EXTRACTION_RETRY_DELAY_MS` | 1000 |
//! | `EXTRACTION_MAX_RETRIES` | 2 |
//! | `EXTRACTION_MAX_ANOMALOUS_RATIO` | 0.3 |
//! | `EXTRACTION_MAX_FAILED_RATIO` | 0.5 |
//! | `EXTRACTION_CONCURRENCY` | 3 |
//! | `EXTRACTION_MAX_TOKENS` | 4000 |
//! | `EXTRACTION_TEMPERATURE` | 0.2 |
//! | `ANALYSIS_BATCH_DELAY_MS` | 500 |
//! | `ANALYSIS_HIGH_SCORE_THRESHOLD` | 7.0 |
//! | `ANALYSIS_MEDIUM_SCORE_THRESHOLD` | 4.0 |

use std::time::Duration;

use tracing::warn;

/// Per-chunk LLM call timeout. Not environment-tunable.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default run-watchdog timeout, overridable per invocation.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Parses an environment variable, warning and defaulting on bad values.
fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = name, value = %raw, "unparseable environment value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Settings for the extraction engine.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionConfig {
    /// Character budget per LLM chunk
    pub chunk_size: usize,
    /// Raw-payload size above which the chunk budget is halved
    pub memory_threshold_mb: u64,
    /// Delay between retries of one chunk
    pub retry_delay_ms: u64,
    /// Retries per chunk beyond the first attempt
    pub max_retries: u32,
    /// Circuit-breaker threshold on anomalous-chunk ratio
    pub max_anomalous_ratio: f64,
    /// Circuit-breaker threshold on failed-chunk ratio
    pub max_failed_ratio: f64,
    /// Chunks in flight at once
    pub concurrency: usize,
    /// Token budget per chunk call
    pub max_tokens: u32,
    /// Starting temperature; reduced 0.05 per retry
    pub temperature: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8000,
            memory_threshold_mb: 512,
            retry_delay_ms: 1000,
            max_retries: 2,
            max_anomalous_ratio: 0.3,
            max_failed_ratio: 0.5,
            concurrency: 3,
            max_tokens: 4000,
            temperature: 0.2,
        }
    }
}

impl ExtractionConfig {
    /// Reads the extraction settings from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: env_parse("EXTRACTION_CHUNK_SIZE", defaults.chunk_size),
            memory_threshold_mb: env_parse("EXTRACTION_MEMORY_THRESHOLD_MB", defaults.memory_threshold_mb),
            retry_delay_ms: env_parse("EXTRACTION_RETRY_DELAY_MS", defaults.retry_delay_ms),
            max_retries: env_parse("EXTRACTION_MAX_RETRIES", defaults.max_retries),
            max_anomalous_ratio: env_parse("EXTRACTION_MAX_ANOMALOUS_RATIO", defaults.max_anomalous_ratio),
            max_failed_ratio: env_parse("EXTRACTION_MAX_FAILED_RATIO", defaults.max_failed_ratio),
            concurrency: env_parse("EXTRACTION_CONCURRENCY", defaults.concurrency).max(1),
            max_tokens: env_parse("EXTRACTION_MAX_TOKENS", defaults.max_tokens),
            temperature: env_parse("EXTRACTION_TEMPERATURE", defaults.temperature),
        }
    }
}

/// Settings for the analysis engine.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisConfig {
    /// Delay between serial-fallback enhancement calls
    pub batch_delay_ms: u64,
    /// Final-score threshold for the "high" distribution bucket
    pub high_score_threshold: f64,
    /// Final-score threshold for the "medium" distribution bucket
    pub medium_score_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 500,
            high_score_threshold: 7.0,
            medium_score_threshold: 4.0,
        }
    }
}

impl AnalysisConfig {
    /// Reads the analysis settings from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_delay_ms: env_parse("ANALYSIS_BATCH_DELAY_MS", defaults.batch_delay_ms),
            high_score_threshold: env_parse("ANALYSIS_HIGH_SCORE_THRESHOLD", defaults.high_score_threshold),
            medium_score_threshold: env_parse("ANALYSIS_MEDIUM_SCORE_THRESHOLD", defaults.medium_score_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documentation() {
        let extraction = ExtractionConfig::default();
        assert_eq!(extraction.chunk_size, 8000);
        assert_eq!(extraction.max_retries, 2);
        assert_eq!(extraction.max_failed_ratio, 0.5);
        assert_eq!(extraction.max_anomalous_ratio, 0.3);

        let analysis = AnalysisConfig::default();
        assert_eq!(analysis.batch_delay_ms, 500);
        assert_eq!(analysis.high_score_threshold, 7.0);
    }

    #[test]
    fn test_env_parse_uses_default_when_unset() {
        assert_eq!(env_parse("INGEST_TEST_UNSET_VARIABLE", 42u32), 42);
    }

    #[test]
    fn test_env_parse_reads_valid_value() {
        std::env::set_var("INGEST_TEST_VALID_VARIABLE", "17");
        assert_eq!(env_parse("INGEST_TEST_VALID_VARIABLE", 42u32), 17);
        std::env::remove_var("INGEST_TEST_VALID_VARIABLE");
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("INGEST_TEST_GARBAGE_VARIABLE", "not-a-number");
        assert_eq!(env_parse("INGEST_TEST_GARBAGE_VARIABLE", 42u32), 42);
        std::env::remove_var("INGEST_TEST_GARBAGE_VARIABLE");
    }

    #[test]
    fn test_concurrency_floor_is_one() {
        std::env::set_var("EXTRACTION_CONCURRENCY", "0");
        let config = ExtractionConfig::from_env();
        assert_eq!(config.concurrency, 1);
        std::env::remove_var("EXTRACTION_CONCURRENCY");
    }
}
