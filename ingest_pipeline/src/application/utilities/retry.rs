// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Persistence Retry Policy
//!
//! Two retry shapes the writers share:
//!
//! - **Deadlock**: one retry after a randomized 50-150 ms backoff. A second
//!   deadlock is reported to the caller, which records the row as failed.
//! - **Transient** (connection reset, timeout): up to 3 attempts with
//!   exponential backoff, base 100 ms, factor 2, plus jitter.
//!
//! Non-retryable errors pass through on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use ingest_pipeline_domain::PipelineError;

/// Attempts for transient database errors (first try included).
pub const TRANSIENT_MAX_ATTEMPTS: u32 = 3;

/// Base backoff for transient retries.
pub const TRANSIENT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Randomized deadlock backoff window.
pub const DEADLOCK_BACKOFF_MIN_MS: u64 = 50;
pub const DEADLOCK_BACKOFF_MAX_MS: u64 = 150;

/// True for errors the transient policy retries.
fn is_transient(error: &PipelineError) -> bool {
    match error {
        PipelineError::TimeoutError(_) => true,
        PipelineError::DatabaseError(message) => {
            let lower = message.to_lowercase();
            lower.contains("connection reset")
                || lower.contains("connection closed")
                || lower.contains("timed out")
                || lower.contains("timeout")
                || lower.contains("database is locked")
        }
        _ => false,
    }
}

fn jitter_ms(max_extra: u64) -> u64 {
    rand::rng().random_range(0..=max_extra)
}

/// Runs an operation with one deadlock retry, then the transient policy.
///
/// `operation` is a factory so each attempt gets a fresh future.
pub async fn retry_db_write<F, Fut, T>(label: &str, mut operation: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut deadlock_retried = false;
    let mut transient_attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_deadlock() && !deadlock_retried => {
                deadlock_retried = true;
                let backoff = rand::rng().random_range(DEADLOCK_BACKOFF_MIN_MS..=DEADLOCK_BACKOFF_MAX_MS);
                warn!(operation = label, backoff_ms = backoff, "deadlock detected, retrying once");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(error) if is_transient(&error) && transient_attempts + 1 < TRANSIENT_MAX_ATTEMPTS => {
                transient_attempts += 1;
                let base = TRANSIENT_BASE_BACKOFF.as_millis() as u64 * 2u64.pow(transient_attempts - 1);
                let backoff = base + jitter_ms(base / 2);
                warn!(
                    operation = label,
                    attempt = transient_attempts,
                    backoff_ms = backoff,
                    error = %error,
                    "transient database error, backing off"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = retry_db_write("test", || async { Ok::<_, PipelineError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_deadlock_retried_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = retry_db_write("test", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PipelineError::deadlock("40P01"))
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_deadlock_propagates() {
        let result: Result<(), _> =
            retry_db_write("test", || async { Err(PipelineError::deadlock("40P01")) }).await;
        assert!(result.unwrap_err().is_deadlock());
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_after_three_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<(), _> = retry_db_write("test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::database_error("connection reset by peer"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), TRANSIENT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<(), _> = retry_db_write("test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::database_error("constraint violation"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
