// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cancellation Token
//!
//! The cooperative-cancellation primitive used throughout the pipeline.
//!
//! Tokens appear at two levels:
//!
//! - **Per run**: the run manager creates one token per pipeline run,
//!   clones it into every stage, and the run watchdog cancels it when the
//!   run deadline passes.
//! - **Process-wide**: an embedder (queue worker, supervisor) that wants
//!   graceful shutdown passes its own token into `process_source`; the run
//!   lifecycle task observes it and cancels the run token when it fires.
//!
//! Stage code only ever observes a token at its suspension points - LLM
//! calls, persistence queries, retry sleeps - so cancellation never tears
//! down work mid-write.
//!
//! ## Usage
//!
//! ```rust
//! use ingest_pipeline_bootstrap::shutdown::CancellationToken;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let token = CancellationToken::new();
//!
//!     let worker = token.clone();
//!     tokio::spawn(async move {
//!         loop {
//!             tokio::select! {
//!                 _ = worker.cancelled() => {
//!                     break;
//!                 }
//!                 _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                     // do work
//!                 }
//!             }
//!         }
//!     });
//!
//!     token.cancel();
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cancellation token for signaling shutdown or run abort
///
/// Lightweight clone-able token that can be passed to async tasks. All clones
/// observe the same cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    /// Shared cancellation flag
    cancelled: Arc<AtomicBool>,
    /// Notification for waiters
    notify: Arc<Notify>,
}

impl CancellationToken {
    /// Create a new cancellation token
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Cancel this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if cancelled (non-blocking)
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait for cancellation (async)
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Register the waiter before re-checking the flag so a cancel()
        // between the check and the await cannot be missed.
        let mut notified = std::pin::pin!(self.notify.notified());
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancellation_token_create() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_token_cancelled_already() {
        let token = CancellationToken::new();
        token.cancel();

        // Should return immediately
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_token_cancelled_wait() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token_clone.cancel();
        });

        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_debug_shows_state() {
        let token = CancellationToken::new();
        assert!(format!("{:?}", token).contains("cancelled: false"));
        token.cancel();
        assert!(format!("{:?}", token).contains("cancelled: true"));
    }
}
