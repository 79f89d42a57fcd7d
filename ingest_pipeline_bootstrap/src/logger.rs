// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Tracing Initialization
//!
//! Installs the process-wide `tracing` subscriber the pipeline logs
//! through. Application code emits events with the `tracing` macros
//! directly; this helper is the one place a process (queue worker,
//! supervisor, test harness) turns those events into output.
//!
//! The filter comes from `RUST_LOG` with an `info` default, so a worker
//! can be turned verbose per-target (`RUST_LOG=ingest_pipeline=debug`)
//! without a rebuild.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for the pipeline process.
///
/// Reads the filter from `RUST_LOG` with an `info` default. Safe to call
/// more than once; subsequent calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        // Events after init must not panic
        tracing::info!("subscriber installed");
    }
}
