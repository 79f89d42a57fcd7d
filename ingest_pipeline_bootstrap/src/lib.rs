// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI and `make lint-strict`
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # Bootstrap Module
//!
//! The bootstrap module sits **outside** the enterprise application layers
//! (domain, application, infrastructure) and provides the process-lifecycle
//! plumbing the ingestion pipeline needs before any domain code runs:
//!
//! - **Cancellation tokens** - Cooperative cancellation for async tasks
//! - **Tracing initialization** - Installs the subscriber pipeline logs
//!   flow through
//!
//! ## Architecture Position
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          BOOTSTRAP (This Module)            │
//! │  - Cancellation Tokens                      │
//! │  - Tracing Initialization                   │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │         APPLICATION LAYER                   │
//! │  - Pipeline Coordinator                     │
//! │  - Run Manager, Stage Engines               │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │           DOMAIN LAYER                      │
//! │  - Detection, Scoring, Filtering Rules      │
//! │  - Entities & Value Objects                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The cancellation token defined here is the root of the pipeline's
//! cooperative-cancellation tree: every run owns a token, every stage
//! clones it, the run watchdog cancels it when the run deadline passes,
//! and an embedder's shutdown token - passed into `process_source` -
//! cancels it from the outside.

pub mod logger;
pub mod shutdown;

pub use logger::init_tracing;
pub use shutdown::CancellationToken;
