// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # API Source Entity
//!
//! A configured remote funding-opportunity source. Sources are created and
//! edited by the admin surface; within a pipeline run they are immutable -
//! the coordinator reads the descriptor once and never writes it back
//! (except for clearing the force-full-reprocessing flag through its
//! dedicated persistence operation).

use serde::{Deserialize, Serialize};

use crate::value_objects::source_id::SourceId;

/// Remote endpoint descriptor for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEndpoint {
    /// Base URL of the upstream API
    pub url: String,
    /// Preferred page size for list calls, when the API supports paging
    pub page_size: Option<u32>,
}

impl SourceEndpoint {
    /// Creates an endpoint descriptor with no paging preference
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_size: None,
        }
    }
}

/// A configured funding-opportunity source.
///
/// The `force_full_reprocessing` flag is a one-shot directive: when set, the
/// next run bypasses duplicate detection and treats every extracted record
/// as NEW, and the pipeline clears the flag after that run succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSource {
    pub id: SourceId,
    pub name: String,
    pub organization: Option<String>,
    pub endpoint: SourceEndpoint,
    pub active: bool,
    pub force_full_reprocessing: bool,
}

impl ApiSource {
    /// Creates an active source with the given identity and endpoint
    pub fn new(id: SourceId, name: impl Into<String>, endpoint: SourceEndpoint) -> Self {
        Self {
            id,
            name: name.into(),
            organization: None,
            endpoint,
            active: true,
            force_full_reprocessing: false,
        }
    }
}

/// Optional per-source pipeline overrides, edited through the admin
/// surface alongside the source itself.
///
/// Every field is optional; an absent configuration row (or field) means
/// the pipeline default applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfiguration {
    /// Source-specific extraction instructions prepended to the prompt
    pub processing_instructions: Option<String>,
    /// Run-watchdog override, seconds
    pub run_timeout_secs: Option<u64>,
}
