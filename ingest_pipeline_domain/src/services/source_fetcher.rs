// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Source Fetcher Port
//!
//! The contract for pulling raw items from a configured remote source. The
//! HTTP implementation (pagination, auth, retry-on-non-2xx) lives outside
//! the core; the coordinator only needs the collected payload and the
//! flattened item list. A fetch that exhausts its retries surfaces as
//! `PipelineError::UpstreamFetch` and is terminal for the run.

use async_trait::async_trait;

use crate::entities::raw_response::ApiCallType;
use crate::entities::source::ApiSource;
use crate::error::pipeline_error::PipelineError;

/// Raw payload pulled from an upstream API.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    /// The payload as captured, for content-addressed storage
    pub payload: serde_json::Value,
    /// Individual raw items flattened out of the payload
    pub items: Vec<serde_json::Value>,
    /// Endpoint the payload came from
    pub endpoint: String,
    /// Kind of upstream call that produced it
    pub call_type: ApiCallType,
}

/// Contract for fetching raw opportunity data from a source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetches all pages for a source and returns the combined payload.
    async fn fetch_raw_items(&self, source: &ApiSource) -> Result<FetchedPayload, PipelineError>;
}
