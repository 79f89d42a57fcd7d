// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Raw Response Entity
//!
//! An opaque upstream payload captured once per API call and addressed by a
//! content hash. The hash gives the persistence layer its idempotency key:
//! the same payload from the same source is stored exactly once, however
//! many times a run re-fetches it.
//!
//! Every opportunity forwarded past extraction carries the `raw_response_id`
//! of the payload it was extracted from, which is what makes per-record
//! lineage queries possible after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::value_objects::source_id::SourceId;

/// Kind of upstream call that produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiCallType {
    /// Paginated listing call
    List,
    /// Per-item detail call
    Detail,
    /// One-shot single-record call
    Single,
}

impl std::fmt::Display for ApiCallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiCallType::List => write!(f, "list"),
            ApiCallType::Detail => write!(f, "detail"),
            ApiCallType::Single => write!(f, "single"),
        }
    }
}

/// Capture metadata attached to a raw response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponseMetadata {
    /// Endpoint the payload was fetched from
    pub endpoint: String,
    /// Kind of call that produced it
    pub call_type: ApiCallType,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    /// Number of raw items in the payload
    pub item_count: usize,
}

/// A captured upstream payload, content-addressed for idempotent storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    /// Database row id, assigned on insert
    pub id: Option<i64>,
    pub source_id: SourceId,
    /// Lowercase hex SHA-256 of the canonical payload serialization
    pub content_hash: String,
    pub payload: serde_json::Value,
    pub metadata: RawResponseMetadata,
}

impl RawResponse {
    /// Captures a payload, computing its content hash.
    pub fn capture(
        source_id: SourceId,
        endpoint: impl Into<String>,
        call_type: ApiCallType,
        payload: serde_json::Value,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let item_count = match &payload {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::Null => 0,
            _ => 1,
        };
        let content_hash = Self::content_hash_of(&payload);
        Self {
            id: None,
            source_id,
            content_hash,
            payload,
            metadata: RawResponseMetadata {
                endpoint: endpoint.into(),
                call_type,
                captured_at,
                item_count,
            },
        }
    }

    /// Computes the content hash for a payload.
    ///
    /// Uses the payload's compact JSON serialization, so hash identity
    /// follows value identity rather than formatting.
    pub fn content_hash_of(payload: &serde_json::Value) -> String {
        let canonical = payload.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}
