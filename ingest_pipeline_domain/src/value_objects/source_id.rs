// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! UUID-backed identifier for ingestion sources.
//!
//! Sources are created by the admin surface, so their ids arrive from the
//! outside world; the newtype exists to keep them from mixing with run ids
//! or database row ids.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::pipeline_error::PipelineError;

/// Typed identifier for an API source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Generates a new random source identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a source id from its canonical hyphenated form
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        let uuid =
            Uuid::parse_str(s).map_err(|e| PipelineError::invalid_input(format!("invalid source id {:?}: {}", s, e)))?;
        Ok(Self(uuid))
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SourceId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for SourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_string() {
        let id = SourceId::new();
        assert_eq!(id, SourceId::parse(&id.to_string()).unwrap());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(SourceId::parse("definitely-not-a-uuid").is_err());
    }
}
