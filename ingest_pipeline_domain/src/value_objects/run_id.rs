// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Identifier
//!
//! ULID-backed identifier for pipeline runs.
//!
//! ULIDs are lexicographically sortable by creation time, which makes run
//! listings chronological for free and keeps identifiers compact (26
//! characters, URL-safe, case-insensitive Base32).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::error::pipeline_error::PipelineError;

/// Typed identifier for a pipeline run.
///
/// Wraps a ULID; never nil. Construct with [`RunId::new`] for a fresh id or
/// [`RunId::parse`] to accept an external representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Ulid);

impl RunId {
    /// Generates a new unique run identifier
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a run id from its 26-character string form
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        let ulid =
            Ulid::from_string(s).map_err(|e| PipelineError::invalid_input(format!("invalid run id {:?}: {}", s, e)))?;
        if ulid == Ulid::nil() {
            return Err(PipelineError::invalid_input("run id must not be nil"));
        }
        Ok(Self(ulid))
    }

    /// Returns the underlying ULID
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RunId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_round_trip_through_string() {
        let id = RunId::new();
        let parsed = RunId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(RunId::parse("not-a-ulid").is_err());
    }

    #[test]
    fn test_rejects_nil() {
        assert!(RunId::parse("00000000000000000000000000").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let id = RunId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
