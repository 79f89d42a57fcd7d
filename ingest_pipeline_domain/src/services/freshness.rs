// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Freshness Check
//!
//! The four-scenario `api_updated_at` decision matrix applied when a
//! duplicate is found:
//!
//! | API timestamp | DB timestamp | Decision |
//! |---|---|---|
//! | invalid/missing | any | proceed to change check (`no_api_timestamp_check_fields`) |
//! | present | missing | proceed (`api_timestamp_newer`) |
//! | present, ≤ DB | present | SKIP (`api_timestamp_not_newer`) |
//! | present, > DB | present | proceed (`api_timestamp_newer`) |
//!
//! "Valid" means a non-empty string parseable to a point in time. An upstream
//! that emits garbage timestamps simply loses the cheap skip path; it never
//! loses updates.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::entities::opportunity_path::PathReason;

/// Outcome of the freshness check.
///
/// `Proceed` carries the reason forwarded to the critical-field check (and
/// onto the UPDATE path when changes are found); `Skip` terminates routing
/// for the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessDecision {
    Proceed(PathReason),
    Skip(PathReason),
}

impl FreshnessDecision {
    /// The path reason carried by either variant
    pub fn reason(&self) -> PathReason {
        match self {
            FreshnessDecision::Proceed(reason) | FreshnessDecision::Skip(reason) => *reason,
        }
    }
}

/// Parses a wire-form timestamp.
///
/// Accepts RFC3339 (fractional seconds optional) and the common
/// `YYYY-MM-DD HH:MM:SS` form; anything else is invalid.
pub fn parse_wire_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Applies the freshness matrix to one duplicate pair.
pub fn evaluate_freshness(
    api_updated_at: Option<&str>,
    stored_api_updated_at: Option<DateTime<Utc>>,
) -> FreshnessDecision {
    let api_ts = api_updated_at.and_then(parse_wire_timestamp);

    match (api_ts, stored_api_updated_at) {
        (None, _) => FreshnessDecision::Proceed(PathReason::NoApiTimestampCheckFields),
        (Some(_), None) => FreshnessDecision::Proceed(PathReason::ApiTimestampNewer),
        (Some(api), Some(stored)) if api > stored => FreshnessDecision::Proceed(PathReason::ApiTimestampNewer),
        (Some(_), Some(_)) => FreshnessDecision::Skip(PathReason::ApiTimestampNotNewer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_missing_api_timestamp_proceeds_to_field_check() {
        let decision = evaluate_freshness(None, Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        assert_eq!(decision, FreshnessDecision::Proceed(PathReason::NoApiTimestampCheckFields));
    }

    #[test]
    fn test_invalid_api_timestamp_proceeds_to_field_check() {
        let decision = evaluate_freshness(Some("last tuesday"), None);
        assert_eq!(decision, FreshnessDecision::Proceed(PathReason::NoApiTimestampCheckFields));
    }

    #[test]
    fn test_api_present_db_missing_proceeds_as_newer() {
        let decision = evaluate_freshness(Some("2024-06-01T12:00:00Z"), None);
        assert_eq!(decision, FreshnessDecision::Proceed(PathReason::ApiTimestampNewer));
    }

    #[test]
    fn test_api_equal_to_db_skips() {
        let decision = evaluate_freshness(Some("2024-06-01T12:00:00Z"), Some(ts("2024-06-01T12:00:00Z")));
        assert_eq!(decision, FreshnessDecision::Skip(PathReason::ApiTimestampNotNewer));
    }

    #[test]
    fn test_api_older_than_db_skips() {
        let decision = evaluate_freshness(Some("2024-05-01T00:00:00Z"), Some(ts("2024-06-01T12:00:00Z")));
        assert_eq!(decision, FreshnessDecision::Skip(PathReason::ApiTimestampNotNewer));
    }

    #[test]
    fn test_api_newer_than_db_proceeds() {
        let decision = evaluate_freshness(Some("2024-06-02T12:00:00Z"), Some(ts("2024-06-01T12:00:00Z")));
        assert_eq!(decision, FreshnessDecision::Proceed(PathReason::ApiTimestampNewer));
    }

    #[test]
    fn test_fractional_seconds_accepted() {
        assert!(parse_wire_timestamp("2024-06-01T12:00:00.000Z").is_some());
        assert_eq!(
            parse_wire_timestamp("2024-06-01T12:00:00.000Z"),
            parse_wire_timestamp("2024-06-01T12:00:00Z")
        );
    }

    #[test]
    fn test_space_separated_form_accepted() {
        assert!(parse_wire_timestamp("2024-06-01 12:00:00").is_some());
    }

    #[test]
    fn test_empty_string_is_invalid() {
        assert_eq!(parse_wire_timestamp("  "), None);
    }
}
