// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Critical-Field Change Detection
//!
//! Field-level comparison between an extracted API record and its stored
//! duplicate, over exactly the six change-triggering fields: `title`,
//! `minimum_award`, `maximum_award`, `total_funding_available`,
//! `close_date`, `open_date`.
//!
//! ## Normalization Rules
//!
//! Comparison must be stable under upstream formatting noise, so each typed
//! field has a canonical form:
//!
//! - **Strings** - trimmed, case-folded, internal whitespace collapsed.
//!   `"Building  Retrofit "` equals `"building retrofit"`.
//! - **Money** - integer cents with null coalesced to zero. `1500000` equals
//!   `"1,500,000.00"` after upstream parsing; an absent amount equals an
//!   explicit zero.
//! - **Dates** - day granularity. `"2024-12-31T00:00:00.000Z"`,
//!   `"2024-12-31T00:00:00Z"`, and `"2024-12-31"` are the same day; an
//!   unparseable wire date is treated as missing rather than as a change.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::entities::opportunity::{ApiOpportunity, StoredOpportunity};
use crate::value_objects::funding_amount::FundingAmount;

/// The six change-triggering fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalField {
    Title,
    MinimumAward,
    MaximumAward,
    TotalFundingAvailable,
    CloseDate,
    OpenDate,
}

impl CriticalField {
    /// All critical fields, in reporting order
    pub const ALL: [CriticalField; 6] = [
        CriticalField::Title,
        CriticalField::MinimumAward,
        CriticalField::MaximumAward,
        CriticalField::TotalFundingAvailable,
        CriticalField::CloseDate,
        CriticalField::OpenDate,
    ];

    /// Column-style name, as used in update statements and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CriticalField::Title => "title",
            CriticalField::MinimumAward => "minimum_award",
            CriticalField::MaximumAward => "maximum_award",
            CriticalField::TotalFundingAvailable => "total_funding_available",
            CriticalField::CloseDate => "close_date",
            CriticalField::OpenDate => "open_date",
        }
    }
}

impl std::fmt::Display for CriticalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected difference, with display forms of both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: CriticalField,
    pub previous: Option<String>,
    pub current: Option<String>,
}

/// Trims, case-folds, and collapses internal whitespace.
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// True when two strings are equivalent after normalization.
pub fn text_equivalent(a: &str, b: &str) -> bool {
    normalize_text(a) == normalize_text(b)
}

/// Parses a wire-form date at day granularity.
///
/// Accepts RFC3339 (fractional seconds optional), `YYYY-MM-DD`, and
/// `MM/DD/YYYY`. Anything else is treated as missing.
pub fn parse_wire_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y").ok()
}

/// True when a wire date and a stored date name the same day (or are both
/// missing).
pub fn dates_equivalent(wire: Option<&str>, stored: Option<NaiveDate>) -> bool {
    let wire_date = wire.and_then(parse_wire_date);
    wire_date == stored
}

/// True when two optional dollar amounts are equal at cent precision with
/// null coalesced to zero.
pub fn money_equivalent(a: Option<f64>, b: Option<f64>) -> bool {
    FundingAmount::coalesce(a) == FundingAmount::coalesce(b)
}

fn display_money(value: Option<f64>) -> Option<String> {
    value.map(|v| format!("{:.2}", v))
}

fn display_wire_date(value: Option<&str>) -> Option<String> {
    value.and_then(parse_wire_date).map(|d| d.to_string())
}

/// Compares the six critical fields of an API record against a stored
/// record, returning every difference found.
///
/// An empty result means the records are duplicates with no material
/// change; a non-empty result is what promotes a duplicate to UPDATE.
pub fn detect_critical_changes(api: &ApiOpportunity, stored: &StoredOpportunity) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if !text_equivalent(&api.title, &stored.title) {
        changes.push(FieldChange {
            field: CriticalField::Title,
            previous: Some(stored.title.clone()),
            current: Some(api.title.clone()),
        });
    }

    if !money_equivalent(api.minimum_award, stored.minimum_award) {
        changes.push(FieldChange {
            field: CriticalField::MinimumAward,
            previous: display_money(stored.minimum_award),
            current: display_money(api.minimum_award),
        });
    }

    if !money_equivalent(api.maximum_award, stored.maximum_award) {
        changes.push(FieldChange {
            field: CriticalField::MaximumAward,
            previous: display_money(stored.maximum_award),
            current: display_money(api.maximum_award),
        });
    }

    if !money_equivalent(api.total_funding_available, stored.total_funding_available) {
        changes.push(FieldChange {
            field: CriticalField::TotalFundingAvailable,
            previous: display_money(stored.total_funding_available),
            current: display_money(api.total_funding_available),
        });
    }

    if !dates_equivalent(api.close_date.as_deref(), stored.close_date) {
        changes.push(FieldChange {
            field: CriticalField::CloseDate,
            previous: stored.close_date.map(|d| d.to_string()),
            current: display_wire_date(api.close_date.as_deref()),
        });
    }

    if !dates_equivalent(api.open_date.as_deref(), stored.open_date) {
        changes.push(FieldChange {
            field: CriticalField::OpenDate,
            previous: stored.open_date.map(|d| d.to_string()),
            current: display_wire_date(api.open_date.as_deref()),
        });
    }

    changes
}
