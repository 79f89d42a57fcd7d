// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Funding Amount
//!
//! Normalized money value for funding-opportunity fields.
//!
//! Upstream APIs emit money as bare numbers, `"$1,500,000"`, `"1500000.00"`,
//! or nothing at all. Change detection and scoring both need a single
//! canonical form, so this value object normalizes to integer cents:
//!
//! - comparisons are exact (no float-epsilon drift between two parses of
//!   the same figure)
//! - a missing amount coalesces to zero, which is the comparison rule the
//!   duplicate detector's critical-field check requires
//!
//! Parsing rejects strings with no digits; a rejected parse is treated by
//! callers as a missing amount.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters stripped before numeric parsing: currency symbols, commas,
/// surrounding whitespace.
static MONEY_SANITIZER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[$,\s]|USD").expect("static regex must compile"));

/// A funding amount held as integer cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FundingAmount(i64);

impl FundingAmount {
    /// Zero dollars; the coalescing target for missing amounts.
    pub const ZERO: FundingAmount = FundingAmount(0);

    /// Creates an amount from whole dollars
    pub fn from_dollars(dollars: f64) -> Self {
        Self((dollars * 100.0).round() as i64)
    }

    /// Creates an amount from integer cents
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Normalizes an optional dollar figure, coalescing `None` to zero.
    ///
    /// This is the comparison rule for money-typed critical fields: a null
    /// on either side compares as zero.
    pub fn coalesce(value: Option<f64>) -> Self {
        value.map(Self::from_dollars).unwrap_or(Self::ZERO)
    }

    /// Parses a loose money string (`"$1,500,000"`, `"1500000.00"`, `"2.5"`).
    ///
    /// Returns `None` when no numeric value remains after sanitation.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = MONEY_SANITIZER.replace_all(raw, "");
        if cleaned.is_empty() {
            return None;
        }
        cleaned.parse::<f64>().ok().filter(|v| v.is_finite()).map(Self::from_dollars)
    }

    /// The amount in integer cents
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// The amount in (possibly fractional) dollars
    pub fn dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl std::fmt::Display for FundingAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.dollars())
    }
}
