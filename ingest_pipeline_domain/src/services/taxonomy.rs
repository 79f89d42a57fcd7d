// /////////////////////////////////////////////////////////////////////////////
// Adaptive Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Tiered Taxonomy Tables
//!
//! Static, build-time-fixed category lists used to score how well an
//! opportunity matches the business profile. Four taxonomies exist -
//! eligible applicants, project types, activities, and funding types - each
//! split into `hot / strong / mild / weak` tiers.
//!
//! Matching is phrase-based over normalized text: an entry matches a
//! candidate term when the entry appears in the candidate on word
//! boundaries. `"City of Austin government"` therefore matches the
//! applicant entry `"city"`, while `"electricity provider"` does not. When
//! a candidate matches entries in several tiers, the hottest tier wins;
//! scoring only ever asks for the best tier across a record's whole term
//! set.

use once_cell::sync::Lazy;

/// Relevance tier of a taxonomy entry.
///
/// Ordered hottest-first so `min` over tiers yields the best match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaxonomyTier {
    Hot,
    Strong,
    Mild,
    Weak,
}

impl std::fmt::Display for TaxonomyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaxonomyTier::Hot => write!(f, "hot"),
            TaxonomyTier::Strong => write!(f, "strong"),
            TaxonomyTier::Mild => write!(f, "mild"),
            TaxonomyTier::Weak => write!(f, "weak"),
        }
    }
}

/// A four-tier category list.
#[derive(Debug)]
pub struct TieredTaxonomy {
    hot: &'static [&'static str],
    strong: &'static [&'static str],
    mild: &'static [&'static str],
    weak: &'static [&'static str],
}

impl TieredTaxonomy {
    /// Finds the tier of a single candidate term, hottest tier first.
    pub fn term_tier(&self, candidate: &str) -> Option<TaxonomyTier> {
        let normalized = normalize_term(candidate);
        if normalized.is_empty() {
            return None;
        }
        // Pad with spaces so entries only match on word boundaries
        // ("city" must not match inside "electricity").
        let padded = format!(" {} ", normalized);
        let tiers = [
            (TaxonomyTier::Hot, self.hot),
            (TaxonomyTier::Strong, self.strong),
            (TaxonomyTier::Mild, self.mild),
            (TaxonomyTier::Weak, self.weak),
        ];
        for (tier, entries) in tiers {
            if entries.iter().any(|entry| padded.contains(&format!(" {} ", entry))) {
                return Some(tier);
            }
        }
        None
    }

    /// Finds the best (hottest) tier across a set of candidate terms.
    pub fn best_tier<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Option<TaxonomyTier> {
        candidates.into_iter().filter_map(|c| self.term_tier(c)).min()
    }
}

/// Lowercases, trims, and collapses internal whitespace.
fn normalize_term(term: &str) -> String {
    term.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Eligible-applicant taxonomy.
///
/// The profile serves public-sector facility owners; private-sector and
/// individual applicants are explicit weak entries so they score zero
/// rather than falling off the table silently.
pub static APPLICANT_TAXONOMY: Lazy<TieredTaxonomy> = Lazy::new(|| TieredTaxonomy {
    hot: &[
        "state government",
        "local government",
        "municipality",
        "municipalities",
        "city",
        "county",
        "town",
        "public agency",
    ],
    strong: &[
        "school district",
        "k-12",
        "higher education",
        "college",
        "university",
        "public housing",
        "tribal",
        "special district",
    ],
    mild: &[
        "nonprofit",
        "non-profit",
        "public utility",
        "utility district",
        "hospital",
        "healthcare",
    ],
    weak: &["individual", "for-profit", "private business", "small business"],
});

/// Eligible-project-type taxonomy.
pub static PROJECT_TYPE_TAXONOMY: Lazy<TieredTaxonomy> = Lazy::new(|| TieredTaxonomy {
    hot: &[
        "energy efficiency",
        "hvac",
        "building retrofit",
        "retrofit",
        "facility improvement",
        "infrastructure",
        "building envelope",
    ],
    strong: &[
        "renewable energy",
        "solar",
        "geothermal",
        "lighting",
        "water conservation",
        "energy storage",
        "electrification",
    ],
    mild: &[
        "resilience",
        "microgrid",
        "transportation",
        "fleet",
        "broadband",
        "climate planning",
    ],
    weak: &["research", "workforce development", "education program", "outreach"],
});

/// Eligible-activity taxonomy.
pub static ACTIVITY_TAXONOMY: Lazy<TieredTaxonomy> = Lazy::new(|| TieredTaxonomy {
    hot: &[
        "construction",
        "installation",
        "implementation",
        "equipment purchase",
        "equipment replacement",
    ],
    strong: &["design", "engineering", "retrofit", "upgrade", "modernization"],
    mild: &["planning", "assessment", "audit", "feasibility study", "technical assistance"],
    weak: &["research", "education", "outreach", "training", "marketing"],
});

/// Funding-type taxonomy.
pub static FUNDING_TYPE_TAXONOMY: Lazy<TieredTaxonomy> = Lazy::new(|| TieredTaxonomy {
    hot: &["grant", "formula grant", "cooperative agreement"],
    strong: &["rebate", "incentive"],
    mild: &["tax credit", "tax incentive", "bond"],
    weak: &["loan", "loan guarantee", "technical assistance only"],
});
