//! Clause query engine: filter, search, and sort a document's clauses.
//!
//! [`view`] is a total function. Clauses missing an id, type, or risk level
//! fall into the "unknown" bucket of each filter and comparator.
//!
//! # Search
//!
//! The query is trimmed and lowercased, then matched against the heading,
//! summary, text, and type label joined by spaces. A clause matches when
//! the joined text contains the query, when some whitespace token starts
//! with it, or (queries of 3+ characters only) when some token contains it.
//!
//! # Sorting
//!
//! All orderings use a stable sort, so equal keys keep document order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::ParseError;
use crate::clause::{Clause, ClauseType, RiskLevel};

/// Shortest query allowed to match inside a token rather than at its start.
pub const MIN_PARTIAL_MATCH_LEN: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RiskFilter {
    #[default]
    All,
    Only(RiskLevel),
}

impl RiskFilter {
    pub fn matches(&self, clause: &Clause) -> bool {
        match self {
            Self::All => true,
            Self::Only(level) => clause.risk_level == Some(*level),
        }
    }
}

impl FromStr for RiskFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse()
            .map(Self::Only)
            .map_err(|_| ParseError::new("risk filter", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Only(ClauseType),
}

impl TypeFilter {
    pub fn matches(&self, clause: &Clause) -> bool {
        match self {
            Self::All => true,
            Self::Only(t) => clause.clause_type.as_ref() == Some(t),
        }
    }
}

impl FromStr for TypeFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse()
            .map(Self::Only)
            .map_err(|_| ParseError::new("clause type filter", s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    DocumentOrder,
    RiskLevel,
    Alphabetical,
    FlaggedFirst,
    NotedFirst,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentOrder => "document_order",
            Self::RiskLevel => "risk_level",
            Self::Alphabetical => "alphabetical",
            Self::FlaggedFirst => "flagged_first",
            Self::NotedFirst => "noted_first",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "document_order" => Ok(Self::DocumentOrder),
            "risk_level" => Ok(Self::RiskLevel),
            "alphabetical" => Ok(Self::Alphabetical),
            "flagged_first" => Ok(Self::FlaggedFirst),
            "noted_first" => Ok(Self::NotedFirst),
            _ => Err(ParseError::new("sort key", s)),
        }
    }
}

/// Filter, search, and sort parameters for [`view`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseQuery {
    pub risk: RiskFilter,
    pub clause_type: TypeFilter,
    pub search: String,
    pub sort: SortKey,
}

/// Produce the ordered, filtered view of `clauses`.
///
/// `flagged` and `noted` hold the ids of flagged clauses and clauses with
/// at least one note; they only affect the `flagged_first` and
/// `noted_first` orderings.
pub fn view<'c>(
    clauses: &'c [Clause],
    query: &ClauseQuery,
    flagged: &HashSet<String>,
    noted: &HashSet<String>,
) -> Vec<&'c Clause> {
    let search = query.search.trim().to_lowercase();

    let mut out: Vec<&Clause> = clauses
        .iter()
        .filter(|c| query.risk.matches(c))
        .filter(|c| query.clause_type.matches(c))
        .filter(|c| search.is_empty() || matches_search(c, &search))
        .collect();

    match query.sort {
        SortKey::DocumentOrder => {}
        SortKey::RiskLevel => out.sort_by(|a, b| by_risk_then_label(a, b)),
        SortKey::Alphabetical => out.sort_by(|a, b| by_label_then_heading(a, b)),
        SortKey::FlaggedFirst => {
            out.sort_by(|a, b| members_first(a, b, flagged).then_with(|| by_severity(a, b)))
        }
        SortKey::NotedFirst => {
            out.sort_by(|a, b| members_first(a, b, noted).then_with(|| by_severity(a, b)))
        }
    }

    trace!(
        total = clauses.len(),
        visible = out.len(),
        sort = %query.sort,
        "computed clause view"
    );
    out
}

/// Whether `clause` matches an already trimmed, lowercased query.
pub fn matches_search(clause: &Clause, query: &str) -> bool {
    let haystack = [
        clause.heading.as_deref().unwrap_or_default(),
        clause.summary.as_deref().unwrap_or_default(),
        clause.text.as_deref().unwrap_or_default(),
        clause.type_label(),
    ]
    .join(" ")
    .to_lowercase();

    if haystack.contains(query) {
        return true;
    }
    let partial = query.chars().count() >= MIN_PARTIAL_MATCH_LEN;
    haystack
        .split_whitespace()
        .any(|token| token.starts_with(query) || (partial && token.contains(query)))
}

fn by_severity(a: &Clause, b: &Clause) -> Ordering {
    b.severity().cmp(&a.severity())
}

fn by_risk_then_label(a: &Clause, b: &Clause) -> Ordering {
    by_severity(a, b).then_with(|| compare_text(a.type_label(), b.type_label()))
}

fn by_label_then_heading(a: &Clause, b: &Clause) -> Ordering {
    compare_text(a.type_label(), b.type_label()).then_with(|| {
        let a_title = a.heading.as_deref().unwrap_or(a.type_label());
        let b_title = b.heading.as_deref().unwrap_or(b.type_label());
        compare_text(a_title, b_title)
    })
}

/// Clauses whose id is in `set` sort first. Clauses without an id never
/// belong to a set.
fn members_first(a: &Clause, b: &Clause, set: &HashSet<String>) -> Ordering {
    let in_set = |c: &Clause| c.id.as_ref().is_some_and(|id| set.contains(id));
    in_set(b).cmp(&in_set(a))
}

/// Case-insensitive first, then exact, so the order is total.
fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
