//! Analysed document as delivered by the document-analysis service.

use serde::{Deserialize, Serialize};

use crate::clause::{Clause, RiskLevel};

/// Number of clauses per risk level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCounts {
    #[serde(default)]
    pub high: usize,
    #[serde(default)]
    pub medium: usize,
    #[serde(default)]
    pub low: usize,
}

impl RiskCounts {
    /// Count clauses by risk level. Clauses with unknown risk are not counted.
    pub fn from_clauses(clauses: &[Clause]) -> Self {
        clauses.iter().fold(Self::default(), |mut counts, c| {
            match c.risk_level {
                Some(RiskLevel::High) => counts.high += 1,
                Some(RiskLevel::Medium) => counts.medium += 1,
                Some(RiskLevel::Low) => counts.low += 1,
                None => {}
            }
            counts
        })
    }

    pub fn get(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Read-only context for one analysed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentContext {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    /// Structured summary; its shape belongs to the analysis service.
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
    #[serde(default)]
    pub risk_summary: Option<RiskCounts>,
    #[serde(default)]
    pub selected_clause_id: Option<String>,
}

impl DocumentContext {
    /// Supplied counts when present, otherwise counted from the clauses.
    pub fn risk_counts(&self) -> RiskCounts {
        self.risk_summary
            .unwrap_or_else(|| RiskCounts::from_clauses(&self.clauses))
    }

    pub fn clause(&self, clause_id: &str) -> Option<&Clause> {
        self.clauses
            .iter()
            .find(|c| c.id.as_deref() == Some(clause_id))
    }

    pub fn selected_clause(&self) -> Option<&Clause> {
        self.selected_clause_id
            .as_deref()
            .and_then(|id| self.clause(id))
    }
}
