//! Core clause types, the clause query engine, and export formats.

pub mod annotation;
pub mod clause;
pub mod document;
pub mod export;
pub mod query;

pub use annotation::{ClauseAnnotations, Interaction, Note};
pub use clause::{Clause, ClauseType, Negotiability, RiskLevel};
pub use document::{DocumentContext, RiskCounts};
pub use query::{ClauseQuery, RiskFilter, SortKey, TypeFilter, view};

use thiserror::Error;

/// A query parameter or enum value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
