//! Export formats for a single clause and its annotations: a JSON record
//! and a plain-text report suitable for the clipboard.

use std::fmt::Write;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::annotation::{ClauseAnnotations, Note};
use crate::clause::{Clause, RiskLevel};

/// JSON export of one clause with the user's annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClauseExport {
    /// Human-readable type label.
    pub clause_type: String,
    pub risk_level: Option<RiskLevel>,
    pub summary: Option<String>,
    pub risk_assessment: Option<String>,
    pub recommendations: Option<Vec<String>>,
    pub full_text: Option<String>,
    /// First note only, for consumers that expect a single note.
    pub user_note: Option<String>,
    pub user_notes: Vec<Note>,
    pub flagged: bool,
    pub exported_date: String,
}

impl ClauseExport {
    pub fn new(
        clause: &Clause,
        annotations: Option<&ClauseAnnotations>,
        exported_at: DateTime<Utc>,
    ) -> Self {
        Self {
            clause_type: clause.type_label().to_string(),
            risk_level: clause.risk_level,
            summary: clause.summary.clone(),
            risk_assessment: clause.risk_assessment.clone(),
            recommendations: clause.recommendations.clone(),
            full_text: clause.text.clone(),
            user_note: annotations
                .and_then(|a| a.first_note())
                .map(str::to_string),
            user_notes: annotations.map(|a| a.notes.clone()).unwrap_or_default(),
            flagged: annotations.is_some_and(|a| a.is_flagged),
            exported_date: exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// `clause-analysis-<clause_type>.json`, `unknown` when the type is absent.
pub fn export_file_name(clause: &Clause) -> String {
    let ty = clause
        .clause_type
        .as_ref()
        .map(|t| t.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown");
    format!("clause-analysis-{ty}.json")
}

/// File name for a document's PDF analysis report.
pub fn report_file_name(filename: Option<&str>) -> String {
    let base = filename.filter(|f| !f.is_empty()).unwrap_or("document");
    format!("{}_analysis_report.pdf", base.replacen(".pdf", "", 1))
}

/// Plain-text analysis of one clause, including numbered notes.
pub fn clause_report_text(
    clause: &Clause,
    annotations: Option<&ClauseAnnotations>,
    generated_on: NaiveDate,
) -> String {
    let risk = clause
        .risk_level
        .map(|r| r.as_str().to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let recommendations = match clause.recommendations.as_deref() {
        Some(recs) if !recs.is_empty() => recs
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {r}", i + 1))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "No recommendations available".to_string(),
    };

    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write!(
        out,
        "CLAUSE ANALYSIS\n\
         ===============\n\
         Type: {ty}\n\
         Risk Level: {risk}\n\
         \n\
         SUMMARY:\n\
         {summary}\n\
         \n\
         RISK ASSESSMENT:\n\
         {assessment}\n\
         \n\
         RECOMMENDATIONS:\n\
         {recommendations}\n\
         \n\
         FULL TEXT:\n\
         {text}\n",
        ty = clause.type_label(),
        summary = or_fallback(clause.summary.as_deref(), "No summary available"),
        assessment = or_fallback(
            clause.risk_assessment.as_deref(),
            "No risk assessment available"
        ),
        text = or_fallback(clause.text.as_deref(), "No text available"),
    );

    if let Some(ann) = annotations.filter(|a| a.has_notes()) {
        out.push_str("\nYOUR NOTES:\n");
        let lines: Vec<String> = ann
            .notes
            .iter()
            .filter(|n| !n.text.is_empty())
            .enumerate()
            .map(|(i, n)| match note_date(&n.created_at) {
                Some(date) => format!("{}. {} ({})", i + 1, n.text, date.format("%Y-%m-%d")),
                None => format!("{}. {}", i + 1, n.text),
            })
            .collect();
        out.push_str(&lines.join("\n"));
        out.push('\n');
    }

    let _ = write!(
        out,
        "\nGenerated by ClauseIQ on {}",
        generated_on.format("%Y-%m-%d")
    );
    out.trim().to_string()
}

fn or_fallback<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(fallback)
}

/// Date of a server timestamp: RFC 3339, naive ISO 8601, or a bare date.
fn note_date(created_at: &str) -> Option<NaiveDate> {
    let s = created_at.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
