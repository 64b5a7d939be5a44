//! Terminal rendering for clause lists, clause cards, and notes.

use std::collections::HashSet;

use clauseiq_core::{Clause, ClauseAnnotations, Note, RiskCounts, RiskLevel};

const MAX_LIST_ITEMS: usize = 10;
const HEADING_WIDTH: usize = 48;

// ── Public API ──

/// One line per clause: id, risk, type, heading, and annotation markers.
pub fn print_clause_list(clauses: &[&Clause], flagged: &HashSet<String>, noted: &HashSet<String>) {
    if clauses.is_empty() {
        println!("No clauses match the selected filters");
        return;
    }
    println!(
        "{:<12} {:<7} {:<22} {:<width$} {}",
        "ID",
        "RISK",
        "TYPE",
        "HEADING",
        "MARKS",
        width = HEADING_WIDTH
    );
    for clause in clauses {
        println!("{}", format_row(clause, flagged, noted));
    }
    println!();
    println!("{} clauses", clauses.len());
}

pub fn print_risk_summary(counts: RiskCounts) {
    let parts: Vec<String> = RiskLevel::ALL
        .iter()
        .map(|level| format!("{}: {}", level, counts.get(*level)))
        .collect();
    println!("Risk  {}", parts.join("  "));
}

/// Print a single clause as a vertical card.
pub fn print_clause_card(clause: &Clause, annotations: Option<&ClauseAnnotations>) {
    let title = clause.heading.as_deref().unwrap_or(clause.type_label());
    println!("=== {title} ===");
    if annotations.is_some_and(|a| a.is_flagged) {
        println!("Flagged for review");
    }
    println!();

    println!("Identity");
    print_field("id", clause.id.as_deref());
    print_field("type", Some(clause.type_label()));
    print_field(
        "risk_level",
        Some(clause.risk_level.map_or("unknown", |r| r.as_str())),
    );
    if let Some(t) = &clause.clause_type {
        print_field("negotiability", Some(t.negotiability().as_str()));
    }
    println!();

    print_text_section("Summary", clause.summary.as_deref());
    print_text_section("Risk Assessment", clause.risk_assessment.as_deref());
    print_list_section("Key Points", clause.key_points.as_deref());
    print_list_section("Recommendations", clause.recommendations.as_deref());
    print_text_section("Full Text", clause.text.as_deref());

    if let Some(ann) = annotations.filter(|a| a.has_notes()) {
        println!("Notes");
        print_notes(&ann.notes);
    }
}

pub fn print_notes(notes: &[Note]) {
    if notes.is_empty() {
        println!("  (no notes)");
        return;
    }
    for (i, note) in notes.iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, note.id, note.text);
        if !note.created_at.is_empty() {
            println!("     {}", note.created_at);
        }
    }
}

// ── Rendering helpers ──

fn format_row(clause: &Clause, flagged: &HashSet<String>, noted: &HashSet<String>) -> String {
    let id = clause.id.as_deref().unwrap_or("-");
    let risk = clause.risk_level.map_or("-", |r| r.as_str());
    let heading = clause.heading.as_deref().unwrap_or("");
    let mut marks = String::new();
    if flagged.contains(id) {
        marks.push('F');
    }
    if noted.contains(id) {
        marks.push('N');
    }
    format!(
        "{:<12} {:<7} {:<22} {:<width$} {}",
        truncate(id, 12),
        risk,
        truncate(clause.type_label(), 22),
        truncate(heading, HEADING_WIDTH),
        marks,
        width = HEADING_WIDTH
    )
    .trim_end()
    .to_string()
}

fn print_field(name: &str, value: Option<&str>) {
    if let Some(v) = value {
        println!("  {:<16} {}", name, v);
    }
}

fn print_text_section(header: &str, value: Option<&str>) {
    let Some(text) = value.filter(|t| !t.trim().is_empty()) else {
        return;
    };
    println!("{header}");
    for line in text.lines() {
        println!("  {line}");
    }
    println!();
}

fn print_list_section(header: &str, items: Option<&[String]>) {
    let Some(items) = items.filter(|i| !i.is_empty()) else {
        return;
    };
    println!("{header}");
    for item in items.iter().take(MAX_LIST_ITEMS) {
        println!("  - {item}");
    }
    if items.len() > MAX_LIST_ITEMS {
        println!("  ... and {} more", items.len() - MAX_LIST_ITEMS);
    }
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{head}…")
}
