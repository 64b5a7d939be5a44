mod display;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use clauseiq_core::export::{self, ClauseExport};
use clauseiq_core::{Clause, ClauseQuery, DocumentContext, RiskFilter, SortKey, TypeFilter};
use clauseiq_sync::{AnnotationSync, HttpApi, NoteEdit, Outcome, SessionCredentials};
use tracing::Level;

#[derive(Parser)]
#[command(name = "clauseiq", version)]
#[command(about = "Review analysed contract clauses, notes, and flags")]
struct Cli {
    /// Base URL of the analysis API.
    #[arg(
        long,
        global = true,
        env = "CLAUSEIQ_API_URL",
        default_value = "http://localhost:8000"
    )]
    api_url: String,
    /// Bearer token of the signed-in user.
    #[arg(long, global = true, env = "CLAUSEIQ_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the clauses of an analysed document.
    Clauses {
        /// Document analysis JSON.
        file: PathBuf,
        /// high, medium, low, or all.
        #[arg(long, default_value = "all")]
        risk: RiskFilter,
        /// Clause type such as non_compete, or all.
        #[arg(long = "type", default_value = "all")]
        clause_type: TypeFilter,
        #[arg(long, default_value = "")]
        search: String,
        /// document_order, risk_level, alphabetical, flagged_first, noted_first.
        #[arg(long, default_value = "document_order")]
        sort: SortKey,
        /// Load notes and flags of this document from the API.
        #[arg(long)]
        document: Option<String>,
    },
    /// Show one clause in full.
    Show {
        file: PathBuf,
        clause_id: String,
        #[arg(long)]
        document: Option<String>,
    },
    /// Manage the notes of a clause.
    Notes {
        #[command(subcommand)]
        command: NotesCommand,
    },
    /// Toggle the review flag of a clause.
    Flag { document: String, clause_id: String },
    /// Delete every note and the flag of a clause.
    Clear { document: String, clause_id: String },
    /// Export one clause as JSON, or as a plain-text report.
    Export {
        file: PathBuf,
        clause_id: String,
        #[arg(long)]
        document: Option<String>,
        /// Print the plain-text report instead of writing JSON.
        #[arg(long, default_value_t = false)]
        text: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Download the PDF analysis report of a document.
    Report {
        document: String,
        /// Original file name, used to name the report.
        #[arg(long)]
        filename: Option<String>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum NotesCommand {
    List {
        document: String,
        clause_id: String,
    },
    Add {
        document: String,
        clause_id: String,
        text: String,
    },
    /// Replace a note's text; empty text deletes it.
    Edit {
        document: String,
        clause_id: String,
        note_id: String,
        text: String,
    },
    Delete {
        document: String,
        clause_id: String,
        note_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("clauseiq v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Clauses {
            ref file,
            risk,
            ref clause_type,
            ref search,
            sort,
            ref document,
        } => {
            let doc = read_document(file)?;
            let query = ClauseQuery {
                risk,
                clause_type: clause_type.clone(),
                search: search.clone(),
                sort,
            };
            let (flagged, noted) = match document {
                Some(id) => {
                    let sync = cli.load(id).await?;
                    (sync.flagged_ids(), sync.noted_ids())
                }
                None => (HashSet::new(), HashSet::new()),
            };
            if let Some(name) = &doc.filename {
                println!("{name}");
            }
            display::print_risk_summary(doc.risk_counts());
            println!();
            let visible = clauseiq_core::view(&doc.clauses, &query, &flagged, &noted);
            display::print_clause_list(&visible, &flagged, &noted);
        }
        Command::Show {
            ref file,
            ref clause_id,
            ref document,
        } => {
            let doc = read_document(file)?;
            let clause = find_clause(&doc, clause_id)?;
            let annotations = match document {
                Some(id) => cli.load(id).await?.annotations(clause_id),
                None => None,
            };
            display::print_clause_card(clause, annotations.as_ref());
        }
        Command::Notes { ref command } => cli.run_notes(command).await?,
        Command::Flag {
            ref document,
            ref clause_id,
        } => {
            let sync = cli.load(document).await?;
            match sync.toggle_flag(clause_id).await? {
                Outcome::Applied(true) => println!("Flagged {clause_id}"),
                Outcome::Applied(false) => println!("Unflagged {clause_id}"),
                Outcome::Dropped => println!("Skipped: {clause_id} has a change in flight"),
            }
        }
        Command::Clear {
            ref document,
            ref clause_id,
        } => {
            let sync = cli.load(document).await?;
            match sync.clear(clause_id).await? {
                Outcome::Applied(()) => println!("Cleared {clause_id}"),
                Outcome::Dropped => println!("Skipped: {clause_id} has a change in flight"),
            }
        }
        Command::Export {
            ref file,
            ref clause_id,
            ref document,
            text,
            ref out,
        } => {
            let doc = read_document(file)?;
            let clause = find_clause(&doc, clause_id)?;
            let annotations = match document {
                Some(id) => cli.load(id).await?.annotations(clause_id),
                None => None,
            };
            if text {
                let today = chrono::Local::now().date_naive();
                println!(
                    "{}",
                    export::clause_report_text(clause, annotations.as_ref(), today)
                );
            } else {
                let record = ClauseExport::new(clause, annotations.as_ref(), chrono::Utc::now());
                let json = serde_json::to_string_pretty(&record)?;
                let path = out
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(export::export_file_name(clause)));
                std::fs::write(&path, json)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Exported to {}", path.display());
            }
        }
        Command::Report {
            ref document,
            ref filename,
            ref out,
        } => {
            let api = cli.http_api();
            let pdf = api
                .download_report(document)
                .await
                .context("failed to download report")?;
            let path = out.join(export::report_file_name(filename.as_deref()));
            std::fs::write(&path, pdf)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report saved to {}", path.display());
        }
    }

    Ok(())
}

impl Cli {
    fn http_api(&self) -> HttpApi {
        let credentials = match &self.token {
            Some(token) => SessionCredentials::with_token(token.as_str()),
            None => SessionCredentials::new(),
        };
        HttpApi::new(self.api_url.clone(), Arc::new(credentials))
    }

    /// Sync client with the annotations of `document_id` loaded.
    async fn load(&self, document_id: &str) -> anyhow::Result<AnnotationSync<HttpApi>> {
        let sync = AnnotationSync::new(self.http_api());
        sync.load(document_id)
            .await
            .with_context(|| format!("failed to load annotations of {document_id}"))?;
        Ok(sync)
    }

    async fn run_notes(&self, command: &NotesCommand) -> anyhow::Result<()> {
        let document = match command {
            NotesCommand::List { document, .. }
            | NotesCommand::Add { document, .. }
            | NotesCommand::Edit { document, .. }
            | NotesCommand::Delete { document, .. } => document,
        };
        let sync = self.load(document).await?;

        match command {
            NotesCommand::List { clause_id, .. } => {
                display::print_notes(&sync.all_notes(clause_id));
            }
            NotesCommand::Add {
                clause_id, text, ..
            } => match sync.add_note(clause_id, text).await? {
                Outcome::Applied(note) => println!("Added note {}", note.id),
                Outcome::Dropped => println!("Skipped: {clause_id} has a change in flight"),
            },
            NotesCommand::Edit {
                clause_id,
                note_id,
                text,
                ..
            } => match sync.edit_note(clause_id, note_id, text).await? {
                Outcome::Applied(NoteEdit::Updated(note)) => println!("Updated note {}", note.id),
                Outcome::Applied(NoteEdit::Deleted) => println!("Deleted note {note_id}"),
                Outcome::Dropped => println!("Skipped: {clause_id} has a change in flight"),
            },
            NotesCommand::Delete {
                clause_id, note_id, ..
            } => match sync.delete_note(clause_id, note_id).await? {
                Outcome::Applied(()) => println!("Deleted note {note_id}"),
                Outcome::Dropped => println!("Skipped: {clause_id} has a change in flight"),
            },
        }
        Ok(())
    }
}

fn read_document(path: &Path) -> anyhow::Result<DocumentContext> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid analysis JSON in {}", path.display()))
}

fn find_clause<'d>(doc: &'d DocumentContext, clause_id: &str) -> anyhow::Result<&'d Clause> {
    match doc.clause(clause_id) {
        Some(clause) => Ok(clause),
        None => bail!("clause {clause_id:?} not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clauseiq_core::RiskLevel;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_clause_filters() {
        let cli = Cli::try_parse_from([
            "clauseiq",
            "clauses",
            "analysis.json",
            "--risk",
            "HIGH",
            "--sort",
            "flagged_first",
            "--search",
            "terminate",
        ])
        .unwrap();
        match cli.command {
            Command::Clauses {
                risk, sort, search, ..
            } => {
                assert_eq!(risk, RiskFilter::Only(RiskLevel::High));
                assert_eq!(sort, SortKey::FlaggedFirst);
                assert_eq!(search, "terminate");
            }
            _ => panic!("expected clauses command"),
        }
    }

    #[test]
    fn rejects_unknown_sort_key() {
        let res = Cli::try_parse_from(["clauseiq", "clauses", "a.json", "--sort", "random"]);
        assert!(res.is_err());
    }

    #[test]
    fn parses_clear() {
        let cli = Cli::try_parse_from(["clauseiq", "clear", "doc-1", "c-1"]).unwrap();
        match cli.command {
            Command::Clear {
                document,
                clause_id,
            } => {
                assert_eq!(document, "doc-1");
                assert_eq!(clause_id, "c-1");
            }
            _ => panic!("expected clear command"),
        }
    }

    #[test]
    fn global_api_url_after_subcommand() {
        let cli = Cli::try_parse_from([
            "clauseiq",
            "flag",
            "doc-1",
            "c-1",
            "--api-url",
            "https://api.example.com/",
        ])
        .unwrap();
        assert_eq!(cli.api_url, "https://api.example.com/");
        assert_eq!(cli.http_api().base_url(), "https://api.example.com");
    }
}
