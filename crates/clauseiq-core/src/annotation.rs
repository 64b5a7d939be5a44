//! User annotations on clauses: notes and review flags.

use serde::{Deserialize, Serialize};

/// Id given to a note migrated from a legacy single-note record.
///
/// The server knows no note by this id, so the note endpoints cannot reach
/// it. Edits go through the interaction record, which stores the text as a
/// note with a fresh id; deletes remove the record.
pub const LEGACY_NOTE_ID: &str = "legacy-note";

/// A user-authored note on one clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub text: String,
    /// ISO 8601 timestamp string, as sent by the server.
    #[serde(default)]
    pub created_at: String,
}

/// Annotation state for one clause. Notes keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseAnnotations {
    pub notes: Vec<Note>,
    pub is_flagged: bool,
}

impl ClauseAnnotations {
    pub fn has_notes(&self) -> bool {
        !self.notes.is_empty()
    }

    /// Text of the oldest note, for single-note views.
    pub fn first_note(&self) -> Option<&str> {
        self.notes.first().map(|n| n.text.as_str())
    }

    pub fn note_index(&self, note_id: &str) -> Option<usize> {
        self.notes.iter().position(|n| n.id == note_id)
    }

    /// Nothing worth keeping: no notes and not flagged.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && !self.is_flagged
    }
}

impl From<Interaction> for ClauseAnnotations {
    fn from(record: Interaction) -> Self {
        Self {
            notes: record.notes,
            is_flagged: record.is_flagged,
        }
    }
}

/// Server record of one clause's annotations.
///
/// Older records store a single `note` string instead of a `notes` array;
/// those are migrated on read. Notes with empty text are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawInteraction")]
pub struct Interaction {
    pub clause_id: String,
    pub user_id: String,
    pub notes: Vec<Note>,
    pub is_flagged: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Deserialize)]
struct RawInteraction {
    #[serde(default)]
    clause_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    notes: Option<Vec<Note>>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    is_flagged: bool,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
}

impl From<RawInteraction> for Interaction {
    fn from(raw: RawInteraction) -> Self {
        let mut notes: Vec<Note> = raw
            .notes
            .unwrap_or_default()
            .into_iter()
            .filter(|n| !n.text.trim().is_empty())
            .collect();

        if notes.is_empty() {
            if let Some(text) = raw.note.filter(|t| !t.trim().is_empty()) {
                notes.push(Note {
                    id: LEGACY_NOTE_ID.to_string(),
                    text,
                    created_at: raw.created_at.clone(),
                });
            }
        }

        Self {
            clause_id: raw.clause_id,
            user_id: raw.user_id,
            notes,
            is_flagged: raw.is_flagged,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        }
    }
}
