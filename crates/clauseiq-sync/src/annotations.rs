//! In-memory annotation state for one document, synchronized with the
//! analysis API.
//!
//! [`AnnotationSync`] owns the only copy of the annotation map. Callers read
//! snapshots through its accessors and change state only through its
//! operations. Every mutation:
//!
//! - is refused locally (`Validation`, `NotFound`) before any request when
//!   its input cannot succeed;
//! - holds the clause's in-flight permit until the request settles, so a
//!   second mutation of the same clause returns [`Outcome::Dropped`];
//! - leaves the map exactly as it was when the request fails;
//! - writes back only into the map it started from. A `load` or `reload`
//!   that completes while the request is in flight replaces the map, and
//!   the fetched state wins.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use clauseiq_core::annotation::LEGACY_NOTE_ID;
use clauseiq_core::{ClauseAnnotations, Note};
use tracing::{debug, info, warn};

use crate::SyncError;
use crate::api::{InteractionApi, InteractionRequest};
use crate::guard::{DEFAULT_GRACE, InFlight};

/// Result of a mutation that may have been dropped by the in-flight guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    /// Another mutation of the same clause was in flight or had just
    /// settled. Nothing was sent.
    Dropped,
}

impl<T> Outcome<T> {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(v) => Some(v),
            Self::Dropped => None,
        }
    }
}

/// What [`AnnotationSync::edit_note`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEdit {
    Updated(Note),
    /// The new text was blank, so the note was deleted.
    Deleted,
}

#[derive(Debug, Default)]
struct State {
    /// `Some` once loaded.
    document_id: Option<String>,
    /// Bumped by every successful fetch.
    generation: u64,
    annotations: HashMap<String, ClauseAnnotations>,
}

impl State {
    fn set_note_text(&mut self, clause_id: &str, note_id: &str, text: &str) {
        if let Some(note) = self
            .annotations
            .get_mut(clause_id)
            .and_then(|a| a.notes.iter_mut().find(|n| n.id == note_id))
        {
            note.text = text.to_string();
        }
    }
}

/// The document and fetch generation a mutation started from.
struct Loaded {
    document_id: String,
    generation: u64,
}

/// Notes and flags of one document's clauses.
pub struct AnnotationSync<A> {
    api: A,
    state: Mutex<State>,
    in_flight: InFlight,
}

impl<A: InteractionApi> AnnotationSync<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: Mutex::new(State::default()),
            in_flight: InFlight::new(DEFAULT_GRACE),
        }
    }

    /// Time a clause stays blocked after its mutation settles.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.in_flight.set_grace(grace);
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.in_flight.grace()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    // ── Loading ──

    /// Fetch every clause's annotations for `document_id` in one call.
    ///
    /// Once loaded, further calls for the same document are no-ops; use
    /// [`reload`](Self::reload) to refresh. Loading a different document
    /// replaces the map. On failure the previous state is kept.
    pub async fn load(&self, document_id: &str) -> Result<(), SyncError> {
        let document_id = document_id.trim();
        if document_id.is_empty() {
            return Err(SyncError::Validation("document id is required".into()));
        }
        let already_loaded = self.lock().document_id.as_deref() == Some(document_id);
        if already_loaded {
            debug!(document_id, "annotations already loaded");
            return Ok(());
        }
        self.fetch_into_state(document_id).await
    }

    /// Re-fetch the loaded document's annotations.
    pub async fn reload(&self) -> Result<(), SyncError> {
        let document_id = self.loaded()?.document_id;
        self.fetch_into_state(&document_id).await
    }

    async fn fetch_into_state(&self, document_id: &str) -> Result<(), SyncError> {
        let records = self.api.fetch_interactions(document_id).await?;
        let annotations: HashMap<String, ClauseAnnotations> = records
            .into_iter()
            .map(|(clause_id, record)| (clause_id, ClauseAnnotations::from(record)))
            .collect();

        info!(document_id, count = annotations.len(), "loaded annotations");
        let mut state = self.lock();
        state.document_id = Some(document_id.to_string());
        state.generation = state.generation.wrapping_add(1);
        state.annotations = annotations;
        Ok(())
    }

    // ── Mutations ──

    /// Append a note. The server assigns its id and timestamp.
    pub async fn add_note(&self, clause_id: &str, text: &str) -> Result<Outcome<Note>, SyncError> {
        require_clause(clause_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::Validation("note text must not be empty".into()));
        }
        let loaded = self.loaded()?;

        let Some(_permit) = self.in_flight.try_acquire(clause_id) else {
            debug!(clause_id, "clause busy, dropping note add");
            return Ok(Outcome::Dropped);
        };

        let note = self
            .api
            .add_note(&loaded.document_id, clause_id, text)
            .await?;
        match self.current(loaded.generation) {
            Some(mut state) => {
                let ann = state
                    .annotations
                    .entry(clause_id.to_string())
                    .or_default();
                if ann.note_index(&note.id).is_none() {
                    ann.notes.push(note.clone());
                }
            }
            None => debug!(clause_id, note_id = %note.id, "annotations reloaded during note add"),
        }

        info!(clause_id, note_id = %note.id, "note added");
        Ok(Outcome::Applied(note))
    }

    /// Replace a note's text, keeping its id, creation time, and position.
    ///
    /// Blank text deletes the note instead; an empty note is never stored.
    /// A note migrated from a legacy record has no server-side id, so its
    /// text is written through the interaction record and the server
    /// assigns it a fresh id.
    pub async fn edit_note(
        &self,
        clause_id: &str,
        note_id: &str,
        text: &str,
    ) -> Result<Outcome<NoteEdit>, SyncError> {
        require_clause(clause_id)?;
        let loaded = self.loaded()?;
        let previous = self
            .note(clause_id, note_id)
            .ok_or_else(|| SyncError::note_not_found(note_id))?;

        let Some(_permit) = self.in_flight.try_acquire(clause_id) else {
            debug!(clause_id, note_id, "clause busy, dropping note edit");
            return Ok(Outcome::Dropped);
        };

        let text = text.trim();
        if text.is_empty() {
            self.remove_note(&loaded, clause_id, note_id).await?;
            return Ok(Outcome::Applied(NoteEdit::Deleted));
        }
        if note_id == LEGACY_NOTE_ID {
            return self
                .rewrite_legacy_note(&loaded, clause_id, previous, text)
                .await;
        }

        self.lock().set_note_text(clause_id, note_id, text);
        match self
            .api
            .update_note(&loaded.document_id, clause_id, note_id, text)
            .await
        {
            Ok(saved) => {
                if let Some(mut state) = self.current(loaded.generation) {
                    state.set_note_text(clause_id, note_id, &saved.text);
                }
                info!(clause_id, note_id, "note updated");
                Ok(Outcome::Applied(NoteEdit::Updated(Note {
                    text: saved.text,
                    ..previous
                })))
            }
            Err(e) => {
                warn!(clause_id, note_id, error = %e, "note update failed, restoring");
                if let Some(mut state) = self.current(loaded.generation) {
                    state.set_note_text(clause_id, note_id, &previous.text);
                }
                Err(e)
            }
        }
    }

    /// Remove a note. An absent note is `NotFound` and leaves state intact.
    pub async fn delete_note(&self, clause_id: &str, note_id: &str) -> Result<Outcome<()>, SyncError> {
        require_clause(clause_id)?;
        let loaded = self.loaded()?;
        if self.note(clause_id, note_id).is_none() {
            return Err(SyncError::note_not_found(note_id));
        }

        let Some(_permit) = self.in_flight.try_acquire(clause_id) else {
            debug!(clause_id, note_id, "clause busy, dropping note delete");
            return Ok(Outcome::Dropped);
        };

        self.remove_note(&loaded, clause_id, note_id).await?;
        Ok(Outcome::Applied(()))
    }

    /// Flip a clause's review flag. Returns the new flag state.
    ///
    /// Duplicate toggles while one is in flight (or within the grace period
    /// after it settles) are dropped, so the server sees a single flip.
    pub async fn toggle_flag(&self, clause_id: &str) -> Result<Outcome<bool>, SyncError> {
        require_clause(clause_id)?;
        let loaded = self.loaded()?;

        let Some(_permit) = self.in_flight.try_acquire(clause_id) else {
            debug!(clause_id, "flag toggle already in flight, dropping");
            return Ok(Outcome::Dropped);
        };

        let (existed, previous) = {
            let mut state = self.lock();
            let existed = state.annotations.contains_key(clause_id);
            let ann = state
                .annotations
                .entry(clause_id.to_string())
                .or_default();
            let previous = ann.is_flagged;
            ann.is_flagged = !previous;
            (existed, previous)
        };

        let request = InteractionRequest {
            note: None,
            is_flagged: !previous,
        };
        match self
            .api
            .save_interaction(&loaded.document_id, clause_id, &request)
            .await
        {
            Ok(record) => {
                if let Some(mut state) = self.current(loaded.generation) {
                    if let Some(ann) = state.annotations.get_mut(clause_id) {
                        ann.is_flagged = record.is_flagged;
                    }
                }
                info!(clause_id, is_flagged = record.is_flagged, "flag saved");
                Ok(Outcome::Applied(record.is_flagged))
            }
            Err(e) => {
                warn!(clause_id, error = %e, "flag toggle failed, restoring");
                if let Some(mut state) = self.current(loaded.generation) {
                    let prune = match state.annotations.get_mut(clause_id) {
                        Some(ann) => {
                            ann.is_flagged = previous;
                            !existed && ann.is_empty()
                        }
                        None => false,
                    };
                    if prune {
                        state.annotations.remove(clause_id);
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop every note and the flag of a clause by deleting its
    /// interaction record. A clause with no annotations is left alone.
    pub async fn clear(&self, clause_id: &str) -> Result<Outcome<()>, SyncError> {
        require_clause(clause_id)?;
        let loaded = self.loaded()?;
        let annotated = self.lock().annotations.contains_key(clause_id);
        if !annotated {
            debug!(clause_id, "no annotations to clear");
            return Ok(Outcome::Applied(()));
        }

        let Some(_permit) = self.in_flight.try_acquire(clause_id) else {
            debug!(clause_id, "clause busy, dropping clear");
            return Ok(Outcome::Dropped);
        };

        let removed = self.lock().annotations.remove(clause_id);
        match self
            .api
            .delete_interaction(&loaded.document_id, clause_id)
            .await
        {
            Ok(()) => {
                info!(clause_id, "annotations cleared");
                Ok(Outcome::Applied(()))
            }
            Err(e) => {
                warn!(clause_id, error = %e, "clear failed, restoring");
                if let (Some(removed), Some(mut state)) = (removed, self.current(loaded.generation)) {
                    state
                        .annotations
                        .entry(clause_id.to_string())
                        .or_insert(removed);
                }
                Err(e)
            }
        }
    }

    /// Delete a note while the caller holds the clause's permit.
    async fn remove_note(&self, loaded: &Loaded, clause_id: &str, note_id: &str) -> Result<(), SyncError> {
        let (index, removed, is_flagged) = {
            let mut state = self.lock();
            let ann = state
                .annotations
                .get_mut(clause_id)
                .ok_or_else(|| SyncError::note_not_found(note_id))?;
            let index = ann
                .note_index(note_id)
                .ok_or_else(|| SyncError::note_not_found(note_id))?;
            (index, ann.notes.remove(index), ann.is_flagged)
        };

        if note_id == LEGACY_NOTE_ID {
            return self
                .remove_legacy_note(loaded, clause_id, index, removed, is_flagged)
                .await;
        }

        match self
            .api
            .delete_note(&loaded.document_id, clause_id, note_id)
            .await
        {
            Ok(()) => {
                info!(clause_id, note_id, "note deleted");
                Ok(())
            }
            Err(e) => {
                warn!(clause_id, note_id, error = %e, "note delete failed, restoring");
                self.restore_note(loaded.generation, clause_id, index, removed);
                Err(e)
            }
        }
    }

    /// A legacy note is the record's only note, so the record is deleted
    /// and the flag written back when it was set.
    async fn remove_legacy_note(
        &self,
        loaded: &Loaded,
        clause_id: &str,
        index: usize,
        removed: Note,
        is_flagged: bool,
    ) -> Result<(), SyncError> {
        if let Err(e) = self
            .api
            .delete_interaction(&loaded.document_id, clause_id)
            .await
        {
            warn!(clause_id, error = %e, "legacy note delete failed, restoring");
            self.restore_note(loaded.generation, clause_id, index, removed);
            return Err(e);
        }

        if is_flagged {
            let request = InteractionRequest {
                note: None,
                is_flagged: true,
            };
            if let Err(e) = self
                .api
                .save_interaction(&loaded.document_id, clause_id, &request)
                .await
            {
                warn!(clause_id, error = %e, "legacy note deleted but flag was not restored");
                if let Some(mut state) = self.current(loaded.generation) {
                    if let Some(ann) = state.annotations.get_mut(clause_id) {
                        ann.is_flagged = false;
                    }
                }
                return Err(e);
            }
        }

        info!(clause_id, "legacy note deleted");
        Ok(())
    }

    async fn rewrite_legacy_note(
        &self,
        loaded: &Loaded,
        clause_id: &str,
        previous: Note,
        text: &str,
    ) -> Result<Outcome<NoteEdit>, SyncError> {
        let is_flagged = {
            let mut state = self.lock();
            state.set_note_text(clause_id, LEGACY_NOTE_ID, text);
            state
                .annotations
                .get(clause_id)
                .is_some_and(|a| a.is_flagged)
        };

        let request = InteractionRequest {
            note: Some(text.to_string()),
            is_flagged,
        };
        match self
            .api
            .save_interaction(&loaded.document_id, clause_id, &request)
            .await
        {
            Ok(record) => {
                let saved = record.notes.first().cloned().unwrap_or_else(|| Note {
                    text: text.to_string(),
                    ..previous
                });
                if let Some(mut state) = self.current(loaded.generation) {
                    state
                        .annotations
                        .insert(clause_id.to_string(), ClauseAnnotations::from(record));
                }
                info!(clause_id, note_id = %saved.id, "legacy note rewritten");
                Ok(Outcome::Applied(NoteEdit::Updated(saved)))
            }
            Err(e) => {
                warn!(clause_id, error = %e, "legacy note update failed, restoring");
                if let Some(mut state) = self.current(loaded.generation) {
                    state.set_note_text(clause_id, LEGACY_NOTE_ID, &previous.text);
                }
                Err(e)
            }
        }
    }

    fn restore_note(&self, generation: u64, clause_id: &str, index: usize, note: Note) {
        let Some(mut state) = self.current(generation) else {
            return;
        };
        let ann = state
            .annotations
            .entry(clause_id.to_string())
            .or_default();
        if ann.note_index(&note.id).is_none() {
            let index = index.min(ann.notes.len());
            ann.notes.insert(index, note);
        }
    }

    fn loaded(&self) -> Result<Loaded, SyncError> {
        let state = self.lock();
        let document_id = state
            .document_id
            .clone()
            .ok_or_else(|| SyncError::Validation("annotations are not loaded".into()))?;
        Ok(Loaded {
            document_id,
            generation: state.generation,
        })
    }
}

impl<A> AnnotationSync<A> {
    // ── Reads ──

    pub fn is_loaded(&self) -> bool {
        self.lock().document_id.is_some()
    }

    pub fn document_id(&self) -> Option<String> {
        self.lock().document_id.clone()
    }

    /// Snapshot of one clause's annotations.
    pub fn annotations(&self, clause_id: &str) -> Option<ClauseAnnotations> {
        self.lock().annotations.get(clause_id).cloned()
    }

    /// Snapshot of the whole map.
    pub fn snapshot(&self) -> HashMap<String, ClauseAnnotations> {
        self.lock().annotations.clone()
    }

    pub fn has_notes(&self, clause_id: &str) -> bool {
        self.notes_count(clause_id) > 0
    }

    pub fn notes_count(&self, clause_id: &str) -> usize {
        self.lock()
            .annotations
            .get(clause_id)
            .map_or(0, |a| a.notes.len())
    }

    /// All notes in insertion order; empty when there are none.
    pub fn all_notes(&self, clause_id: &str) -> Vec<Note> {
        self.lock()
            .annotations
            .get(clause_id)
            .map(|a| a.notes.clone())
            .unwrap_or_default()
    }

    /// Text of the oldest note.
    pub fn first_note(&self, clause_id: &str) -> Option<String> {
        self.lock()
            .annotations
            .get(clause_id)
            .and_then(|a| a.first_note())
            .map(str::to_string)
    }

    pub fn note(&self, clause_id: &str, note_id: &str) -> Option<Note> {
        self.lock()
            .annotations
            .get(clause_id)
            .and_then(|a| a.notes.iter().find(|n| n.id == note_id).cloned())
    }

    pub fn is_flagged(&self, clause_id: &str) -> bool {
        self.lock()
            .annotations
            .get(clause_id)
            .is_some_and(|a| a.is_flagged)
    }

    /// Ids of flagged clauses, for [`clauseiq_core::view`].
    pub fn flagged_ids(&self) -> HashSet<String> {
        self.ids_where(|a| a.is_flagged)
    }

    /// Ids of clauses with at least one note, for [`clauseiq_core::view`].
    pub fn noted_ids(&self) -> HashSet<String> {
        self.ids_where(ClauseAnnotations::has_notes)
    }

    /// Whether a mutation of `clause_id` is in flight or in its grace period.
    pub fn is_mutating(&self, clause_id: &str) -> bool {
        self.in_flight.is_busy(clause_id)
    }

    fn ids_where(&self, pred: impl Fn(&ClauseAnnotations) -> bool) -> HashSet<String> {
        self.lock()
            .annotations
            .iter()
            .filter(|(_, a)| pred(a))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The state, unless a fetch has replaced it since `generation`.
    fn current(&self, generation: u64) -> Option<MutexGuard<'_, State>> {
        let state = self.lock();
        (state.generation == generation).then_some(state)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn require_clause(clause_id: &str) -> Result<(), SyncError> {
    if clause_id.trim().is_empty() {
        return Err(SyncError::Validation("clause id is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use async_trait::async_trait;
    use clauseiq_core::Interaction;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// In-memory API for `doc-1` with call recording, injected failures,
    /// an optional gate that holds every call until notified, and an
    /// optional hold on one call's response after the server has applied it.
    #[derive(Default)]
    struct MockApi {
        records: Mutex<HashMap<String, Interaction>>,
        calls: Mutex<Vec<String>>,
        fail: AtomicBool,
        gate: Mutex<Option<Arc<Notify>>>,
        hold: Mutex<Option<(&'static str, Arc<Notify>)>>,
        next_id: AtomicUsize,
    }

    impl MockApi {
        fn with_notes(clause_id: &str, notes: &[(&str, &str)]) -> Self {
            let api = Self::default();
            api.records.lock().unwrap().insert(
                clause_id.to_string(),
                Interaction {
                    clause_id: clause_id.to_string(),
                    user_id: "u-1".into(),
                    notes: notes
                        .iter()
                        .map(|(id, text)| Note {
                            id: id.to_string(),
                            text: text.to_string(),
                            created_at: "2025-06-01T10:00:00".into(),
                        })
                        .collect(),
                    is_flagged: false,
                    created_at: String::new(),
                    updated_at: String::new(),
                },
            );
            api
        }

        fn flagged(self, clause_id: &str) -> Self {
            Self::record(&mut self.records.lock().unwrap(), clause_id).is_flagged = true;
            self
        }

        fn server_record(&self, clause_id: &str) -> Option<Interaction> {
            self.records.lock().unwrap().get(clause_id).cloned()
        }

        fn calls(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn gate(&self) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(notify.clone());
            notify
        }

        /// Delay the response of `name` until notified.
        fn hold(&self, name: &'static str) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            *self.hold.lock().unwrap() = Some((name, notify.clone()));
            notify
        }

        /// Wait out a hold on `name`, then report an injected failure.
        async fn respond(&self, name: &str) -> Result<(), SyncError> {
            let hold = self
                .hold
                .lock()
                .unwrap()
                .clone()
                .filter(|(held, _)| *held == name);
            if let Some((_, notify)) = hold {
                notify.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Server {
                    status: 500,
                    message: "injected failure".into(),
                });
            }
            Ok(())
        }

        async fn enter(&self, name: &str) -> Result<(), SyncError> {
            self.calls.lock().unwrap().push(name.to_string());
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Server {
                    status: 500,
                    message: "injected failure".into(),
                });
            }
            Ok(())
        }

        fn record<'a>(
            records: &'a mut HashMap<String, Interaction>,
            clause_id: &str,
        ) -> &'a mut Interaction {
            records
                .entry(clause_id.to_string())
                .or_insert_with(|| Interaction {
                    clause_id: clause_id.to_string(),
                    user_id: "u-1".into(),
                    notes: Vec::new(),
                    is_flagged: false,
                    created_at: String::new(),
                    updated_at: String::new(),
                })
        }
    }

    #[async_trait]
    impl InteractionApi for MockApi {
        async fn fetch_interactions(
            &self,
            document_id: &str,
        ) -> Result<HashMap<String, Interaction>, SyncError> {
            self.enter("fetch").await?;
            if document_id != "doc-1" {
                return Ok(HashMap::new());
            }
            Ok(self.records.lock().unwrap().clone())
        }

        async fn save_interaction(
            &self,
            _document_id: &str,
            clause_id: &str,
            request: &InteractionRequest,
        ) -> Result<Interaction, SyncError> {
            self.enter("save_interaction").await?;
            let mut records = self.records.lock().unwrap();
            let record = Self::record(&mut records, clause_id);
            record.is_flagged = request.is_flagged;
            if let Some(text) = &request.note {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let note = Note {
                    id: format!("new-{n}"),
                    text: text.clone(),
                    created_at: "2025-06-02T10:00:00".into(),
                };
                match record.notes.first_mut() {
                    Some(first) => *first = note,
                    None => record.notes.push(note),
                }
            }
            Ok(record.clone())
        }

        async fn delete_interaction(
            &self,
            _document_id: &str,
            clause_id: &str,
        ) -> Result<(), SyncError> {
            self.enter("delete_interaction").await?;
            self.records.lock().unwrap().remove(clause_id);
            Ok(())
        }

        async fn add_note(
            &self,
            _document_id: &str,
            clause_id: &str,
            text: &str,
        ) -> Result<Note, SyncError> {
            self.enter("add_note").await?;
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let note = Note {
                id: format!("new-{n}"),
                text: text.to_string(),
                created_at: "2025-06-02T10:00:00".into(),
            };
            Self::record(&mut self.records.lock().unwrap(), clause_id)
                .notes
                .push(note.clone());
            self.respond("add_note").await?;
            Ok(note)
        }

        async fn update_note(
            &self,
            _document_id: &str,
            clause_id: &str,
            note_id: &str,
            text: &str,
        ) -> Result<Note, SyncError> {
            self.enter("update_note").await?;
            let mut records = self.records.lock().unwrap();
            let record = Self::record(&mut records, clause_id);
            let note = record
                .notes
                .iter_mut()
                .find(|n| n.id == note_id)
                .ok_or_else(|| SyncError::Rejected("Note not found".into()))?;
            note.text = text.to_string();
            Ok(note.clone())
        }

        async fn delete_note(
            &self,
            _document_id: &str,
            clause_id: &str,
            note_id: &str,
        ) -> Result<(), SyncError> {
            self.enter("delete_note").await?;
            Self::record(&mut self.records.lock().unwrap(), clause_id)
                .notes
                .retain(|n| n.id != note_id);
            self.respond("delete_note").await
        }
    }

    async fn loaded(api: MockApi) -> (Arc<MockApi>, AnnotationSync<Arc<MockApi>>) {
        let api = Arc::new(api);
        let sync = AnnotationSync::new(api.clone()).with_grace_period(Duration::ZERO);
        sync.load("doc-1").await.unwrap();
        (api, sync)
    }

    #[tokio::test]
    async fn load_fetches_once_per_document() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        sync.load("doc-1").await.unwrap();
        assert_eq!(api.calls("fetch"), 1);
        assert!(sync.is_loaded());
        assert_eq!(sync.document_id().as_deref(), Some("doc-1"));
        assert!(sync.has_notes("c-1"));
        assert_eq!(sync.first_note("c-1").as_deref(), Some("first"));

        sync.reload().await.unwrap();
        assert_eq!(api.calls("fetch"), 2);
    }

    #[tokio::test]
    async fn load_requires_document_id() {
        let sync = AnnotationSync::new(MockApi::default());
        let err = sync.load("  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(sync.api().total_calls(), 0);
    }

    #[tokio::test]
    async fn failed_load_stays_unloaded() {
        let api = MockApi::default();
        api.set_failing(true);
        let sync = AnnotationSync::new(api);
        let err = sync.load("doc-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!sync.is_loaded());
    }

    #[tokio::test]
    async fn mutation_before_load_is_rejected() {
        let sync = AnnotationSync::new(MockApi::default());
        let err = sync.toggle_flag("c-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = sync.add_note("c-1", "hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(sync.api().total_calls(), 0);
    }

    #[tokio::test]
    async fn add_note_appends_after_existing() {
        let (_api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        let note = sync.add_note("c-1", "  second  ").await.unwrap().applied().unwrap();
        assert_eq!(note.text, "second");
        let notes = sync.all_notes("c-1");
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].id, note.id);
        assert_eq!(sync.first_note("c-1").as_deref(), Some("first"));
        assert_eq!(sync.notes_count("c-1"), 2);
    }

    #[tokio::test]
    async fn blank_note_never_reaches_network() {
        let (api, sync) = loaded(MockApi::default()).await;
        let err = sync.add_note("c-1", "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(api.calls("add_note"), 0);
        assert!(sync.all_notes("c-1").is_empty());
    }

    #[tokio::test]
    async fn add_then_delete_restores_sequence() {
        let (_api, sync) =
            loaded(MockApi::with_notes("c-1", &[("n1", "first"), ("n2", "second")])).await;
        let before = sync.all_notes("c-1");

        let note = sync.add_note("c-1", "temporary").await.unwrap().applied().unwrap();
        assert_eq!(sync.notes_count("c-1"), 3);
        let outcome = sync.delete_note("c-1", &note.id).await.unwrap();
        assert_eq!(outcome, Outcome::Applied(()));

        assert_eq!(sync.all_notes("c-1"), before);
    }

    #[tokio::test]
    async fn edit_note_in_place() {
        let (api, sync) =
            loaded(MockApi::with_notes("c-1", &[("n1", "first"), ("n2", "second")])).await;
        let outcome = sync.edit_note("c-1", "n1", "revised").await.unwrap();
        let Outcome::Applied(NoteEdit::Updated(note)) = outcome else {
            panic!("expected note update");
        };
        assert_eq!(note.id, "n1");
        assert_eq!(note.text, "revised");
        assert_eq!(note.created_at, "2025-06-01T10:00:00");

        let notes = sync.all_notes("c-1");
        assert_eq!(notes[0].text, "revised");
        assert_eq!(notes[1].id, "n2");
        assert_eq!(api.calls("update_note"), 1);
    }

    #[tokio::test]
    async fn edit_to_empty_deletes() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        let outcome = sync.edit_note("c-1", "n1", "").await.unwrap();
        assert_eq!(outcome, Outcome::Applied(NoteEdit::Deleted));
        assert!(sync.note("c-1", "n1").is_none());
        assert!(!sync.has_notes("c-1"));
        assert_eq!(api.calls("update_note"), 0);
        assert_eq!(api.calls("delete_note"), 1);
    }

    #[tokio::test]
    async fn edit_missing_note_is_not_found() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        let err = sync.edit_note("c-1", "nope", "text").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(api.calls("update_note"), 0);
    }

    #[tokio::test]
    async fn failed_edit_restores_text() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        api.set_failing(true);
        let err = sync.edit_note("c-1", "n1", "revised").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(sync.first_note("c-1").as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn repeated_delete_is_not_found_and_harmless() {
        let (api, sync) =
            loaded(MockApi::with_notes("c-1", &[("n1", "first"), ("n2", "second")])).await;
        sync.delete_note("c-1", "n1").await.unwrap();
        let err = sync.delete_note("c-1", "n1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(api.calls("delete_note"), 1);

        let notes = sync.all_notes("c-1");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "n2");
    }

    #[tokio::test]
    async fn failed_delete_restores_position() {
        let (api, sync) = loaded(MockApi::with_notes(
            "c-1",
            &[("n1", "first"), ("n2", "second"), ("n3", "third")],
        ))
        .await;
        let before = sync.all_notes("c-1");
        api.set_failing(true);
        assert!(sync.delete_note("c-1", "n2").await.is_err());
        assert_eq!(sync.all_notes("c-1"), before);
    }

    #[tokio::test]
    async fn failed_add_leaves_state_untouched() {
        let (api, sync) = loaded(MockApi::default()).await;
        api.set_failing(true);
        assert!(sync.add_note("c-1", "note").await.is_err());
        assert!(sync.annotations("c-1").is_none());
    }

    #[tokio::test]
    async fn toggle_flag_flips_and_reports() {
        let (api, sync) = loaded(MockApi::default()).await;
        assert_eq!(sync.toggle_flag("c-1").await.unwrap(), Outcome::Applied(true));
        assert!(sync.is_flagged("c-1"));
        assert!(sync.flagged_ids().contains("c-1"));

        assert_eq!(sync.toggle_flag("c-1").await.unwrap(), Outcome::Applied(false));
        assert!(!sync.is_flagged("c-1"));
        assert_eq!(api.calls("save_interaction"), 2);
    }

    #[tokio::test]
    async fn failed_toggle_restores_previous_state() {
        let (api, sync) = loaded(MockApi::default()).await;
        api.set_failing(true);
        let err = sync.toggle_flag("c-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!sync.is_flagged("c-1"));
        assert!(sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn back_to_back_toggles_send_one_request() {
        let (api, sync) = loaded(MockApi::default()).await;
        let gate = api.gate();

        let (first, second, ()) = tokio::join!(sync.toggle_flag("c-1"), sync.toggle_flag("c-1"), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        assert_eq!(first.unwrap(), Outcome::Applied(true));
        assert!(second.unwrap().is_dropped());
        assert_eq!(api.calls("save_interaction"), 1);
        assert!(sync.is_flagged("c-1"));
    }

    #[tokio::test]
    async fn grace_period_drops_duplicate_after_settle() {
        let api = Arc::new(MockApi::default());
        let sync = AnnotationSync::new(api.clone()).with_grace_period(Duration::from_secs(60));
        sync.load("doc-1").await.unwrap();

        assert_eq!(sync.toggle_flag("c-1").await.unwrap(), Outcome::Applied(true));
        assert!(sync.is_mutating("c-1"));
        assert!(sync.toggle_flag("c-1").await.unwrap().is_dropped());
        assert_eq!(api.calls("save_interaction"), 1);

        // Other clauses are unaffected.
        assert_eq!(sync.toggle_flag("c-2").await.unwrap(), Outcome::Applied(true));
    }

    #[tokio::test]
    async fn note_ops_share_the_clause_guard() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        let gate = api.gate();

        let (flag, note, ()) = tokio::join!(sync.toggle_flag("c-1"), sync.add_note("c-1", "later"), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        assert_eq!(flag.unwrap(), Outcome::Applied(true));
        assert!(note.unwrap().is_dropped());
        assert_eq!(api.calls("add_note"), 0);
        assert_eq!(sync.notes_count("c-1"), 1);
    }

    #[tokio::test]
    async fn different_clauses_mutate_concurrently() {
        let (api, sync) = loaded(MockApi::default()).await;
        let (a, b) = tokio::join!(sync.toggle_flag("c-1"), sync.toggle_flag("c-2"));
        assert_eq!(a.unwrap(), Outcome::Applied(true));
        assert_eq!(b.unwrap(), Outcome::Applied(true));
        assert_eq!(api.calls("save_interaction"), 2);
        assert_eq!(sync.flagged_ids().len(), 2);
    }

    #[tokio::test]
    async fn noted_ids_follow_notes() {
        let (_api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        assert_eq!(sync.noted_ids(), HashSet::from(["c-1".to_string()]));
        sync.delete_note("c-1", "n1").await.unwrap();
        assert!(sync.noted_ids().is_empty());
    }

    async fn wait_for_call(api: &MockApi, name: &str) {
        while api.calls(name) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reload_during_add_keeps_note_ids_unique() {
        let (api, sync) = loaded(MockApi::default()).await;
        let hold = api.hold("add_note");

        let (added, ()) = tokio::join!(sync.add_note("c-1", "hello"), async {
            wait_for_call(&api, "add_note").await;
            sync.reload().await.unwrap();
            hold.notify_one();
        });

        let note = added.unwrap().applied().unwrap();
        let notes = sync.all_notes("c-1");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, note.id);
        assert_eq!(api.calls("fetch"), 2);
    }

    #[tokio::test]
    async fn loading_another_document_during_add_keeps_maps_apart() {
        let (api, sync) = loaded(MockApi::default()).await;
        let hold = api.hold("add_note");

        let (added, ()) = tokio::join!(sync.add_note("c-1", "doc1 note"), async {
            wait_for_call(&api, "add_note").await;
            sync.load("doc-2").await.unwrap();
            hold.notify_one();
        });

        assert!(added.unwrap().applied().is_some());
        assert_eq!(sync.document_id().as_deref(), Some("doc-2"));
        assert!(sync.annotations("c-1").is_none());
        assert!(sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_after_reload_keeps_fetched_state() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[("n1", "first")])).await;
        let hold = api.hold("delete_note");

        let (deleted, ()) = tokio::join!(sync.delete_note("c-1", "n1"), async {
            wait_for_call(&api, "delete_note").await;
            sync.reload().await.unwrap();
            api.set_failing(true);
            hold.notify_one();
        });

        assert_eq!(deleted.unwrap_err().kind(), ErrorKind::Network);
        // The server applied the delete before failing; the fetched map says so.
        assert!(sync.all_notes("c-1").is_empty());
    }

    #[tokio::test]
    async fn clear_drops_notes_and_flag() {
        let api = MockApi::with_notes("c-1", &[("n1", "first"), ("n2", "second")]).flagged("c-1");
        let (api, sync) = loaded(api).await;

        assert_eq!(sync.clear("c-1").await.unwrap(), Outcome::Applied(()));
        assert!(sync.annotations("c-1").is_none());
        assert!(!sync.is_flagged("c-1"));
        assert!(api.server_record("c-1").is_none());
        assert_eq!(api.calls("delete_interaction"), 1);
    }

    #[tokio::test]
    async fn clear_without_annotations_stays_local() {
        let (api, sync) = loaded(MockApi::default()).await;
        assert_eq!(sync.clear("c-9").await.unwrap(), Outcome::Applied(()));
        assert_eq!(api.calls("delete_interaction"), 0);
    }

    #[tokio::test]
    async fn failed_clear_restores_annotations() {
        let api = MockApi::with_notes("c-1", &[("n1", "first")]).flagged("c-1");
        let (api, sync) = loaded(api).await;
        let before = sync.annotations("c-1");
        api.set_failing(true);

        assert!(sync.clear("c-1").await.is_err());
        assert_eq!(sync.annotations("c-1"), before);
    }

    #[tokio::test]
    async fn legacy_note_edit_goes_through_interaction_record() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[(LEGACY_NOTE_ID, "old")])).await;

        let outcome = sync.edit_note("c-1", LEGACY_NOTE_ID, "revised").await.unwrap();
        let Outcome::Applied(NoteEdit::Updated(note)) = outcome else {
            panic!("expected note update");
        };
        assert_ne!(note.id, LEGACY_NOTE_ID);
        assert_eq!(note.text, "revised");
        assert_eq!(sync.all_notes("c-1"), vec![note]);
        assert_eq!(api.calls("update_note"), 0);
        assert_eq!(api.calls("save_interaction"), 1);
    }

    #[tokio::test]
    async fn failed_legacy_edit_restores_text() {
        let (api, sync) = loaded(MockApi::with_notes("c-1", &[(LEGACY_NOTE_ID, "old")])).await;
        api.set_failing(true);
        assert!(sync.edit_note("c-1", LEGACY_NOTE_ID, "revised").await.is_err());
        assert_eq!(sync.first_note("c-1").as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn legacy_note_delete_keeps_flag() {
        let api = MockApi::with_notes("c-1", &[(LEGACY_NOTE_ID, "old")]).flagged("c-1");
        let (api, sync) = loaded(api).await;

        let outcome = sync.delete_note("c-1", LEGACY_NOTE_ID).await.unwrap();
        assert_eq!(outcome, Outcome::Applied(()));
        assert!(!sync.has_notes("c-1"));
        assert!(sync.is_flagged("c-1"));
        assert_eq!(api.calls("delete_note"), 0);
        assert_eq!(api.calls("delete_interaction"), 1);

        let record = api.server_record("c-1").unwrap();
        assert!(record.is_flagged);
        assert!(record.notes.is_empty());
    }
}
