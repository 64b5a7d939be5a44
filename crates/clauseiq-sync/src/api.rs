//! Transport seam between [`AnnotationSync`](crate::AnnotationSync) and the
//! analysis API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clauseiq_core::{Interaction, Note};
use serde::Serialize;

use crate::SyncError;

/// Body of `PUT .../interactions/{clause_id}`.
///
/// `note: None` leaves the clause's notes untouched; a flag toggle sends
/// only `is_flagged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub is_flagged: bool,
}

/// Body of the note create and update endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteRequest {
    pub text: String,
}

/// Remote store of per-clause annotations for a user's documents.
#[async_trait]
pub trait InteractionApi: Send + Sync {
    /// All interactions of a document, keyed by clause id.
    async fn fetch_interactions(
        &self,
        document_id: &str,
    ) -> Result<HashMap<String, Interaction>, SyncError>;

    /// Create or update the interaction record of one clause.
    async fn save_interaction(
        &self,
        document_id: &str,
        clause_id: &str,
        request: &InteractionRequest,
    ) -> Result<Interaction, SyncError>;

    async fn delete_interaction(
        &self,
        document_id: &str,
        clause_id: &str,
    ) -> Result<(), SyncError>;

    /// Append a note; the server assigns id and timestamp.
    async fn add_note(
        &self,
        document_id: &str,
        clause_id: &str,
        text: &str,
    ) -> Result<Note, SyncError>;

    async fn update_note(
        &self,
        document_id: &str,
        clause_id: &str,
        note_id: &str,
        text: &str,
    ) -> Result<Note, SyncError>;

    async fn delete_note(
        &self,
        document_id: &str,
        clause_id: &str,
        note_id: &str,
    ) -> Result<(), SyncError>;
}

#[async_trait]
impl<T: InteractionApi + ?Sized> InteractionApi for Arc<T> {
    async fn fetch_interactions(
        &self,
        document_id: &str,
    ) -> Result<HashMap<String, Interaction>, SyncError> {
        (**self).fetch_interactions(document_id).await
    }

    async fn save_interaction(
        &self,
        document_id: &str,
        clause_id: &str,
        request: &InteractionRequest,
    ) -> Result<Interaction, SyncError> {
        (**self)
            .save_interaction(document_id, clause_id, request)
            .await
    }

    async fn delete_interaction(
        &self,
        document_id: &str,
        clause_id: &str,
    ) -> Result<(), SyncError> {
        (**self).delete_interaction(document_id, clause_id).await
    }

    async fn add_note(
        &self,
        document_id: &str,
        clause_id: &str,
        text: &str,
    ) -> Result<Note, SyncError> {
        (**self).add_note(document_id, clause_id, text).await
    }

    async fn update_note(
        &self,
        document_id: &str,
        clause_id: &str,
        note_id: &str,
        text: &str,
    ) -> Result<Note, SyncError> {
        (**self)
            .update_note(document_id, clause_id, note_id, text)
            .await
    }

    async fn delete_note(
        &self,
        document_id: &str,
        clause_id: &str,
        note_id: &str,
    ) -> Result<(), SyncError> {
        (**self).delete_note(document_id, clause_id, note_id).await
    }
}
