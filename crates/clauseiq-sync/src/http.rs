//! HTTP client for the analysis API's interaction and report endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clauseiq_core::{Interaction, Note};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::api::{InteractionApi, InteractionRequest, NoteRequest};
use crate::credentials::CredentialProvider;
use crate::envelope::{self, InteractionData, InteractionsData, NoteData};
use crate::SyncError;

/// Client for `/api/v1/analysis` interactions and `/api/v1/reports`.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpApi {
    /// Create a client for the given API base URL.
    ///
    /// `base_url` should be like `http://localhost:8000` (no trailing slash).
    pub fn new(base_url: String, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Download the PDF analysis report of a document.
    pub async fn download_report(&self, document_id: &str) -> Result<Vec<u8>, SyncError> {
        let url = self.endpoint(&["api", "v1", "reports", "documents", document_id, "pdf"])?;

        info!(url = %url, "downloading analysis report");
        let resp = self.request(Method::GET, url)?.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(envelope::status_error(status.as_u16(), &body));
        }

        let bytes = resp.bytes().await?;
        info!(bytes = bytes.len(), "downloaded analysis report");
        Ok(bytes.to_vec())
    }

    /// The base URL extended by `segments`. Each segment is percent-encoded
    /// as a whole, so ids containing `/`, `?` or `#` stay in their segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let invalid = |reason: String| SyncError::InvalidUrl {
            url: self.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn interactions_url(&self, document_id: &str) -> Result<Url, SyncError> {
        self.endpoint(&["api", "v1", "analysis", "documents", document_id, "interactions"])
    }

    fn interaction_url(&self, document_id: &str, clause_id: &str) -> Result<Url, SyncError> {
        self.endpoint(&[
            "api",
            "v1",
            "analysis",
            "documents",
            document_id,
            "interactions",
            clause_id,
        ])
    }

    fn notes_url(&self, document_id: &str, clause_id: &str) -> Result<Url, SyncError> {
        self.endpoint(&[
            "api",
            "v1",
            "analysis",
            "documents",
            document_id,
            "interactions",
            clause_id,
            "notes",
        ])
    }

    fn note_url(&self, document_id: &str, clause_id: &str, note_id: &str) -> Result<Url, SyncError> {
        self.endpoint(&[
            "api",
            "v1",
            "analysis",
            "documents",
            document_id,
            "interactions",
            clause_id,
            "notes",
            note_id,
        ])
    }

    /// Start an authorized request. Fails without I/O when no credential is
    /// available.
    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, SyncError> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or_else(|| SyncError::Auth("no access token available".into()))?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    /// Send and decode the envelope's `data` payload.
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Option<T>, SyncError> {
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        envelope::decode(status, &body)
    }
}

#[async_trait]
impl InteractionApi for HttpApi {
    async fn fetch_interactions(
        &self,
        document_id: &str,
    ) -> Result<HashMap<String, Interaction>, SyncError> {
        let url = self.interactions_url(document_id)?;

        info!(url = %url, "fetching interactions");
        let data: Option<InteractionsData> = self.send(self.request(Method::GET, url)?).await?;
        let interactions = data.map(|d| d.interactions).unwrap_or_default();
        info!(count = interactions.len(), "fetched interactions");
        Ok(interactions)
    }

    async fn save_interaction(
        &self,
        document_id: &str,
        clause_id: &str,
        request: &InteractionRequest,
    ) -> Result<Interaction, SyncError> {
        let url = self.interaction_url(document_id, clause_id)?;

        info!(url = %url, is_flagged = request.is_flagged, "saving interaction");
        let req = self.request(Method::PUT, url)?.json(request);
        let data: Option<InteractionData> = self.send(req).await?;
        data.and_then(|d| d.interaction)
            .ok_or(SyncError::MissingData("interaction"))
    }

    async fn delete_interaction(
        &self,
        document_id: &str,
        clause_id: &str,
    ) -> Result<(), SyncError> {
        let url = self.interaction_url(document_id, clause_id)?;

        info!(url = %url, "deleting interaction");
        self.send::<serde_json::Value>(self.request(Method::DELETE, url)?)
            .await?;
        Ok(())
    }

    async fn add_note(
        &self,
        document_id: &str,
        clause_id: &str,
        text: &str,
    ) -> Result<Note, SyncError> {
        let url = self.notes_url(document_id, clause_id)?;

        info!(url = %url, "adding note");
        let body = NoteRequest {
            text: text.to_string(),
        };
        let data: Option<NoteData> = self
            .send(self.request(Method::POST, url)?.json(&body))
            .await?;
        data.and_then(|d| d.note).ok_or(SyncError::MissingData("note"))
    }

    async fn update_note(
        &self,
        document_id: &str,
        clause_id: &str,
        note_id: &str,
        text: &str,
    ) -> Result<Note, SyncError> {
        let url = self.note_url(document_id, clause_id, note_id)?;

        info!(url = %url, "updating note");
        let body = NoteRequest {
            text: text.to_string(),
        };
        let data: Option<NoteData> = self
            .send(self.request(Method::PUT, url)?.json(&body))
            .await?;
        data.and_then(|d| d.note).ok_or(SyncError::MissingData("note"))
    }

    async fn delete_note(
        &self,
        document_id: &str,
        clause_id: &str,
        note_id: &str,
    ) -> Result<(), SyncError> {
        let url = self.note_url(document_id, clause_id, note_id)?;

        info!(url = %url, "deleting note");
        self.send::<serde_json::Value>(self.request(Method::DELETE, url)?)
            .await?;
        Ok(())
    }
}
