//! Response envelope of the analysis API.
//!
//! Every JSON response has the shape
//! `{"success": bool, "data": {...}, "error": {"code", "message"}}`.
//! A `success: false` body is a failure even on a 2xx status.

use std::collections::HashMap;

use clauseiq_core::{Interaction, Note};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::SyncError;

/// Longest raw body echoed into an error message.
const MAX_BODY_IN_MESSAGE: usize = 300;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionsData {
    #[serde(default)]
    pub interactions: HashMap<String, Interaction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionData {
    #[serde(default)]
    pub interaction: Option<Interaction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NoteData {
    #[serde(default)]
    pub note: Option<Note>,
}

/// Decode a response into its `data` payload.
///
/// Non-2xx statuses become [`SyncError::Auth`] (401/403) or
/// [`SyncError::Server`]; a `success: false` envelope becomes
/// [`SyncError::Rejected`]. An empty 2xx body decodes to `None`.
pub(crate) fn decode<T: DeserializeOwned>(status: u16, body: &str) -> Result<Option<T>, SyncError> {
    if !(200..300).contains(&status) {
        return Err(status_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope<T> = serde_json::from_str(body)?;
    if envelope.success == Some(false) {
        let message = envelope
            .error
            .map(|e| describe(e.message, e.code))
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(SyncError::Rejected(message));
    }
    Ok(envelope.data)
}

/// Error for a non-2xx response, with the most specific message the body
/// offers.
pub(crate) fn status_error(status: u16, body: &str) -> SyncError {
    let message = error_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        401 | 403 => SyncError::Auth(message),
        _ => SyncError::Server { status, message },
    }
}

/// Human-readable message from an error body: the envelope's
/// `error.message`, a FastAPI `detail`, or the raw text.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value
            .pointer("/error/message")
            .and_then(serde_json::Value::as_str)
        {
            return Some(msg.to_string());
        }
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return Some(detail.clone()),
            Some(detail @ serde_json::Value::Array(_)) => return Some(detail.to_string()),
            _ => {}
        }
    }

    Some(truncate(body, MAX_BODY_IN_MESSAGE))
}

fn describe(message: Option<String>, code: Option<String>) -> String {
    match (message, code) {
        (Some(m), _) if !m.is_empty() => m,
        (_, Some(c)) if !c.is_empty() => c,
        _ => "Unknown error".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
