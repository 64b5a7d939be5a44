use thiserror::Error;

/// Caller-facing category of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or rejected credential. Never retried.
    Auth,
    /// Local input rejected before any request was made.
    Validation,
    /// Transport failure, non-2xx status, or an unusable response body.
    Network,
    /// Referenced note or clause is absent from local state.
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid API base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response is missing `{0}`")]
    MissingData(&'static str),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) | Self::InvalidUrl { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Network,
        }
    }

    pub(crate) fn note_not_found(note_id: &str) -> Self {
        Self::NotFound {
            what: "note",
            id: note_id.to_string(),
        }
    }
}
