//! Bearer credential lookup for API requests.

use std::sync::{PoisonError, RwLock};

/// Supplies the bearer token attached to every API request.
///
/// Returning `None` means no session is active; requests then fail with
/// [`SyncError::Auth`](crate::SyncError::Auth) before any I/O.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Credential held for the lifetime of a user session.
///
/// Set with [`sign_in`](Self::sign_in) at session start and cleared with
/// [`sign_out`](Self::sign_out).
#[derive(Debug, Default)]
pub struct SessionCredentials {
    token: RwLock<Option<String>>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with `token`. Blank tokens are treated as no session.
    pub fn with_token(token: impl Into<String>) -> Self {
        let creds = Self::new();
        creds.sign_in(token);
        creds
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        let token = token.into();
        let token = (!token.trim().is_empty()).then_some(token);
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn sign_out(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_signed_in(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl CredentialProvider for SessionCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
