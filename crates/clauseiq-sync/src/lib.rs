//! Annotation sync: notes and review flags on clauses, kept in step with the
//! analysis API.

mod annotations;
mod api;
mod credentials;
mod envelope;
mod error;
mod guard;

#[cfg(feature = "http")]
pub mod http;

pub use annotations::{AnnotationSync, NoteEdit, Outcome};
pub use api::{InteractionApi, InteractionRequest, NoteRequest};
pub use credentials::{CredentialProvider, SessionCredentials};
pub use error::{ErrorKind, SyncError};
pub use guard::DEFAULT_GRACE;

#[cfg(feature = "http")]
pub use http::HttpApi;
