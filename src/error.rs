//! Error taxonomy.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`ConfigurationError`] | config loading, endpoint construction | fatal, no topic can open a session |
//! | [`ExtractionError`] | [`extract`](crate::extract) | aborts the whole upload |
//! | [`PersistenceError`] | [`topic_store`](crate::topic_store) | logged and swallowed |
//! | [`SendError`] | [`llm`](crate::llm) sessions | replaced by an error message in the log |
//! | [`UploadError`] | [`SessionManager::create_or_replace`](crate::session::SessionManager::create_or_replace) | returned to the caller |
//! | [`SessionError`] | other session operations | returned to the caller |
//!
//! Malformed citation markers are not errors at all: the parser leaves them
//! as plain text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing credential for {provider}: set the {env_var} environment variable")]
    MissingCredential { provider: String, env_var: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported document type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("no extractable pages in {0}")]
    NoPages(String),
    #[error("extraction aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage quota exceeded for {key}: {bytes} bytes (limit {limit})")]
    QuotaExceeded {
        key: String,
        bytes: usize,
        limit: usize,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("request to conversational endpoint failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("conversational endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("conversational endpoint returned no text")]
    EmptyResponse,
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no files were provided")]
    NoFiles,
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("topic {0} has a request in flight")]
    Busy(String),
    #[error("failed to process {file_name}: {source}")]
    Extraction {
        file_name: String,
        #[source]
        source: ExtractionError,
    },
    #[error("failed to open a session: {0}")]
    Endpoint(#[source] SendError),
    #[error("upload for topic {0} was cancelled by a reset")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("topic {0} has a request in flight")]
    Busy(String),
    #[error("failed to open a session: {0}")]
    Endpoint(#[source] SendError),
}
