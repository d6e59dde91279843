//! Error types for the calpads crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to the remote application.
#[derive(Debug, Error)]
pub enum CalpadsError {
    /// The HTTP request itself failed (DNS, TLS, connection reset, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading an upload or writing a download failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A list endpoint returned JSON that does not decode.
    #[error("invalid JSON from list endpoint: {0}")]
    Json(#[from] serde_json::Error),

    /// A scraped or configured URL does not parse.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The session never reached the authenticated landing page.
    #[error("client is not connected; construct a new client with valid credentials")]
    NotConnected,

    /// A report code, LEA code or similar key is absent from the scraped options.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// An element the workflow depends on is missing from the page.
    #[error("unexpected page shape: {0}")]
    UpstreamShapeChange(String),

    /// The caller asked for an output format that does not exist.
    #[error("invalid output format: {0}")]
    InvalidFormat(String),

    /// The caller named a file that does not exist.
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// The configuration holds a value that cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The login/consent chain did not settle on a terminal page.
    #[error("authentication replay exceeded {0} hops")]
    ReplayLimit(usize),
}

impl CalpadsError {
    pub(crate) fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    pub(crate) fn shape(detail: impl Into<String>) -> Self {
        Self::UpstreamShapeChange(detail.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CalpadsError>;
