//! Error types for TiddlyAce
//!
//! `StoreError` covers everything the remote store and its network backend can
//! report. `Error` is what the workbench hands back to the host UI.

use std::path::PathBuf;

/// Failures reported by the store or its backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid response from server: {0}")]
    Decode(#[from] serde_json::Error),

    /// The space/recipe has not been resolved, so there is nothing to fetch against
    #[error("no recipe has been resolved yet")]
    NoScope,

    #[error("there is nothing to save")]
    NothingToSave,

    #[error("failed to save {} tiddler(s): {}", .failed.len(), .failed.join(", "))]
    Save { failed: Vec<String> },
}

/// Errors surfaced to the host
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("a save is already in progress")]
    SaveInProgress,

    #[error("tiddler title must not be empty")]
    EmptyTitle,
}
