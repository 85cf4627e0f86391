//! Error types for capture, store and diff runs
//!
//! Flat, like the DOM and CDP errors underneath. Every variant names the
//! artifact or URL it is about so batch results stay readable.

use std::path::PathBuf;
use thiserror::Error;

use dom::{DomError, Side, Timestamp};

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Render failure on {url}: {message}")]
    RenderFailure { url: String, message: String },

    #[error("Snapshot of {url} at {time} already exists")]
    AlreadyExists { url: String, time: Timestamp },

    #[error("No {side:?} snapshot for {path_name} at {time}")]
    MissingSnapshot {
        side: Side,
        time: Timestamp,
        path_name: String,
    },

    #[error("Malformed artifact {path}: {source}")]
    MalformedArtifact {
        path: PathBuf,
        #[source]
        source: DomError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MonitorError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn render(url: impl Into<String>, error: impl std::fmt::Display) -> Self {
        MonitorError::RenderFailure {
            url: url.into(),
            message: error.to_string(),
        }
    }

    /// Re-capturing an existing key; callers may treat this as success
    pub fn is_already_exists(&self) -> bool {
        matches!(self, MonitorError::AlreadyExists { .. })
    }

    /// Which side of a diff pair was not recorded
    pub fn missing_side(&self) -> Option<Side> {
        match self {
            MonitorError::MissingSnapshot { side, .. } => Some(*side),
            _ => None,
        }
    }
}
