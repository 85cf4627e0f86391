//! Error types for DOM, walk and diff operations
//!
//! Simple, flat error hierarchy. No over-engineering.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Debug, Error)]
pub enum DomError {
    #[error("Node not found: {0}")]
    NodeNotFound(u32),

    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No element matches root selector `{0}`")]
    RootNotFound(String),

    #[error("Root `{0}` matches an exclude or remove selector")]
    RootExcluded(String),

    #[error("Malformed page dump: {0}")]
    MalformedDump(String),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Unsupported snapshot schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u64, expected: u32 },

    #[error("Change path {path:?} does not resolve: {reason}")]
    InvalidPath { path: Vec<usize>, reason: String },
}
