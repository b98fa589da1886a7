//! Error types for codepub operations.
//!
//! Every failure the library can report is a `PublishError`. Connection-closed
//! is deliberately *not* an error: the codec reports it as
//! `wire::Incoming::Closed` so loops can stop without treating a clean hangup
//! as a fault.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for codepub operations
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed header line: {line:?}")]
    MalformedHeader { line: String },

    #[error("Invalid content-length: {value:?}")]
    InvalidContentLength { value: String },

    #[error("Message body is not valid UTF-8")]
    BodyNotUtf8,

    #[error("Unsafe remote path: {path} ({reason})")]
    UnsafePath { path: String, reason: &'static str },

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Partial transfer of {}: declared {declared} bytes, sent {sent}", path.display())]
    PartialTransfer {
        path: PathBuf,
        declared: u64,
        sent: u64,
    },

    #[error("Failed to store received file {path}: {source}")]
    ReceiveFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gave up connecting to {addr} after {attempts} attempts")]
    ConnectTimeout { addr: String, attempts: u32 },

    #[error("Connect to {addr} cancelled")]
    ConnectCancelled { addr: String },

    #[error("Server at capacity ({backlog} connections queued)")]
    AtCapacity { backlog: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Analysis failed: {message}")]
    Analysis { message: String },

    #[error("Invalid file pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

impl PublishError {
    /// True for failures that leave the byte stream out of frame, after which
    /// the connection must be dropped rather than reused.
    pub fn breaks_framing(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::MalformedHeader { .. }
                | Self::InvalidContentLength { .. }
                | Self::PartialTransfer { .. }
        )
    }
}

impl From<toml::de::Error> for PublishError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type alias for codepub operations
pub type Result<T> = std::result::Result<T, PublishError>;
