use std::{path::PathBuf, time::Duration};

/// Core error type for the backup relay.
///
/// Adapter crates map their transport-specific failures into this type so the
/// orchestrators can tell "nothing was configured" from "delivery attempted and
/// failed" and decide what is retryable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local file or remote handle is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or timeout talking to the provider.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Provider answered with a structured failure (non-2xx or `ok: false`).
    #[error("rejected by telegram: {description}")]
    RemoteRejected {
        description: String,
        retry_after: Option<Duration>,
    },

    /// No resolvable credential/destination.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Record has no retrievable parts, or its credential is gone.
    #[error("backup unavailable: {0}")]
    Unavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("backup file is empty: {}", .0.display())]
    EmptyBackup(PathBuf),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Background job was dropped before it ran (queue shut down).
    #[error("backup job cancelled")]
    JobCancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn rejected(description: impl Into<String>) -> Self {
        Error::RemoteRejected {
            description: description.into(),
            retry_after: None,
        }
    }

    /// Provider-requested back-off, if this is a rate-limit rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RemoteRejected { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
