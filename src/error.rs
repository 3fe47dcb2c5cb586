use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stable error identities a consumer is expected to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CapacityReached,
    NotFound,
    ParseFailure,
    ExecFailure,
    Cancelled,
    DeadlineExceeded,
    UnsupportedPlatform,
    InvalidOption,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CapacityReached => "capacity-reached",
            ErrorKind::NotFound => "not-found",
            ErrorKind::ParseFailure => "parse-failure",
            ErrorKind::ExecFailure => "exec-failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::UnsupportedPlatform => "unsupported-platform",
            ErrorKind::InvalidOption => "invalid-option",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum MediavisorError {
    #[error("Process limit reached ({max} running)")]
    CapacityReached { max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("{program} exited with {status}: {diagnostics}")]
    ExecFailure {
        program: String,
        status: String,
        diagnostics: String,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Supervisor is closed")]
    Closed,

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("failed to create chunk {index}: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<MediavisorError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediavisorError {
    /// Map this error onto its stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediavisorError::CapacityReached { .. } => ErrorKind::CapacityReached,
            MediavisorError::NotFound(_) => ErrorKind::NotFound,
            MediavisorError::ParseFailure(_) | MediavisorError::Json(_) => ErrorKind::ParseFailure,
            MediavisorError::ExecFailure { .. } | MediavisorError::Spawn { .. } => {
                ErrorKind::ExecFailure
            }
            MediavisorError::Cancelled | MediavisorError::Closed => ErrorKind::Cancelled,
            MediavisorError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            MediavisorError::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            MediavisorError::InvalidOption(_) | MediavisorError::Config(_) => {
                ErrorKind::InvalidOption
            }
            MediavisorError::Chunk { source, .. } => source.kind(),
            MediavisorError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            MediavisorError::Io(_) => ErrorKind::ExecFailure,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        MediavisorError::InvalidOption(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MediavisorError>;
