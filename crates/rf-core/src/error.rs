//! The error type shared by every reelforge crate.
//!
//! Caller mistakes map to 4xx statuses through [`Error::http_status`] for
//! whatever front end sits on top. Execution failures are split into
//! transient and fatal by [`Error::is_retryable`].

use std::fmt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unknown quality, format or priority, or a malformed id.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The video is already being processed, or otherwise in the wrong state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {source}")]
    Database {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// ffmpeg or ffprobe exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    /// The source could not be probed for metadata.
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Missing engine binary or an unusable setting.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status an HTTP layer would answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Probe(_) => 422,
            Error::Tool { .. } => 502,
            Error::Timeout { .. } => 504,
            Error::Database { .. }
            | Error::Io { .. }
            | Error::Storage(_)
            | Error::Config(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Whether a job that failed with this error may be attempted again.
    ///
    /// Non-zero tool exits, I/O failures, timeouts and database hiccups are
    /// transient. Caller mistakes, unreadable media and broken configuration
    /// (missing binary, unreachable storage) are fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Tool { .. } | Error::Io { .. } | Error::Timeout { .. } | Error::Database { .. } => {
                true
            }
            Error::NotFound { .. }
            | Error::Validation(_)
            | Error::Conflict(_)
            | Error::Probe(_)
            | Error::Storage(_)
            | Error::Config(_)
            | Error::Internal(_) => false,
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            what: what.into(),
            after,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
