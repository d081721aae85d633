//! Error types for capture-relay
//!
//! This module provides the error taxonomy used throughout the library:
//! - Validation errors for individual files (recovered, the file is skipped)
//! - Session errors for batch bookkeeping (the call is rejected)
//! - Relay errors for the publish channel (reported as delivery warnings)
//! - Fatal errors (I/O, disk space) that abort the current operation
//!
//! [`Error::kind`] maps every error onto one of these classes so callers can
//! decide how to surface it without matching on every variant.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::SessionId;

/// Result type alias for capture-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for capture-relay
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "relay.port")
        key: Option<String>,
    },

    /// A single uploaded file was rejected
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Session bookkeeping rejected the request
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Publishing to the relay broker failed
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Artifact discovery or packaging failed
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Malformed upload request rejected at the boundary
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new uploads
    #[error("shutdown in progress: not accepting new uploads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Per-file validation failures
///
/// These never fail a whole upload: the offending file is skipped and the
/// remaining files of the batch are still stored.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Payload is empty, not an accepted type, or not a decodable image
    #[error("invalid payload for {path}: {reason}")]
    InvalidPayload {
        /// The declared relative path of the rejected file
        path: String,
        /// Why the payload was rejected
        reason: String,
    },

    /// Path would escape the project directory
    #[error("unsafe path {path}: {reason}")]
    UnsafePath {
        /// The offending path or path segment
        path: String,
        /// Why the path was rejected
        reason: String,
    },
}

/// Session bookkeeping errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Chunk arrived for a session that was never started (or already finished)
    #[error("unknown session {id}")]
    UnknownSession {
        /// The session id that was not found
        id: SessionId,
    },

    /// Session restarted with a different chunk count
    #[error("session {id} expects {existing} chunks, request declared {requested}")]
    InconsistentBatchSize {
        /// The session id
        id: SessionId,
        /// Chunk count recorded when the session was started
        existing: u32,
        /// Chunk count declared by the rejected request
        requested: u32,
    },

    /// Session declared with zero chunks
    #[error("session {id} must expect at least one chunk")]
    InvalidBatchSize {
        /// The session id
        id: SessionId,
    },

    /// Chunk index outside `0..expected`
    #[error("chunk {index} is out of range for session {id} ({expected} chunks)")]
    ChunkOutOfRange {
        /// The session id
        id: SessionId,
        /// The rejected chunk index
        index: u32,
        /// Number of chunks the session expects
        expected: u32,
    },
}

/// Relay publish channel errors
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// No live broker connection; the message was not sent
    #[error("relay broker is not connected")]
    NotConnected,

    /// The publish did not finish within its time bound
    #[error("publish timed out after {}ms", after.as_millis())]
    Timeout {
        /// The bound that was exceeded
        after: Duration,
    },

    /// Transport-level failure while talking to the broker
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker refused the connection handshake
    #[error("broker rejected connection: {0}")]
    Rejected(String),

    /// The link dropped while a publish was waiting for acknowledgement
    #[error("relay link closed")]
    LinkClosed,
}

/// Artifact discovery and packaging errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// `pack` was called without any files
    #[error("no files to package")]
    EmptyInput,

    /// Writing the archive failed
    #[error("failed to write archive {archive}: {reason}")]
    Archive {
        /// The archive being written
        archive: PathBuf,
        /// The reason the write failed
        reason: String,
    },
}

/// Coarse error classes used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// File-level problem; skip the file and continue
    Validation,
    /// Session bookkeeping rejected the call
    Session,
    /// Relay delivery problem; never fails an upload
    Transport,
    /// Malformed request or configuration
    Request,
    /// Disk, permission or internal failure; abort the operation
    Fatal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Session(_) => ErrorKind::Session,
            Error::Relay(_) => ErrorKind::Transport,
            Error::InvalidRequest(_) | Error::Config { .. } | Error::ShuttingDown => {
                ErrorKind::Request
            }
            Error::Artifact(ArtifactError::EmptyInput) => ErrorKind::Validation,
            Error::Artifact(ArtifactError::Archive { .. })
            | Error::Io(_)
            | Error::InsufficientSpace { .. }
            | Error::DiskSpaceCheckFailed(_)
            | Error::Serialization(_)
            | Error::Other(_) => ErrorKind::Fatal,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Validation(e) => match e {
                ValidationError::InvalidPayload { .. } => "invalid_payload",
                ValidationError::UnsafePath { .. } => "unsafe_path",
            },
            Error::Session(e) => match e {
                SessionError::UnknownSession { .. } => "unknown_session",
                SessionError::InconsistentBatchSize { .. } => "inconsistent_batch_size",
                SessionError::InvalidBatchSize { .. } => "invalid_batch_size",
                SessionError::ChunkOutOfRange { .. } => "chunk_out_of_range",
            },
            Error::Relay(e) => match e {
                RelayError::NotConnected => "not_connected",
                RelayError::Timeout { .. } => "publish_timeout",
                RelayError::Transport(_) => "transport_error",
                RelayError::Rejected(_) => "connection_rejected",
                RelayError::LinkClosed => "link_closed",
            },
            Error::Artifact(e) => match e {
                ArtifactError::EmptyInput => "empty_input",
                ArtifactError::Archive { .. } => "archive_failed",
            },
            Error::InvalidRequest(_) => "invalid_request",
            Error::Io(_) => "io_error",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}
