//! Core types for capture-relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Unique identifier for an upload session
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new SessionId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random session id for single-batch uploads that arrive without one
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Top-level storage category of an upload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Model capture
    Model,
    /// Process capture (anything that is not a model upload)
    #[default]
    Process,
}

impl Category {
    /// Directory name for this category under the upload root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Model => "model",
            Category::Process => "process",
        }
    }

    /// Parse the loosely-typed category field sent by capture clients.
    ///
    /// Only the literal `model` selects [`Category::Model`]; everything else is a process upload.
    pub fn from_client_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("model") {
            Category::Model
        } else {
            Category::Process
        }
    }
}

/// Session lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Still receiving chunks
    Collecting,
    /// Every expected chunk has been applied
    Complete,
    /// Evicted by the sweeper before completing
    Expired,
}

/// Delivery guarantee attached to a published message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryLevel {
    /// Fire and forget (MQTT QoS 0)
    AtMostOnce,
    /// Wait for the broker acknowledgement (MQTT QoS 1)
    #[default]
    AtLeastOnce,
}

/// Relay broker connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link to the broker
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Link established; publishes are accepted
    Connected,
}

/// Caller-supplied project metadata
///
/// `name` is required and selects the project directory; every other key is kept
/// verbatim and echoed back to relay consumers as `projectInfo`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project name (directory name under the category/subcategory)
    pub name: String,

    /// Any additional metadata the client attached
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProjectInfo {
    /// Create project metadata with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Parse the project metadata JSON sent alongside an upload
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the JSON is malformed or lacks a non-empty `name`.
    pub fn parse(json: &str) -> Result<Self> {
        let info: ProjectInfo = serde_json::from_str(json)
            .map_err(|e| Error::InvalidRequest(format!("invalid project metadata: {e}")))?;
        if info.name.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "project metadata must include a non-empty name".to_string(),
            ));
        }
        Ok(info)
    }

    /// The metadata as a JSON object, name included
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// One file inside an upload batch
#[derive(Clone, Debug)]
pub struct UploadFile {
    /// Destination path relative to the project (or track) directory
    pub relative_path: String,
    /// Track the file belongs to, if any
    pub track_tag: Option<String>,
    /// File contents
    pub bytes: Vec<u8>,
}

/// One network call's worth of files belonging to a session
#[derive(Clone, Debug)]
pub struct UploadBatch {
    /// Session this batch belongs to (may be omitted for single-batch uploads)
    pub session_id: Option<SessionId>,
    /// Zero-based chunk index within the session
    pub batch_index: u32,
    /// Number of chunks the session consists of
    pub batch_total: u32,
    /// Storage category
    pub category: Category,
    /// Subcategory directory (the client's free-form "value" field)
    pub subcategory: String,
    /// Project metadata
    pub project: ProjectInfo,
    /// Files in this chunk
    pub files: Vec<UploadFile>,
}

impl UploadBatch {
    /// Validate the batch before it enters the core
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.batch_total == 0 {
            return Err(Error::InvalidRequest(
                "batch_total must be at least 1".to_string(),
            ));
        }
        if self.batch_index >= self.batch_total {
            return Err(Error::InvalidRequest(format!(
                "batch_index {} is out of range for {} batches",
                self.batch_index, self.batch_total
            )));
        }
        if self.session_id.is_none() && self.batch_total > 1 {
            return Err(Error::InvalidRequest(
                "session_id is required for multi-batch uploads".to_string(),
            ));
        }
        if self.subcategory.trim().is_empty() {
            return Err(Error::InvalidRequest("subcategory is required".to_string()));
        }
        if self.project.name.trim().is_empty() {
            return Err(Error::InvalidRequest("project name is required".to_string()));
        }
        if self.files.is_empty() {
            return Err(Error::InvalidRequest("no files received".to_string()));
        }
        Ok(())
    }

    /// Total payload size of the batch in bytes
    pub fn payload_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes.len() as u64).sum()
    }
}

/// Kind of relay message sent for a completed session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayOutcome {
    /// Artifacts were found, packaged and sent
    Artifact,
    /// The scan found nothing to send
    NoArtifact,
    /// Scanning or packaging failed
    Error,
}

/// Whether the relay message reached the broker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The broker accepted the message
    Delivered,
    /// The message was not delivered; uploaded files remain on disk
    Failed {
        /// Why delivery failed
        reason: String,
    },
}

impl DeliveryStatus {
    /// Whether the message was delivered
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }
}

/// Result of the scan → pack → publish pipeline for one completed session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    /// What kind of message was sent
    pub outcome: RelayOutcome,
    /// Number of artifact files packaged
    pub file_count: usize,
    /// Delivery result (a failure here is a warning, not an upload failure)
    pub delivery: DeliveryStatus,
}

/// Response to an upload batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Session the batch was applied to
    pub session_id: SessionId,
    /// Whether this chunk was newly applied (false for a redelivered chunk)
    pub accepted: bool,
    /// Whether this chunk completed the session
    pub session_complete: bool,
    /// Number of files stored from this batch
    pub accepted_file_count: usize,
    /// Number of files skipped because they failed validation
    pub skipped_file_count: usize,
    /// Relay result, present only when this chunk completed the session
    pub relay: Option<RelayReport>,
}

/// Progress snapshot of a collecting session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    /// Distinct chunks applied so far
    pub received_count: u32,
    /// Chunks the session expects
    pub expected_count: u32,
    /// Current status
    pub status: SessionStatus,
}

/// Answer to a per-session status query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    /// Distinct chunks applied so far
    pub received_count: u32,
    /// Chunks the session expects
    pub expected_count: u32,
    /// Whether the relay broker is currently connected
    pub relay_connected: bool,
}

/// Service-wide status
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Relay connection state
    pub relay_state: ConnectionState,
    /// Broker address as `host:port`
    pub broker: String,
    /// Topic artifacts are published to
    pub topic: String,
    /// Sessions currently collecting
    pub active_sessions: usize,
    /// Directories scanned for artifacts
    pub scan_roots: Vec<PathBuf>,
    /// Whether the service is shutting down
    pub shutting_down: bool,
}

/// Events emitted during the upload and relay lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new session was created
    SessionStarted {
        /// Session id
        id: SessionId,
        /// Chunks the session expects
        expected: u32,
    },

    /// A chunk was applied to a session
    ChunkApplied {
        /// Session id
        id: SessionId,
        /// Chunk index
        index: u32,
        /// Distinct chunks applied so far
        received: u32,
        /// Chunks the session expects
        expected: u32,
    },

    /// A session received its final chunk
    SessionCompleted {
        /// Session id
        id: SessionId,
        /// Number of files stored across all chunks
        file_count: usize,
    },

    /// A session was evicted before completing
    SessionExpired {
        /// Session id
        id: SessionId,
    },

    /// The relay message for a session reached the broker
    ArtifactRelayed {
        /// Session id
        id: SessionId,
        /// What kind of message was sent
        outcome: RelayOutcome,
    },

    /// The relay message for a session could not be delivered
    RelayFailed {
        /// Session id
        id: SessionId,
        /// Why delivery failed
        error: String,
    },

    /// The broker connection changed state
    ConnectionChanged {
        /// New state
        state: ConnectionState,
    },

    /// The service is shutting down
    Shutdown,
}
