use crate::types::{ProjectInfo, RelayOutcome, SessionId};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire message sent to relay consumers
///
/// Serialized as camelCase JSON. Archive bytes travel base64-encoded in `fileData`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    /// Message kind (`artifact`, `no_artifact` or `error`)
    #[serde(rename = "type")]
    pub kind: RelayOutcome,

    /// Session the message belongs to
    pub correlation_id: SessionId,

    /// When the message was built
    pub timestamp: DateTime<Utc>,

    /// Archive file name (artifact messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Base64 archive contents (artifact messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,

    /// Human-readable note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error text (error messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Project metadata supplied with the upload
    pub project_info: serde_json::Value,
}

impl RelayEnvelope {
    fn base(kind: RelayOutcome, id: &SessionId, project: &ProjectInfo) -> Self {
        Self {
            kind,
            correlation_id: id.clone(),
            timestamp: Utc::now(),
            file_name: None,
            file_data: None,
            message: None,
            error: None,
            project_info: project.to_value(),
        }
    }

    /// Message carrying a packaged archive
    pub fn artifact(
        id: &SessionId,
        project: &ProjectInfo,
        file_name: impl Into<String>,
        archive: &[u8],
        file_count: usize,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            file_data: Some(BASE64.encode(archive)),
            message: Some(format!("{file_count} artifact file(s) packaged")),
            ..Self::base(RelayOutcome::Artifact, id, project)
        }
    }

    /// Message saying the scan found nothing
    pub fn no_artifact(id: &SessionId, project: &ProjectInfo) -> Self {
        Self {
            message: Some("no artifact files found".to_string()),
            ..Self::base(RelayOutcome::NoArtifact, id, project)
        }
    }

    /// Message reporting that scanning or packaging failed
    pub fn error(id: &SessionId, project: &ProjectInfo, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(RelayOutcome::Error, id, project)
        }
    }

    /// Decode the archive carried by an artifact message
    pub fn decode_file_data(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.file_data.as_deref().map(|data| BASE64.decode(data))
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectInfo {
        ProjectInfo::parse(r#"{"name":"bridge","site":"north"}"#).unwrap()
    }

    #[test]
    fn artifact_envelope_uses_camel_case_wire_names() {
        let id = SessionId::from("s-42");
        let envelope = RelayEnvelope::artifact(&id, &project(), "ply_files_s-42.zip", b"PK\x03\x04", 3);
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(json["type"], "artifact");
        assert_eq!(json["correlationId"], "s-42");
        assert_eq!(json["fileName"], "ply_files_s-42.zip");
        assert_eq!(json["fileData"], "UEsDBA==");
        assert_eq!(json["projectInfo"]["name"], "bridge");
        assert_eq!(json["projectInfo"]["site"], "north");
        assert!(json.get("error").is_none());
        assert!(
            DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok(),
            "timestamp should be RFC 3339"
        );
    }

    #[test]
    fn no_artifact_envelope_has_no_payload() {
        let envelope = RelayEnvelope::no_artifact(&SessionId::from("s1"), &project());
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "no_artifact");
        assert!(json.get("fileData").is_none());
        assert!(json.get("fileName").is_none());
        assert!(envelope.decode_file_data().is_none());
    }

    #[test]
    fn error_envelope_carries_error_text() {
        let envelope = RelayEnvelope::error(&SessionId::from("s1"), &project(), "disk full");
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "disk full");
    }

    #[test]
    fn archive_bytes_survive_the_wire() {
        let archive: Vec<u8> = (0..=255).collect();
        let envelope = RelayEnvelope::artifact(&SessionId::from("s1"), &project(), "a.zip", &archive, 1);
        let parsed = RelayEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed.correlation_id, SessionId::from("s1"));
        assert_eq!(parsed.decode_file_data().unwrap().unwrap(), archive);
    }
}
