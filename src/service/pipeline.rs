//! Scan → pack → publish for completed sessions.

use crate::artifacts::PackedArchive;
use crate::batch_tracker::CompletedSession;
use crate::error::{Error, Result};
use crate::relay::RelayEnvelope;
use crate::types::{DeliveryStatus, Event, ProjectInfo, RelayReport, SessionId};
use std::path::{Path, PathBuf};

use super::CaptureRelay;

impl CaptureRelay {
    /// Relay the artifacts of a session that just completed
    ///
    /// Never fails: scan and pack errors become an error message to consumers, and a
    /// failed publish is recorded in the report's delivery status.
    pub(crate) async fn relay_completed(
        &self,
        session: &CompletedSession,
        project: &ProjectInfo,
        project_dir: &Path,
    ) -> RelayReport {
        let roots = self.scan_roots(project_dir);
        // Dropping the archive at the end of this function removes it from disk
        let (envelope, file_count, _archive) = match self.package(&session.id, &roots).await {
            Ok(None) => {
                tracing::info!(session_id = %session.id, "no artifact files found");
                (RelayEnvelope::no_artifact(&session.id, project), 0, None)
            }
            Ok(Some((archive, data))) => {
                let count = archive.file_count();
                tracing::info!(
                    session_id = %session.id,
                    archive = %archive.file_name(),
                    size = archive.size(),
                    files = count,
                    "artifacts packaged"
                );
                let envelope =
                    RelayEnvelope::artifact(&session.id, project, archive.file_name(), &data, count);
                (envelope, count, Some(archive))
            }
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "failed to package artifacts");
                (RelayEnvelope::error(&session.id, project, e.to_string()), 0, None)
            }
        };
        let outcome = envelope.kind;

        let delivery = match self.publisher.publish(&envelope).await {
            Ok(()) => {
                self.emit(Event::ArtifactRelayed {
                    id: session.id.clone(),
                    outcome,
                });
                DeliveryStatus::Delivered
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "relay message not delivered, uploaded files are kept"
                );
                self.emit(Event::RelayFailed {
                    id: session.id.clone(),
                    error: e.to_string(),
                });
                DeliveryStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        RelayReport {
            outcome,
            file_count,
            delivery,
        }
    }

    /// Directories scanned for a session's artifacts
    ///
    /// The configured roots, or the session's own project directory when none are set.
    pub(crate) fn scan_roots(&self, project_dir: &Path) -> Vec<PathBuf> {
        if self.config.artifacts.scan_roots.is_empty() {
            vec![project_dir.to_path_buf()]
        } else {
            self.config.artifacts.scan_roots.clone()
        }
    }

    /// Scan `roots` and pack what is found, returning the archive and its bytes
    async fn package(
        &self,
        id: &SessionId,
        roots: &[PathBuf],
    ) -> Result<Option<(PackedArchive, Vec<u8>)>> {
        let scanner = self.scanner.clone();
        let roots = roots.to_vec();
        let found = tokio::task::spawn_blocking(move || scanner.scan(&roots).collect::<Vec<_>>())
            .await
            .map_err(|e| Error::Other(format!("artifact scan task failed: {e}")))?;

        if found.is_empty() {
            return Ok(None);
        }

        let name = archive_name(&self.config.artifacts.archive_prefix, id);
        let archive = self.packager.pack(found, &name).await?;
        let data = archive.read().await?;
        Ok(Some((archive, data)))
    }
}

/// Archive file name for a session, as consumers see it
///
/// Session ids come from clients, so anything outside `[A-Za-z0-9._-]` is replaced.
/// Different ids can map to the same name; the packager keeps their files apart.
fn archive_name(prefix: &str, id: &SessionId) -> String {
    let safe: String = id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}_{safe}.zip")
}
