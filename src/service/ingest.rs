//! Upload batch handling.

use crate::assembler::ProjectLocation;
use crate::batch_tracker::{ChunkOutcome, StartOutcome};
use crate::error::{Error, Result};
use crate::types::{Event, SessionId, UploadBatch, UploadReceipt};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use super::CaptureRelay;

/// A file left out of a batch because it failed validation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkippedFile {
    path: String,
    reason: String,
}

/// Per-batch summary written next to the uploaded files
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchStatusFile<'a> {
    session_id: &'a SessionId,
    batch_index: u32,
    batch_total: u32,
    stored_files: Vec<String>,
    skipped_files: &'a [SkippedFile],
    timestamp: chrono::DateTime<Utc>,
}

impl CaptureRelay {
    /// Accept one batch of an upload session
    ///
    /// Files are validated and stored one by one; a file that fails validation is
    /// skipped and counted, the rest of the batch still goes through. The batch is then
    /// recorded against its session. When it is the last outstanding batch, the session's
    /// artifacts are scanned, packaged and published before this returns, and the
    /// receipt carries the [`RelayReport`](crate::types::RelayReport). A failed publish is
    /// reported in the receipt and never fails the upload.
    ///
    /// A batch for a session that already completed or expired stores nothing and
    /// returns a receipt with `accepted` false.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::InvalidRequest`] for malformed batches
    /// - [`Error::Validation`] if the project or subcategory names are unsafe
    /// - [`Error::InsufficientSpace`] if the batch does not fit on disk
    /// - [`Error::Session`] for inconsistent or out-of-range session data
    /// - [`Error::Io`] if a file cannot be written (the batch is not recorded)
    pub async fn upload_batch(&self, batch: UploadBatch) -> Result<UploadReceipt> {
        if !self.lifecycle.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        batch.validate()?;

        let session_id = batch.session_id.clone().unwrap_or_else(SessionId::generate);
        let location = ProjectLocation::new(
            batch.category,
            batch.subcategory.clone(),
            batch.project.name.clone(),
        );
        let project_dir = self.assembler.project_dir(&location)?;
        self.monitor.ensure_space(batch.payload_bytes())?;

        let started = self
            .tracker
            .start(&session_id, &batch.project.name, batch.batch_total)
            .await?;
        match started {
            StartOutcome::Created => self.emit(Event::SessionStarted {
                id: session_id.clone(),
                expected: batch.batch_total,
            }),
            StartOutcome::Existing => {}
            StartOutcome::Ended(status) => {
                tracing::info!(
                    session_id = %session_id,
                    batch_index = batch.batch_index,
                    ?status,
                    "batch for ended session ignored"
                );
                return Ok(UploadReceipt {
                    session_id,
                    accepted: false,
                    session_complete: false,
                    accepted_file_count: 0,
                    skipped_file_count: 0,
                    relay: None,
                });
            }
        }

        let UploadBatch {
            batch_index,
            batch_total,
            project,
            files,
            ..
        } = batch;

        let mut stored = Vec::with_capacity(files.len());
        let mut skipped = Vec::new();
        for file in files {
            match self
                .assembler
                .store(
                    &location,
                    file.track_tag.as_deref(),
                    &file.relative_path,
                    file.bytes,
                )
                .await
            {
                Ok(path) => stored.push(path),
                Err(Error::Validation(e)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        path = %file.relative_path,
                        error = %e,
                        "skipping invalid file"
                    );
                    skipped.push(SkippedFile {
                        path: file.relative_path,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "failed to store upload");
                    return Err(e);
                }
            }
        }

        if self.config.storage.write_batch_status {
            self.write_batch_status(
                &project_dir,
                &session_id,
                batch_index,
                batch_total,
                &stored,
                &skipped,
            )
            .await;
        }

        let accepted_file_count = stored.len();
        let outcome = self
            .tracker
            .add_chunk(&session_id, batch_index, stored)
            .await?;

        let (accepted, relay) = match outcome {
            ChunkOutcome::Duplicate { received, expected } => {
                tracing::info!(session_id = %session_id, batch_index, received, expected, "batch redelivered");
                (false, None)
            }
            ChunkOutcome::Ended { status } => {
                tracing::info!(session_id = %session_id, batch_index, ?status, "session ended while batch was stored");
                (false, None)
            }
            ChunkOutcome::Pending { received, expected } => {
                tracing::info!(session_id = %session_id, batch_index, received, expected, "batch stored");
                self.emit(Event::ChunkApplied {
                    id: session_id.clone(),
                    index: batch_index,
                    received,
                    expected,
                });
                (true, None)
            }
            ChunkOutcome::Complete(done) => {
                self.emit(Event::ChunkApplied {
                    id: session_id.clone(),
                    index: batch_index,
                    received: done.expected,
                    expected: done.expected,
                });
                self.emit(Event::SessionCompleted {
                    id: session_id.clone(),
                    file_count: done.files.len(),
                });
                let report = self.relay_completed(&done, &project, &project_dir).await;
                (true, Some(report))
            }
        };

        Ok(UploadReceipt {
            session_id,
            accepted,
            session_complete: relay.is_some(),
            accepted_file_count,
            skipped_file_count: skipped.len(),
            relay,
        })
    }

    async fn write_batch_status(
        &self,
        project_dir: &Path,
        session_id: &SessionId,
        batch_index: u32,
        batch_total: u32,
        stored: &[PathBuf],
        skipped: &[SkippedFile],
    ) {
        let status = BatchStatusFile {
            session_id,
            batch_index,
            batch_total,
            stored_files: stored
                .iter()
                .map(|p| {
                    p.strip_prefix(project_dir)
                        .unwrap_or(p)
                        .to_string_lossy()
                        .into_owned()
                })
                .collect(),
            skipped_files: skipped,
            timestamp: Utc::now(),
        };

        let path = project_dir.join(format!("upload_status_{batch_index}.json"));
        let result = async {
            let json = serde_json::to_vec_pretty(&status)?;
            tokio::fs::create_dir_all(project_dir).await?;
            tokio::fs::write(&path, json).await?;
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write batch status file");
        }
    }
}
