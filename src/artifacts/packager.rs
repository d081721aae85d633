use crate::error::{ArtifactError, Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::CompressionMethod;
use zip::write::FileOptions;

/// A zip archive on disk that is deleted when dropped
///
/// The archive only exists to be read into a relay message. Whatever happens to that
/// message, the file goes away with this value. The on-disk name is unique per pack;
/// [`file_name`](Self::file_name) is the name consumers see.
#[derive(Debug)]
pub struct PackedArchive {
    path: PathBuf,
    name: String,
    size: u64,
    file_count: usize,
}

impl PackedArchive {
    /// Location of the archive
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of entries in the archive
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Archive name as requested from [`ArtifactPackager::pack`]
    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// Read the whole archive into memory
    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

impl Drop for PackedArchive {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "archive removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove archive")
            }
        }
    }
}

/// Bundles artifact files into one deflate-compressed zip archive
#[derive(Clone, Debug)]
pub struct ArtifactPackager {
    work_dir: PathBuf,
}

impl ArtifactPackager {
    /// Create a packager writing archives into `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Package `files` into an archive named `archive_name`
    ///
    /// The file is written under `work_dir` with a random prefix, so packs sharing a
    /// name never touch each other's file. Entries are stored under their base file
    /// name only. When two inputs share a base name, the later one in `files` wins.
    ///
    /// # Errors
    ///
    /// - [`ArtifactError::EmptyInput`] if `files` is empty
    /// - [`ArtifactError::Archive`] if the archive cannot be written (no file is left behind)
    pub async fn pack(&self, files: Vec<PathBuf>, archive_name: &str) -> Result<PackedArchive> {
        if files.is_empty() {
            return Err(ArtifactError::EmptyInput.into());
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let archive = self
            .work_dir
            .join(format!(".{}.{archive_name}", uuid::Uuid::new_v4()));
        let entries = dedupe_by_name(files);
        let file_count = entries.len();

        let target = archive.clone();
        let written = tokio::task::spawn_blocking(move || write_zip(&target, &entries))
            .await
            .map_err(|e| Error::Other(format!("archive task failed: {e}")))?;

        match written {
            Ok(size) => {
                tracing::info!(
                    archive = %archive.display(),
                    files = file_count,
                    bytes = size,
                    "artifacts packaged"
                );
                Ok(PackedArchive {
                    path: archive,
                    name: archive_name.to_string(),
                    size,
                    file_count,
                })
            }
            Err(reason) => {
                if let Err(e) = std::fs::remove_file(&archive)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %archive.display(), error = %e, "failed to remove partial archive");
                }
                Err(ArtifactError::Archive { archive, reason }.into())
            }
        }
    }
}

// Keeps first-seen order of names; a repeated name takes the later path.
fn dedupe_by_name(files: Vec<PathBuf>) -> Vec<(String, PathBuf)> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, PathBuf> = HashMap::new();

    for path in files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            tracing::warn!(path = %path.display(), "skipping artifact without a file name");
            continue;
        };
        if latest.insert(name.clone(), path).is_none() {
            order.push(name);
        }
    }

    order
        .into_iter()
        .filter_map(|name| latest.remove(&name).map(|path| (name, path)))
        .collect()
}

fn write_zip(archive: &Path, entries: &[(String, PathBuf)]) -> std::result::Result<u64, String> {
    let file = File::create(archive).map_err(|e| format!("failed to create archive: {e}"))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in entries {
        let mut source =
            File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| format!("failed to add {name}: {e}"))?;
        std::io::copy(&mut source, &mut writer)
            .map_err(|e| format!("failed to write {name}: {e}"))?;
    }

    let file = writer
        .finish()
        .map_err(|e| format!("failed to finish archive: {e}"))?;
    let size = file
        .metadata()
        .map_err(|e| format!("failed to stat archive: {e}"))?
        .len();
    Ok(size)
}
