//! Reassembles uploaded chunk payloads into the project working set
//!
//! Files land at `root/<category>/<subcategory>/<project>/[tracks/<track>/]<relative path>`.
//! Every caller-supplied path component is sanitized before it touches the filesystem,
//! image payloads are decoded before anything is written, and each write goes through a
//! temporary file in the destination directory that is renamed into place.

use crate::config::StorageConfig;
use crate::error::{Error, Result, ValidationError};
use crate::types::Category;
use crate::utils::has_extension;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const LOCK_STRIPES: usize = 64;
const TRACKS_DIR: &str = "tracks";

/// Where a project's files live, relative to the upload root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectLocation {
    /// Storage category
    pub category: Category,
    /// Subcategory directory
    pub subcategory: String,
    /// Project name
    pub project: String,
}

impl ProjectLocation {
    /// Create a location
    pub fn new(category: Category, subcategory: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            category,
            subcategory: subcategory.into(),
            project: project.into(),
        }
    }

    /// Project directory under `root`
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnsafePath`] if the subcategory or project name is not a single
    /// plain path segment.
    pub fn dir(&self, root: &Path) -> std::result::Result<PathBuf, ValidationError> {
        let subcategory = safe_segment(&self.subcategory)?;
        let project = safe_segment(&self.project)?;
        Ok(root
            .join(self.category.dir_name())
            .join(subcategory)
            .join(project))
    }
}

/// Persists individual files of an upload batch
pub struct FileAssembler {
    root: PathBuf,
    image_extensions: Vec<String>,
    accepted_extensions: Vec<String>,
    stripes: Vec<Mutex<()>>,
}

impl FileAssembler {
    /// Create an assembler writing under `config.upload_root`
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.upload_root.clone(),
            image_extensions: config.image_extensions.clone(),
            accepted_extensions: config.accepted_extensions.clone(),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Upload root this assembler writes under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project directory for `location`
    pub fn project_dir(&self, location: &ProjectLocation) -> Result<PathBuf> {
        Ok(location.dir(&self.root)?)
    }

    /// Validate and store one file, returning its final path
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnsafePath`] if any path component would escape the project
    /// - [`ValidationError::InvalidPayload`] if the payload is empty, has an extension
    ///   outside the accepted list, or is an image that does not decode
    /// - [`Error::Io`] if the file cannot be written (nothing is left behind)
    pub async fn store(
        &self,
        location: &ProjectLocation,
        track_tag: Option<&str>,
        relative_path: &str,
        payload: Vec<u8>,
    ) -> Result<PathBuf> {
        let destination = self.destination(location, track_tag, relative_path)?;
        let payload = self.validate_payload(relative_path, &destination, payload).await?;

        let _guard = self.stripe(&destination).lock().await;

        let parent = destination
            .parent()
            .ok_or_else(|| Error::Other(format!("no parent for {}", destination.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4()));

        if let Err(e) = write_then_rename(&temp, &destination, &payload).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %temp.display(), error = %cleanup, "failed to remove partial file");
            }
            return Err(e.into());
        }

        tracing::debug!(path = %destination.display(), bytes = payload.len(), "file stored");
        Ok(destination)
    }

    fn destination(
        &self,
        location: &ProjectLocation,
        track_tag: Option<&str>,
        relative_path: &str,
    ) -> std::result::Result<PathBuf, ValidationError> {
        let mut dir = location.dir(&self.root)?;
        if let Some(tag) = track_tag {
            dir = dir.join(TRACKS_DIR).join(safe_segment(tag)?);
        }
        Ok(dir.join(sanitize_relative_path(relative_path)?))
    }

    async fn validate_payload(
        &self,
        relative_path: &str,
        destination: &Path,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let invalid = |reason: String| ValidationError::InvalidPayload {
            path: relative_path.to_string(),
            reason,
        };

        if payload.is_empty() {
            return Err(invalid("empty file".to_string()).into());
        }
        if !self.accepted_extensions.is_empty()
            && !has_extension(destination, &self.accepted_extensions)
        {
            return Err(invalid("file type not accepted".to_string()).into());
        }
        if !has_extension(destination, &self.image_extensions) {
            return Ok(payload);
        }

        let decoded = tokio::task::spawn_blocking(move || {
            let result = image::load_from_memory(&payload).map(|_| ());
            (payload, result)
        })
        .await
        .map_err(|e| Error::Other(format!("image validation task failed: {e}")))?;

        match decoded {
            (payload, Ok(())) => Ok(payload),
            (_, Err(e)) => Err(invalid(format!("not a valid image: {e}")).into()),
        }
    }

    fn stripe(&self, path: &Path) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }
}

async fn write_then_rename(temp: &Path, destination: &Path, payload: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(temp, payload).await?;
    tokio::fs::rename(temp, destination).await
}

/// Turn a client-declared relative path into a safe relative [`PathBuf`]
///
/// Both `/` and `\` separate segments. Empty and `.` segments are dropped.
///
/// # Errors
///
/// [`ValidationError::UnsafePath`] for absolute paths, drive prefixes, `..` segments,
/// or a path with no usable segments.
pub fn sanitize_relative_path(raw: &str) -> std::result::Result<PathBuf, ValidationError> {
    let unsafe_path = |reason: &str| ValidationError::UnsafePath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.starts_with(['/', '\\']) {
        return Err(unsafe_path("absolute path"));
    }
    if has_drive_prefix(raw) {
        return Err(unsafe_path("drive prefix"));
    }
    if raw.contains('\0') {
        return Err(unsafe_path("NUL byte"));
    }

    let mut path = PathBuf::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(unsafe_path("parent directory segment")),
            s => path.push(s),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(unsafe_path("no file name"));
    }
    Ok(path)
}

fn safe_segment(value: &str) -> std::result::Result<&str, ValidationError> {
    let trimmed = value.trim();
    let reason = if trimmed.is_empty() {
        Some("empty name")
    } else if trimmed == "." || trimmed == ".." {
        Some("relative directory name")
    } else if trimmed.contains(['/', '\\', '\0']) {
        Some("contains a path separator")
    } else if has_drive_prefix(trimmed) {
        Some("drive prefix")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::UnsafePath {
            path: value.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(trimmed),
    }
}

fn has_drive_prefix(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
