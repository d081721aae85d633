//! Storage health: directory presence and free disk space
//!
//! The upload tree can be removed or unmounted underneath a long-running service.
//! [`StorageMonitor`] periodically recreates the expected directories and logs how much
//! space is left, and also provides the per-upload space precheck.

use crate::config::{DiskSpaceConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::types::Category;
use crate::utils::{get_available_space, nearest_existing_dir};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// How free space compares to the configured minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceLevel {
    /// At least twice the minimum is free
    Healthy,
    /// Below twice the minimum
    Low,
    /// Below the minimum
    Critical,
}

impl SpaceLevel {
    fn classify(available: u64, minimum: u64) -> Self {
        if available < minimum {
            SpaceLevel::Critical
        } else if available < minimum.saturating_mul(2) {
            SpaceLevel::Low
        } else {
            SpaceLevel::Healthy
        }
    }
}

/// Result of one storage check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageReport {
    /// Directories that were missing and have been recreated
    pub recreated: Vec<PathBuf>,
    /// Free bytes on the upload volume, if they could be determined
    pub available_bytes: Option<u64>,
    /// Classification of `available_bytes`
    pub level: Option<SpaceLevel>,
}

/// Watches the upload tree and its volume
#[derive(Clone, Debug)]
pub struct StorageMonitor {
    upload_root: PathBuf,
    work_dir: PathBuf,
    config: DiskSpaceConfig,
}

impl StorageMonitor {
    /// Create a monitor for the configured directories
    pub fn new(storage: &StorageConfig, disk_space: &DiskSpaceConfig) -> Self {
        Self {
            upload_root: storage.upload_root.clone(),
            work_dir: storage.work_dir.clone(),
            config: disk_space.clone(),
        }
    }

    fn required_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.upload_root.clone()];
        dirs.extend(
            [Category::Model, Category::Process]
                .iter()
                .map(|c| self.upload_root.join(c.dir_name())),
        );
        dirs.push(self.work_dir.clone());
        dirs
    }

    /// Create any missing directories and report free space
    pub async fn check_once(&self) -> StorageReport {
        let mut recreated = Vec::new();
        for dir in self.required_dirs() {
            match tokio::fs::try_exists(&dir).await {
                Ok(true) => {}
                Ok(false) => match tokio::fs::create_dir_all(&dir).await {
                    Ok(()) => {
                        tracing::warn!(path = %dir.display(), "directory was missing and has been recreated");
                        recreated.push(dir);
                    }
                    Err(e) => {
                        tracing::error!(path = %dir.display(), error = %e, "failed to recreate directory");
                    }
                },
                Err(e) => {
                    tracing::error!(path = %dir.display(), error = %e, "failed to check directory");
                }
            }
        }

        if !self.config.enabled {
            return StorageReport {
                recreated,
                available_bytes: None,
                level: None,
            };
        }

        let available = match get_available_space(&self.upload_root) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(path = %self.upload_root.display(), error = %e, "failed to check disk space");
                return StorageReport {
                    recreated,
                    available_bytes: None,
                    level: None,
                };
            }
        };

        let level = SpaceLevel::classify(available, self.config.min_free_space);
        let free_gb = available as f64 / BYTES_PER_GB;
        let min_gb = self.config.min_free_space as f64 / BYTES_PER_GB;
        match level {
            SpaceLevel::Healthy => tracing::info!(free_gb, "disk space check"),
            SpaceLevel::Low => {
                tracing::warn!(free_gb, warn_below_gb = min_gb * 2.0, "disk space is running low")
            }
            SpaceLevel::Critical => {
                tracing::error!(free_gb, min_gb, "disk space below minimum")
            }
        }

        StorageReport {
            recreated,
            available_bytes: Some(available),
            level: Some(level),
        }
    }

    /// Fail if storing `incoming` bytes would eat into the minimum free space
    ///
    /// # Errors
    ///
    /// - [`Error::InsufficientSpace`] when there is not enough room
    /// - [`Error::DiskSpaceCheckFailed`] when free space cannot be determined
    pub fn ensure_space(&self, incoming: u64) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let check_path = nearest_existing_dir(&self.upload_root).ok_or_else(|| {
            Error::DiskSpaceCheckFailed(format!(
                "no existing directory above '{}'",
                self.upload_root.display()
            ))
        })?;

        let available = get_available_space(check_path).map_err(|e| {
            Error::DiskSpaceCheckFailed(format!(
                "failed to check disk space for '{}': {}",
                check_path.display(),
                e
            ))
        })?;

        let required = incoming.saturating_add(self.config.min_free_space);
        if available < required {
            return Err(Error::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Check immediately, then every `check_interval`, until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let period = if self.config.check_interval.is_zero() {
            Duration::from_secs(300)
        } else {
            self.config.check_interval
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_once().await;
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("storage monitor stopped");
                    break;
                }
            }
        }
    }

    /// Upload root this monitor watches
    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }
}
