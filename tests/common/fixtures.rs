//! Test fixtures: sample payloads, configs and ready-to-use services

use super::InMemoryBroker;
use capture_relay::{
    CaptureRelay, Category, Config, ProjectInfo, RetryConfig, SessionId, UploadBatch, UploadFile,
};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A small valid JPEG
pub fn sample_jpeg() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::new_rgb8(8, 8)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// Minimal ASCII PLY point cloud
pub const SAMPLE_PLY: &[u8] = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n";

/// Config rooted in `dir` with millisecond relay timings
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.upload_root = dir.join("uploads");
    config.storage.work_dir = dir.join("work");
    config.disk_space.min_free_space = 0;
    config.relay.client_id = "capture-relay-it".to_string();
    config.relay.connect_timeout = Duration::from_millis(500);
    config.relay.publish_timeout = Duration::from_secs(2);
    config.relay.reconnect = RetryConfig {
        max_attempts: u32::MAX,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(25),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.relay.publish_retry = RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    };
    config
}

/// Directory the fixtures' batches are stored in
pub fn project_dir(config: &Config) -> PathBuf {
    config
        .storage
        .upload_root
        .join("model")
        .join("line-3")
        .join("bridge")
}

/// One batch of the `bridge` project
pub fn upload(session: &str, index: u32, total: u32, files: &[(&str, Vec<u8>)]) -> UploadBatch {
    UploadBatch {
        session_id: Some(SessionId::from(session)),
        batch_index: index,
        batch_total: total,
        category: Category::Model,
        subcategory: "line-3".to_string(),
        project: ProjectInfo::parse(r#"{"name":"bridge","operator":"kim"}"#).unwrap(),
        files: files
            .iter()
            .map(|(path, bytes)| UploadFile {
                relative_path: path.to_string(),
                track_tag: None,
                bytes: bytes.clone(),
            })
            .collect(),
    }
}

/// Create and start a service over `broker`, waiting until the relay is connected
///
/// Returns the service and the tempdir (which must be kept alive).
pub async fn start_relay(broker: &InMemoryBroker) -> (CaptureRelay, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let relay = start_relay_with(broker, test_config(temp_dir.path())).await;
    (relay, temp_dir)
}

/// Same as [`start_relay`] with a caller-built config
pub async fn start_relay_with(broker: &InMemoryBroker, config: Config) -> CaptureRelay {
    let relay = CaptureRelay::with_transport(config, Arc::new(broker.clone()))
        .await
        .unwrap();
    relay.start().await;
    super::wait_for_connection(&relay, capture_relay::ConnectionState::Connected, Duration::from_secs(2))
        .await;
    relay
}
