//! Shared test helpers: sample images, an in-memory relay transport, and a ready-made
//! `CaptureRelay` rooted in a temp directory.

use crate::config::{Config, RelayConfig, RetryConfig};
use crate::error::RelayError;
use crate::relay::{LinkEvent, RelayLink, RelayTransport};
use crate::service::CaptureRelay;
use crate::types::{Category, DeliveryLevel, ProjectInfo, SessionId, UploadBatch, UploadFile};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn encode(format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::new_rgb8(4, 4)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

/// A small valid JPEG image
pub(crate) fn jpeg_bytes() -> Vec<u8> {
    encode(ImageFormat::Jpeg)
}

/// A small valid PNG image
pub(crate) fn png_bytes() -> Vec<u8> {
    encode(ImageFormat::Png)
}

/// Relay settings with millisecond timeouts and reconnect delays
pub(crate) fn fast_relay_config() -> RelayConfig {
    RelayConfig {
        client_id: "capture-relay-test".to_string(),
        topic: "ply/files".to_string(),
        connect_timeout: Duration::from_millis(500),
        publish_timeout: Duration::from_secs(2),
        reconnect: RetryConfig {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        publish_retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..RelayConfig::default()
    }
}

/// A message captured by [`MemoryTransport`]
#[derive(Debug, Clone)]
pub(crate) struct PublishedMessage {
    pub(crate) topic: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) level: DeliveryLevel,
}

#[derive(Default)]
struct MemoryState {
    published: Vec<PublishedMessage>,
    refuse: bool,
    connects: usize,
    fail_next: u32,
    withhold_acks: bool,
    link_events: Option<mpsc::Sender<LinkEvent>>,
}

/// In-memory broker that records what is published
///
/// Clones share state, so a test keeps one handle while the service owns another.
#[derive(Clone, Default)]
pub(crate) struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Messages accepted so far, in order
    pub(crate) fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Refuse (or accept again) new connection handshakes
    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    /// Number of handshakes attempted, refused ones included
    pub(crate) fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Report the current link as dropped
    pub(crate) fn drop_link(&self, reason: &str) {
        let tx = self.state.lock().unwrap().link_events.take();
        if let Some(tx) = tx {
            // The receiver is gone when nothing supervises the link
            tx.try_send(LinkEvent::Dropped {
                reason: reason.to_string(),
            })
            .ok();
        }
    }

    /// Fail the next `n` publishes with a transport error
    pub(crate) fn fail_next_publishes(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Never acknowledge at-least-once publishes
    pub(crate) fn withhold_acks(&self, withhold: bool) {
        self.state.lock().unwrap().withhold_acks = withhold;
    }
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn connect(&self) -> Result<(Arc<dyn RelayLink>, mpsc::Receiver<LinkEvent>), RelayError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.refuse {
            return Err(RelayError::Rejected("refused by test broker".to_string()));
        }
        let (tx, rx) = mpsc::channel(4);
        state.link_events = Some(tx);
        let link = MemoryLink {
            state: self.state.clone(),
        };
        Ok((Arc::new(link), rx))
    }
}

struct MemoryLink {
    state: Arc<Mutex<MemoryState>>,
}

enum PublishAction {
    Fail,
    Hang,
    Accept,
}

#[async_trait]
impl RelayLink for MemoryLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
    ) -> Result<(), RelayError> {
        let action = {
            let mut state = self.state.lock().unwrap();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                PublishAction::Fail
            } else if state.withhold_acks && level == DeliveryLevel::AtLeastOnce {
                PublishAction::Hang
            } else {
                state.published.push(PublishedMessage {
                    topic: topic.to_string(),
                    payload,
                    level,
                });
                PublishAction::Accept
            }
        };

        match action {
            PublishAction::Fail => Err(RelayError::Transport("injected failure".to_string())),
            PublishAction::Hang => std::future::pending().await,
            PublishAction::Accept => Ok(()),
        }
    }

    async fn disconnect(&self) {}
}

/// Config rooted in `dir` with fast relay timings and no disk space minimum
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.upload_root = dir.join("uploads");
    config.storage.work_dir = dir.join("work");
    config.relay = fast_relay_config();
    config.disk_space.min_free_space = 0;
    config
}

/// Helper to create a test CaptureRelay over an in-memory transport that is already
/// connected. Returns the relay, the transport handle and the tempdir (which must be
/// kept alive).
pub(crate) async fn create_test_relay() -> (CaptureRelay, MemoryTransport, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    create_test_relay_with(test_config(temp_dir.path()), temp_dir).await
}

/// Same as [`create_test_relay`] with a caller-adjusted config
pub(crate) async fn create_test_relay_with(
    config: Config,
    temp_dir: TempDir,
) -> (CaptureRelay, MemoryTransport, TempDir) {
    let transport = MemoryTransport::new();
    let relay = CaptureRelay::with_transport(config, Arc::new(transport.clone()))
        .await
        .unwrap();
    relay.connection.connect().await.unwrap();
    (relay, transport, temp_dir)
}

/// A batch of one model-category project
pub(crate) fn batch(
    session: &str,
    index: u32,
    total: u32,
    files: Vec<(&str, Vec<u8>)>,
) -> UploadBatch {
    UploadBatch {
        session_id: Some(SessionId::from(session)),
        batch_index: index,
        batch_total: total,
        category: Category::Model,
        subcategory: "line-3".to_string(),
        project: ProjectInfo::named("bridge"),
        files: files
            .into_iter()
            .map(|(path, bytes)| UploadFile {
                relative_path: path.to_string(),
                track_tag: None,
                bytes,
            })
            .collect(),
    }
}
