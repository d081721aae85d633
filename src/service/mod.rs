//! The `CaptureRelay` service, split into focused submodules.
//!
//! - [`ingest`] - Upload batch handling (validate, store, account)
//! - [`pipeline`] - Scan → pack → publish for completed sessions
//! - [`lifecycle`] - Background tasks, startup and shutdown
//! - [`status`] - Session and service status queries

mod ingest;
mod lifecycle;
mod pipeline;
mod status;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::artifacts::{ArtifactPackager, ArtifactScanner};
use crate::assembler::FileAssembler;
use crate::batch_tracker::BatchTracker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::monitor::StorageMonitor;
use crate::relay::{Connection, MqttTransport, RelayPublisher, RelayTransport};
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Buffer size of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Background task bookkeeping
#[derive(Clone)]
pub(crate) struct Lifecycle {
    /// Cancels every background task on shutdown
    pub(crate) cancel: CancellationToken,
    /// Handles of spawned background tasks, joined on shutdown
    pub(crate) tasks: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    /// Whether new uploads are accepted (false once shutdown begins)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Whether background tasks have been spawned
    pub(crate) started: Arc<AtomicBool>,
}

/// Upload reassembly and artifact relay service (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct CaptureRelay {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Session bookkeeping
    pub(crate) tracker: Arc<BatchTracker>,
    /// File persistence
    pub(crate) assembler: Arc<FileAssembler>,
    /// Artifact discovery
    pub(crate) scanner: ArtifactScanner,
    /// Artifact packaging
    pub(crate) packager: ArtifactPackager,
    /// Shared broker connection
    pub(crate) connection: Arc<Connection>,
    /// Relay publisher over `connection`
    pub(crate) publisher: Arc<RelayPublisher>,
    /// Directory and disk space checks
    pub(crate) monitor: StorageMonitor,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Background task state
    pub(crate) lifecycle: Lifecycle,
}

impl CaptureRelay {
    /// Create a service that relays over MQTT
    ///
    /// Background tasks are not running until [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration and [`Error::Io`] if the upload
    /// root or work directory cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(MqttTransport::new(&config.relay));
        Self::with_transport(config, transport).await
    }

    /// Create a service with a custom relay transport
    pub async fn with_transport(config: Config, transport: Arc<dyn RelayTransport>) -> Result<Self> {
        config.validate()?;

        for (dir, what) in [
            (&config.storage.upload_root, "upload root"),
            (&config.storage.work_dir, "work directory"),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} '{}': {}", what, dir.display(), e),
                ))
            })?;
        }

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let connection = Arc::new(Connection::new(transport, &config.relay, event_tx.clone()));
        let publisher = Arc::new(RelayPublisher::new(connection.clone(), &config.relay));

        tracing::info!(
            upload_root = %config.storage.upload_root.display(),
            broker = %config.relay.broker_address(),
            topic = %config.relay.topic,
            "capture relay initialized"
        );

        Ok(Self {
            tracker: Arc::new(BatchTracker::new()),
            assembler: Arc::new(FileAssembler::new(&config.storage)),
            scanner: ArtifactScanner::new(&config.artifacts),
            packager: ArtifactPackager::new(config.storage.work_dir.clone()),
            monitor: StorageMonitor::new(&config.storage, &config.disk_space),
            connection,
            publisher,
            event_tx,
            lifecycle: Lifecycle {
                cancel: CancellationToken::new(),
                tasks: Arc::new(tokio::sync::Mutex::new(Vec::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                started: Arc::new(AtomicBool::new(false)),
            },
            config: Arc::new(config),
        })
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}
