//! # capture-relay
//!
//! Backend library that reassembles chunked image uploads from capture clients and
//! relays the resulting 3D artifacts to downstream consumers over MQTT.
//!
//! ## Design Philosophy
//!
//! capture-relay is designed to be:
//! - **Tolerant of flaky clients** - Chunks may arrive in any order, concurrently, or twice
//! - **Never blocked by the broker** - Uploads succeed even when the relay is down
//! - **Library-first** - No HTTP layer, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use capture_relay::{CaptureRelay, Category, Config, ProjectInfo, SessionId, UploadBatch, UploadFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.apply_env_overrides()?;
//!
//!     let relay = CaptureRelay::new(config).await?;
//!     relay.start().await;
//!
//!     // Subscribe to events
//!     let mut events = relay.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let receipt = relay
//!         .upload_batch(UploadBatch {
//!             session_id: Some(SessionId::from("capture-42")),
//!             batch_index: 0,
//!             batch_total: 1,
//!             category: Category::Model,
//!             subcategory: "line-3".to_string(),
//!             project: ProjectInfo::parse(r#"{"name":"bridge"}"#)?,
//!             files: vec![UploadFile {
//!                 relative_path: "img_001.jpg".to_string(),
//!                 track_tag: None,
//!                 bytes: std::fs::read("img_001.jpg")?,
//!             }],
//!         })
//!         .await?;
//!     println!("relay: {:?}", receipt.relay);
//!
//!     relay.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Artifact discovery and packaging
pub mod artifacts;
/// Validated, atomic file persistence
pub mod assembler;
/// Upload session bookkeeping
pub mod batch_tracker;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Directory presence and disk space monitoring
pub mod monitor;
/// Broker connection and publishing
pub mod relay;
/// Retry logic with exponential backoff
pub mod retry;
/// Service facade (decomposed into focused submodules)
pub mod service;
/// Expiry of abandoned sessions
pub mod sweeper;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use artifacts::{ArtifactPackager, ArtifactScanner, PackedArchive};
pub use assembler::{FileAssembler, ProjectLocation};
pub use batch_tracker::{BatchTracker, ChunkOutcome, CompletedSession, StartOutcome};
pub use config::{
    ArtifactConfig, Config, DiskSpaceConfig, RelayConfig, RetryConfig, SessionConfig,
    StorageConfig,
};
pub use error::{
    ArtifactError, Error, ErrorKind, RelayError, Result, SessionError, ValidationError,
};
pub use monitor::{SpaceLevel, StorageMonitor, StorageReport};
pub use relay::{
    Connection, LinkEvent, MqttTransport, RelayEnvelope, RelayLink, RelayPublisher,
    RelayTransport,
};
pub use service::CaptureRelay;
pub use sweeper::CleanupSweeper;
pub use types::{
    Category, ConnectionState, DeliveryLevel, DeliveryStatus, Event, ProjectInfo, RelayOutcome,
    RelayReport, ServiceStatus, SessionId, SessionProgress, SessionStatus, SessionStatusReport,
    UploadBatch, UploadFile, UploadReceipt,
};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use capture_relay::{CaptureRelay, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let relay = CaptureRelay::new(Config::default()).await?;
///     relay.start().await;
///
///     // Hand `relay.clone()` to the upload front end here
///
///     run_with_shutdown(relay).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(relay: CaptureRelay) -> Result<()> {
    wait_for_signal().await;
    relay.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
