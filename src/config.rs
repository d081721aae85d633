//! Configuration types for capture-relay

use crate::error::{Error, Result};
use crate::types::DeliveryLevel;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Upload storage configuration (directories, accepted payloads)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory uploads are reassembled under (default: "./uploaded_images")
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    /// Scratch directory for temporary archives (default: "./temp")
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Extensions decoded and validated as images before writing
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// If non-empty, only files with these extensions are stored
    #[serde(default)]
    pub accepted_extensions: Vec<String>,

    /// Write an `upload_status_<index>.json` summary per batch (default: true)
    #[serde(default = "default_true")]
    pub write_batch_status: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_root: default_upload_root(),
            work_dir: default_work_dir(),
            image_extensions: default_image_extensions(),
            accepted_extensions: Vec::new(),
            write_batch_status: true,
        }
    }
}

/// Artifact discovery and packaging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directories scanned for artifacts; empty means "the completed project's directory"
    #[serde(default)]
    pub scan_roots: Vec<PathBuf>,

    /// File name suffix identifying artifacts (default: ".ply")
    #[serde(default = "default_artifact_suffix")]
    pub suffix: String,

    /// Directory depth to scan below each root; 1 scans only the root itself (default: 1)
    #[serde(default = "default_scan_depth")]
    pub max_depth: usize,

    /// Prefix of generated archive names (default: "ply_files")
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            scan_roots: Vec::new(),
            suffix: default_artifact_suffix(),
            max_depth: default_scan_depth(),
            archive_prefix: default_archive_prefix(),
        }
    }
}

/// Relay broker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Broker hostname (default: "localhost")
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port (default: 1883)
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// MQTT client id (default: random "capture-relay-<uuid>")
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic relay messages are published to (default: "ply/files")
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Delivery guarantee for relay messages (default: at-least-once)
    #[serde(default)]
    pub delivery: DeliveryLevel,

    /// MQTT keep-alive interval (default: 30 seconds)
    #[serde(default = "default_keep_alive", with = "duration_serde")]
    pub keep_alive: Duration,

    /// Bound on a single connection handshake (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Bound on a publish including its internal retries (default: 30 seconds)
    #[serde(default = "default_publish_timeout", with = "duration_serde")]
    pub publish_timeout: Duration,

    /// Largest packet the link will send or accept (default: 128 MiB)
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,

    /// Backoff between reconnect attempts (max_attempts is ignored; reconnects never give up)
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect: RetryConfig,

    /// Retries for transient send failures inside one publish
    #[serde(default = "default_publish_retry")]
    pub publish_retry: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            topic: default_topic(),
            delivery: DeliveryLevel::default(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            publish_timeout: default_publish_timeout(),
            max_packet_bytes: default_max_packet_bytes(),
            reconnect: default_reconnect_backoff(),
            publish_retry: default_publish_retry(),
        }
    }
}

impl RelayConfig {
    /// Broker address as `host:port`
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Session tracking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum age of a collecting session before eviction (default: 1 hour)
    #[serde(default = "default_session_ttl", with = "duration_serde")]
    pub ttl: Duration,

    /// Interval between sweeps (default: 1 hour)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: default_session_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum free space to maintain (default: 1 GB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Interval between storage health checks (default: 5 minutes)
    #[serde(default = "default_monitor_interval", with = "duration_serde")]
    pub check_interval: Duration,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
            check_interval: default_monitor_interval(),
        }
    }
}

/// Main configuration for [`CaptureRelay`](crate::CaptureRelay)
///
/// Fields are organized into logical sub-configs:
/// - [`storage`](StorageConfig) - upload root, scratch dir, accepted payloads
/// - [`artifacts`](ArtifactConfig) - scan roots, artifact suffix, archive naming
/// - [`relay`](RelayConfig) - broker address, topic, delivery level, timeouts
/// - [`sessions`](SessionConfig) - session TTL and sweep interval
/// - [`disk_space`](DiskSpaceConfig) - free-space threshold and monitor interval
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upload storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Artifact discovery and packaging
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Relay broker settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Session tracking
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Disk space checking
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        Ok(config)
    }

    /// Apply the environment variables understood by existing deployments
    ///
    /// - `MQTT_BROKER`, `MQTT_PORT`, `MQTT_TOPIC`, `MQTT_CLIENT_ID` - relay settings
    /// - `PLY_CHECK_PATH` - replaces the artifact scan roots with a single directory
    /// - `UPLOAD_FOLDER` - upload root
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MQTT_BROKER") {
            self.relay.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.relay.port = port.parse().map_err(|_| Error::Config {
                message: format!("MQTT_PORT is not a valid port: {port}"),
                key: Some("relay.port".to_string()),
            })?;
        }
        if let Some(topic) = lookup("MQTT_TOPIC") {
            self.relay.topic = topic;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.relay.client_id = client_id;
        }
        if let Some(path) = lookup("PLY_CHECK_PATH") {
            self.artifacts.scan_roots = vec![PathBuf::from(path)];
        }
        if let Some(path) = lookup("UPLOAD_FOLDER") {
            self.storage.upload_root = PathBuf::from(path);
        }
        Ok(())
    }

    /// Check the configuration for values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Error {
            Error::Config {
                message: message.to_string(),
                key: Some(key.to_string()),
            }
        }

        if self.relay.host.trim().is_empty() {
            return Err(invalid("relay.host", "broker host must not be empty"));
        }
        if self.relay.port == 0 {
            return Err(invalid("relay.port", "broker port must not be 0"));
        }
        if self.relay.topic.trim().is_empty() {
            return Err(invalid("relay.topic", "topic must not be empty"));
        }
        if self.relay.topic.contains(['+', '#']) {
            return Err(invalid(
                "relay.topic",
                "topic must not contain MQTT wildcards",
            ));
        }
        if self.relay.client_id.trim().is_empty() {
            return Err(invalid("relay.client_id", "client id must not be empty"));
        }
        if !self.relay.keep_alive.is_zero() && self.relay.keep_alive < Duration::from_secs(1) {
            return Err(invalid(
                "relay.keep_alive",
                "keep-alive must be zero or at least one second",
            ));
        }
        if self.relay.publish_timeout.is_zero() {
            return Err(invalid(
                "relay.publish_timeout",
                "publish timeout must be positive",
            ));
        }
        if self.relay.connect_timeout.is_zero() {
            return Err(invalid(
                "relay.connect_timeout",
                "connect timeout must be positive",
            ));
        }
        if self.relay.reconnect.backoff_multiplier < 1.0
            || self.relay.publish_retry.backoff_multiplier < 1.0
        {
            return Err(invalid(
                "relay.reconnect.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        if self.artifacts.suffix.trim().is_empty() {
            return Err(invalid("artifacts.suffix", "artifact suffix must not be empty"));
        }
        if self.artifacts.max_depth == 0 {
            return Err(invalid(
                "artifacts.max_depth",
                "scan depth must be at least 1",
            ));
        }
        if self.sessions.sweep_interval.is_zero() {
            return Err(invalid(
                "sessions.sweep_interval",
                "sweep interval must be positive",
            ));
        }
        if self.disk_space.check_interval.is_zero() {
            return Err(invalid(
                "disk_space.check_interval",
                "check interval must be positive",
            ));
        }
        Ok(())
    }
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("./uploaded_images")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_image_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_artifact_suffix() -> String {
    ".ply".to_string()
}

fn default_scan_depth() -> usize {
    1
}

fn default_archive_prefix() -> String {
    "ply_files".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    format!("capture-relay-{}", uuid::Uuid::new_v4())
}

fn default_topic() -> String {
    "ply/files".to_string()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_packet_bytes() -> usize {
    128 * 1024 * 1024
}

fn default_reconnect_backoff() -> RetryConfig {
    RetryConfig {
        max_attempts: u32::MAX,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

fn default_publish_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_min_free_space() -> u64 {
    1024 * 1024 * 1024
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(300)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
