//! Publish channel to downstream consumers
//!
//! This module owns the single broker connection and everything that talks to it.
//!
//! ## Architecture
//!
//! - [`RelayTransport`] / [`RelayLink`]: the transport seam. [`MqttTransport`] is the
//!   production implementation on top of `rumqttc`; tests plug in in-memory links.
//! - [`Connection`]: the connection state machine
//!   (`Disconnected → Connecting → Connected → Disconnected`). A supervisor task owns
//!   every transition, reconnecting with exponential backoff after a drop.
//! - [`RelayPublisher`]: publishes [`RelayEnvelope`]s with a delivery level and a time
//!   bound. It never queues: when the broker is unreachable the publish fails fast.

mod connection;
mod envelope;
mod mqtt;
mod publisher;

pub use connection::Connection;
pub use envelope::RelayEnvelope;
pub use mqtt::MqttTransport;
pub use publisher::RelayPublisher;

use crate::error::RelayError;
use crate::types::DeliveryLevel;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Out-of-band notifications from an established link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is gone; no further publishes will succeed on it
    Dropped {
        /// Why the link dropped
        reason: String,
    },
}

/// Opens links to the broker
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Perform the connection handshake
    ///
    /// On success returns the link plus a channel that reports when the link drops.
    async fn connect(&self) -> Result<(Arc<dyn RelayLink>, mpsc::Receiver<LinkEvent>), RelayError>;
}

/// One established broker link
#[async_trait]
pub trait RelayLink: Send + Sync {
    /// Send `payload` to `topic`
    ///
    /// With [`DeliveryLevel::AtLeastOnce`] this resolves only after the broker has
    /// acknowledged the message.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
    ) -> Result<(), RelayError>;

    /// Close the link
    async fn disconnect(&self);
}
