use super::{LinkEvent, RelayLink, RelayTransport};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::types::DeliveryLevel;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const REQUEST_CAPACITY: usize = 16;

/// MQTT transport built on `rumqttc`
///
/// Each [`connect`](RelayTransport::connect) builds a fresh client with a clean session.
/// Reconnection is left to the [`Connection`](super::Connection) supervisor, so a link
/// that errors once is finished.
#[derive(Clone, Debug)]
pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    max_packet_bytes: usize,
}

impl MqttTransport {
    /// Create a transport for the configured broker
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id.clone(),
            keep_alive: config.keep_alive,
            max_packet_bytes: config.max_packet_bytes,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            // Archives travel inside a single publish; the client default is far too small
            .set_max_packet_size(self.max_packet_bytes, self.max_packet_bytes);
        options
    }
}

#[async_trait]
impl RelayTransport for MqttTransport {
    async fn connect(&self) -> Result<(Arc<dyn RelayLink>, mpsc::Receiver<LinkEvent>), RelayError> {
        tracing::debug!(host = %self.host, port = self.port, client_id = %self.client_id, "connecting to MQTT broker");

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(RelayError::Rejected(format!("{:?}", ack.code)));
                }
                Ok(_) => continue,
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(RelayError::Rejected(format!("{code:?}")));
                }
                Err(e) => return Err(RelayError::Transport(e.to_string())),
            }
        }

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(1);
        let driver = tokio::spawn(drive(eventloop, delivery_tx, event_tx));

        let link = MqttLink {
            client,
            acks: Mutex::new(AckTracker::new(delivery_rx)),
            driver,
        };
        Ok((Arc::new(link), event_rx))
    }
}

/// Publish progress reported by the event loop, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// A publish left the client with this packet id (0 for QoS 0)
    Sent(u16),
    /// The broker acknowledged this packet id
    Acked(u16),
}

// Polls the event loop for the lifetime of the link, forwarding publish progress and
// the drop.
async fn drive(
    mut eventloop: EventLoop,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    event_tx: mpsc::Sender<LinkEvent>,
) {
    let reason = loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                delivery_tx.send(Delivery::Sent(pkid)).ok();
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                delivery_tx.send(Delivery::Acked(ack.pkid)).ok();
            }
            Ok(Event::Incoming(Packet::Disconnect)) => break "broker sent DISCONNECT".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    tracing::debug!(reason = %reason, "MQTT event loop stopped");
    let _ = event_tx.send(LinkEvent::Dropped { reason }).await;
}

/// Matches PUBACKs to the publish that is waiting for them
///
/// The event loop assigns packet ids, so the client never learns them directly.
/// Publish requests leave the client in request order, which makes the n-th `Sent`
/// belong to the n-th request. A publish waits for its own `Sent` and then for an
/// `Acked` with the same id; acks for publishes whose caller gave up are skipped.
struct AckTracker {
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    requested: u64,
    sent: u64,
}

impl AckTracker {
    fn new(deliveries: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            deliveries,
            requested: 0,
            sent: 0,
        }
    }

    /// Count a publish handed to the client, returning its sequence number
    fn record_request(&mut self) -> u64 {
        self.requested += 1;
        self.requested
    }

    async fn wait_for_ack(&mut self, seq: u64) -> Result<(), RelayError> {
        let mut own_pkid = None;
        loop {
            match self.deliveries.recv().await.ok_or(RelayError::LinkClosed)? {
                Delivery::Sent(pkid) => {
                    self.sent += 1;
                    if self.sent == seq {
                        own_pkid = Some(pkid);
                    }
                }
                Delivery::Acked(pkid) if own_pkid == Some(pkid) => return Ok(()),
                Delivery::Acked(pkid) => {
                    tracing::debug!(pkid, "skipping PUBACK for an abandoned publish");
                }
            }
        }
    }
}

struct MqttLink {
    client: AsyncClient,
    acks: Mutex<AckTracker>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl RelayLink for MqttLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
    ) -> Result<(), RelayError> {
        let mut acks = self.acks.lock().await;

        let qos = match level {
            DeliveryLevel::AtMostOnce => QoS::AtMostOnce,
            DeliveryLevel::AtLeastOnce => QoS::AtLeastOnce,
        };
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let seq = acks.record_request();

        if level == DeliveryLevel::AtLeastOnce {
            acks.wait_for_ack(seq).await?;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1".to_string(),
            port,
            client_id: "capture-relay-test".to_string(),
            ..RelayConfig::default()
        }
    }

    fn tracker() -> (AckTracker, mpsc::UnboundedSender<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AckTracker::new(rx), tx)
    }

    #[tokio::test]
    async fn ack_for_abandoned_publish_is_not_taken() {
        let (mut acks, tx) = tracker();

        // First publish gave up waiting; its ack arrives during the second one
        acks.record_request();
        let second = acks.record_request();
        tx.send(Delivery::Sent(1)).unwrap();
        tx.send(Delivery::Acked(1)).unwrap();
        tx.send(Delivery::Sent(2)).unwrap();
        drop(tx);

        assert!(matches!(
            acks.wait_for_ack(second).await,
            Err(RelayError::LinkClosed)
        ));
    }

    #[tokio::test]
    async fn ack_matching_own_packet_id_completes_publish() {
        let (mut acks, tx) = tracker();

        acks.record_request();
        tx.send(Delivery::Sent(1)).unwrap();
        let second = acks.record_request();
        tx.send(Delivery::Sent(2)).unwrap();
        tx.send(Delivery::Acked(1)).unwrap();
        tx.send(Delivery::Acked(2)).unwrap();

        tokio::time::timeout(Duration::from_secs(1), acks.wait_for_ack(second))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn at_most_once_publishes_keep_the_count_aligned() {
        let (mut acks, tx) = tracker();

        // A QoS 0 publish is reported as sent with packet id 0 and never acked
        acks.record_request();
        tx.send(Delivery::Sent(0)).unwrap();
        let seq = acks.record_request();
        tx.send(Delivery::Sent(7)).unwrap();
        tx.send(Delivery::Acked(7)).unwrap();

        tokio::time::timeout(Duration::from_secs(1), acks.wait_for_ack(seq))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acks.sent, 2);
    }

    #[test]
    fn options_raise_packet_limit() {
        let mut cfg = config(1883);
        cfg.max_packet_bytes = 64 * 1024 * 1024;
        let options = MqttTransport::new(&cfg).options();
        assert_eq!(options.max_packet_size(), 64 * 1024 * 1024);
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = MqttTransport::new(&config(port)).connect().await;
        assert!(matches!(result, Err(RelayError::Transport(_))));
    }

    #[cfg(feature = "mqtt-tests")]
    #[tokio::test]
    async fn live_broker_round_trip() {
        let host = std::env::var("MQTT_BROKER").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mut cfg = config(1883);
        cfg.host = host;
        cfg.client_id = format!("capture-relay-test-{}", uuid::Uuid::new_v4());

        let (link, _events) = MqttTransport::new(&cfg).connect().await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            link.publish("capture-relay/test", b"ping".to_vec(), DeliveryLevel::AtLeastOnce),
        )
        .await
        .unwrap()
        .unwrap();
        link.disconnect().await;
    }
}
