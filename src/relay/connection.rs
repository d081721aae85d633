use super::{LinkEvent, RelayLink, RelayTransport};
use crate::config::{RelayConfig, RetryConfig};
use crate::error::RelayError;
use crate::retry::Backoff;
use crate::types::{ConnectionState, DeliveryLevel, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// The single shared broker connection
///
/// State is published through a `watch` channel so readers never block on the link.
/// The link itself sits behind a mutex that every publish holds for its duration,
/// which serializes publishes on the one connection.
pub struct Connection {
    transport: Arc<dyn RelayTransport>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Arc<dyn RelayLink>>>,
    connect_timeout: Duration,
    reconnect: RetryConfig,
    event_tx: broadcast::Sender<Event>,
}

impl Connection {
    /// Create a disconnected connection
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        config: &RelayConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            state,
            link: Mutex::new(None),
            connect_timeout: config.connect_timeout,
            reconnect: config.reconnect.clone(),
            event_tx,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether publishes are currently accepted
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run one connection handshake
    ///
    /// Moves to `Connecting`, then to `Connected` on success or back to `Disconnected`
    /// on failure. The returned receiver reports when the new link drops.
    pub async fn connect(&self) -> Result<mpsc::Receiver<LinkEvent>, RelayError> {
        self.set_state(ConnectionState::Connecting);

        let attempt = tokio::time::timeout(self.connect_timeout, self.transport.connect()).await;
        match attempt {
            Ok(Ok((link, events))) => {
                *self.link.lock().await = Some(link);
                self.set_state(ConnectionState::Connected);
                tracing::info!("relay connection established");
                Ok(events)
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                Err(RelayError::Timeout {
                    after: self.connect_timeout,
                })
            }
        }
    }

    /// Record that the link dropped
    ///
    /// The state flips first so new publishes fail fast while any in-flight publish
    /// still holds the link.
    pub async fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
        self.link.lock().await.take();
    }

    /// Close the link, if any, and move to `Disconnected`
    pub async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.disconnect().await;
        }
    }

    /// Send one payload over the current link
    ///
    /// # Errors
    ///
    /// [`RelayError::NotConnected`] unless the state is `Connected`; otherwise whatever
    /// the link reports.
    pub async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
    ) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }

        let guard = self.link.lock().await;
        match guard.as_ref() {
            Some(link) if self.is_connected() => link.publish(topic, payload, level).await,
            _ => Err(RelayError::NotConnected),
        }
    }

    /// Keep the connection up until `cancel` fires
    ///
    /// Connects, waits for the link to drop, then reconnects after an exponentially
    /// growing, jittered delay. The delay resets after every successful handshake.
    /// On cancellation the link is closed.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.reconnect.clone());

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok(mut link_events) => {
                    backoff.reset();
                    let reason = tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = link_events.recv() => match event {
                            Some(LinkEvent::Dropped { reason }) => reason,
                            None => "link event channel closed".to_string(),
                        },
                    };
                    tracing::warn!(reason = %reason, "relay connection lost");
                    self.mark_disconnected().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "relay connection attempt failed");
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis(), "waiting before reconnect");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.disconnect().await;
        tracing::debug!("relay connection supervisor stopped");
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = ?next, "relay connection state changed");
            // No subscribers is fine
            let _ = self.event_tx.send(Event::ConnectionChanged { state: next });
        }
    }
}
