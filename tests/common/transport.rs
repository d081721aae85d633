//! In-memory broker for driving the relay without a network

use async_trait::async_trait;
use capture_relay::{DeliveryLevel, LinkEvent, RelayError, RelayLink, RelayTransport};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A message the broker accepted
#[derive(Debug, Clone)]
pub struct Delivered {
    /// Topic it was published to
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Requested delivery level
    pub level: DeliveryLevel,
}

#[derive(Default)]
struct BrokerState {
    delivered: Vec<Delivered>,
    online: bool,
    connects: usize,
    link_events: Option<mpsc::Sender<LinkEvent>>,
}

/// Broker stand-in shared between the service and the test
///
/// Starts online. Clones share state.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                ..BrokerState::default()
            })),
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted so far
    pub fn delivered(&self) -> Vec<Delivered> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Handshakes attempted so far
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Take the broker down (dropping the current link) or bring it back
    pub fn set_online(&self, online: bool) {
        let tx = {
            let mut state = self.state.lock().unwrap();
            state.online = online;
            if online { None } else { state.link_events.take() }
        };
        if let Some(tx) = tx {
            tx.try_send(LinkEvent::Dropped {
                reason: "broker went offline".to_string(),
            })
            .ok();
        }
    }
}

#[async_trait]
impl RelayTransport for InMemoryBroker {
    async fn connect(&self) -> Result<(Arc<dyn RelayLink>, mpsc::Receiver<LinkEvent>), RelayError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if !state.online {
            return Err(RelayError::Transport("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(4);
        state.link_events = Some(tx);
        Ok((
            Arc::new(BrokerLink {
                state: self.state.clone(),
            }),
            rx,
        ))
    }
}

struct BrokerLink {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl RelayLink for BrokerLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().unwrap();
        if !state.online {
            return Err(RelayError::LinkClosed);
        }
        state.delivered.push(Delivered {
            topic: topic.to_string(),
            payload,
            level,
        });
        Ok(())
    }

    async fn disconnect(&self) {}
}
