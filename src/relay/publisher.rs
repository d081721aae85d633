use super::{Connection, RelayEnvelope};
use crate::config::{RelayConfig, RetryConfig};
use crate::error::RelayError;
use crate::retry::with_retry;
use crate::types::{ConnectionState, DeliveryLevel};
use std::sync::Arc;
use std::time::Duration;

/// Publishes relay envelopes over the shared [`Connection`]
///
/// There is no queue behind this: a publish either reaches the broker within
/// `publish_timeout` or the caller gets the error.
pub struct RelayPublisher {
    connection: Arc<Connection>,
    topic: String,
    delivery: DeliveryLevel,
    publish_timeout: Duration,
    retry: RetryConfig,
}

impl RelayPublisher {
    /// Create a publisher for the configured topic and delivery level
    pub fn new(connection: Arc<Connection>, config: &RelayConfig) -> Self {
        Self {
            connection,
            topic: config.topic.clone(),
            delivery: config.delivery,
            publish_timeout: config.publish_timeout,
            retry: config.publish_retry.clone(),
        }
    }

    /// Default topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Publish to the default topic with the default delivery level
    pub async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        self.publish_to(&self.topic, envelope, self.delivery).await
    }

    /// Publish `envelope` to `topic`
    ///
    /// # Errors
    ///
    /// - [`RelayError::NotConnected`] immediately if the connection is not `Connected`
    /// - [`RelayError::Timeout`] if the send (including retries of transient transport
    ///   errors) does not finish within the publish timeout
    /// - any non-transient error reported by the link
    pub async fn publish_to(
        &self,
        topic: &str,
        envelope: &RelayEnvelope,
        level: DeliveryLevel,
    ) -> Result<(), RelayError> {
        if self.connection.state() != ConnectionState::Connected {
            return Err(RelayError::NotConnected);
        }

        let payload = envelope
            .to_bytes()
            .map_err(|e| RelayError::Transport(format!("failed to encode envelope: {e}")))?;
        let size = payload.len();

        let send = with_retry(&self.retry, || {
            self.connection.send(topic, payload.clone(), level)
        });

        match tokio::time::timeout(self.publish_timeout, send).await {
            Ok(Ok(())) => {
                tracing::info!(
                    session_id = %envelope.correlation_id,
                    topic,
                    kind = ?envelope.kind,
                    bytes = size,
                    "relay message published"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RelayError::Timeout {
                after: self.publish_timeout,
            }),
        }
    }
}
