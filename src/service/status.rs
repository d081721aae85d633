//! Session and service status queries.

use crate::error::Result;
use crate::types::{ConnectionState, ServiceStatus, SessionId, SessionStatusReport};
use std::sync::atomic::Ordering;

use super::CaptureRelay;

impl CaptureRelay {
    /// Progress of a session that is still collecting
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`](crate::error::SessionError::UnknownSession)
    /// if the session is not tracked (never started, completed, or expired).
    pub async fn session_status(&self, id: &SessionId) -> Result<SessionStatusReport> {
        let progress = self.tracker.progress(id).await?;
        Ok(SessionStatusReport {
            received_count: progress.received_count,
            expected_count: progress.expected_count,
            relay_connected: self.connection.is_connected(),
        })
    }

    /// Current relay connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Service-wide status snapshot
    pub async fn service_status(&self) -> ServiceStatus {
        ServiceStatus {
            relay_state: self.connection.state(),
            broker: self.config.relay.broker_address(),
            topic: self.config.relay.topic.clone(),
            active_sessions: self.tracker.len().await,
            scan_roots: self.config.artifacts.scan_roots.clone(),
            shutting_down: !self.lifecycle.accepting_new.load(Ordering::SeqCst),
        }
    }
}
