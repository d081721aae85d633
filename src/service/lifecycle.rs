//! Startup and shutdown coordination.

use crate::error::Result;
use crate::sweeper::CleanupSweeper;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::CaptureRelay;

/// How long shutdown waits for background tasks to stop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl CaptureRelay {
    /// Spawn the background tasks
    ///
    /// Starts the relay connection supervisor, the session sweeper and the storage
    /// monitor. Calling this more than once has no further effect.
    pub async fn start(&self) {
        if self.lifecycle.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("background tasks already started");
            return;
        }

        let cancel = &self.lifecycle.cancel;
        let mut tasks = self.lifecycle.tasks.lock().await;

        tasks.push(tokio::spawn(
            self.connection.clone().run(cancel.child_token()),
        ));

        let sweeper = CleanupSweeper::new(
            self.tracker.clone(),
            &self.config.sessions,
            self.event_tx.clone(),
        );
        tasks.push(tokio::spawn(sweeper.run(cancel.child_token())));

        tasks.push(tokio::spawn(self.monitor.clone().run(cancel.child_token())));

        tracing::info!(
            broker = %self.config.relay.broker_address(),
            sweep_interval_secs = self.config.sessions.sweep_interval.as_secs(),
            "background tasks started"
        );
    }

    /// Gracefully shut down the service
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new uploads
    /// 2. Cancels the background tasks
    /// 3. Waits for them to stop with a timeout (30 seconds)
    /// 4. Closes the relay link
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Files already stored stay on disk; sessions still collecting are dropped with
    /// the service.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new uploads
        self.lifecycle.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new uploads");

        // 2. Cancel background tasks
        self.lifecycle.cancel.cancel();

        // 3. Wait for them to stop
        let handles: Vec<_> = self.lifecycle.tasks.lock().await.drain(..).collect();
        let wait = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "background task ended abnormally");
                }
            }
        })
        .await;
        if wait.is_err() {
            tracing::warn!("Timeout waiting for background tasks, proceeding with shutdown");
        }

        // 4. Close the relay link (the supervisor does this too when it was running)
        self.connection.disconnect().await;

        // 5. Emit shutdown event
        self.emit(Event::Shutdown);

        let active = self.tracker.len().await;
        if active > 0 {
            tracing::warn!(active, "shutting down with incomplete upload sessions");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
