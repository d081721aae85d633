//! Periodic eviction of abandoned upload sessions

use crate::batch_tracker::BatchTracker;
use crate::config::SessionConfig;
use crate::types::{Event, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Expires sessions that stopped receiving chunks
///
/// Only tracker state is removed; files already stored for an expired session stay
/// on disk.
pub struct CleanupSweeper {
    tracker: Arc<BatchTracker>,
    interval: Duration,
    ttl: Duration,
    event_tx: broadcast::Sender<Event>,
}

impl CleanupSweeper {
    /// Create a sweeper over `tracker`
    pub fn new(
        tracker: Arc<BatchTracker>,
        config: &SessionConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            tracker,
            interval: config.sweep_interval,
            ttl: config.ttl,
            event_tx,
        }
    }

    /// Run a single sweep, returning the expired session ids
    pub async fn run_once(&self) -> Vec<SessionId> {
        let expired = self.tracker.expire_older_than(self.ttl).await;
        for id in &expired {
            self.event_tx
                .send(Event::SessionExpired { id: id.clone() })
                .ok();
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired stale upload sessions");
        }
        expired
    }

    /// Sweep every interval until `cancel` fires
    ///
    /// The first sweep happens one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("session sweeper stopped");
                    break;
                }
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sweeper(tracker: &Arc<BatchTracker>, ttl: Duration, interval: Duration) -> (CleanupSweeper, broadcast::Receiver<Event>) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let sweeper = CleanupSweeper::new(
            tracker.clone(),
            &SessionConfig {
                ttl,
                sweep_interval: interval,
            },
            event_tx,
        );
        (sweeper, event_rx)
    }

    #[tokio::test]
    async fn run_once_expires_aged_sessions_and_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let stored = dir.path().join("img_001.jpg");
        std::fs::write(&stored, b"jpeg").unwrap();

        let tracker = Arc::new(BatchTracker::new());
        let id = SessionId::from("stale");
        tracker.start(&id, "bridge", 3).await.unwrap();
        tracker.add_chunk(&id, 0, vec![stored.clone()]).await.unwrap();

        let (sweeper, mut events) = sweeper(&tracker, Duration::from_millis(10), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(sweeper.run_once().await, vec![id.clone()]);
        assert!(tracker.is_empty().await);
        assert!(stored.exists(), "sweeping must not delete stored files");
        assert_eq!(events.recv().await.unwrap(), Event::SessionExpired { id });
    }

    #[tokio::test]
    async fn run_once_leaves_fresh_sessions() {
        let tracker = Arc::new(BatchTracker::new());
        tracker
            .start(&SessionId::from("fresh"), "bridge", 2)
            .await
            .unwrap();

        let (sweeper, _events) = sweeper(&tracker, Duration::from_secs(3600), Duration::from_secs(3600));
        assert!(sweeper.run_once().await.is_empty());
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn background_loop_sweeps_until_cancelled() {
        let tracker = Arc::new(BatchTracker::new());
        let id = SessionId::from("stale");
        tracker.start(&id, "bridge", 2).await.unwrap();
        tracker
            .add_chunk(&id, 1, vec![PathBuf::from("b.jpg")])
            .await
            .unwrap();

        let (sweeper, mut events) = sweeper(&tracker, Duration::from_millis(5), Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(cancel.clone()));

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Event::SessionExpired { id });

        cancel.cancel();
        handle.await.unwrap();
    }
}
