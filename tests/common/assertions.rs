//! Custom test assertions for integration tests

use capture_relay::{CaptureRelay, ConnectionState, Event};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait until the relay reaches `state`, panicking on timeout
pub async fn wait_for_connection(relay: &CaptureRelay, state: ConnectionState, timeout: Duration) {
    tokio::time::timeout(timeout, async {
        while relay.connection_state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("relay did not reach {state:?} within {timeout:?}"));
}

/// Receive events until one matches `predicate`, panicking on timeout
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no matching event within {timeout:?}"))
}

/// Collect every event already buffered on `events`
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}
