use super::*;
use crate::types::Event;

async fn unstarted_relay() -> (CaptureRelay, MemoryTransport, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let transport = MemoryTransport::new();
    let relay = CaptureRelay::with_transport(test_config(temp_dir.path()), Arc::new(transport.clone()))
        .await
        .unwrap();
    (relay, transport, temp_dir)
}

#[tokio::test]
async fn new_creates_upload_and_work_directories() {
    let (relay, _transport, _temp_dir) = unstarted_relay().await;
    assert!(relay.config().storage.upload_root.is_dir());
    assert!(relay.config().storage.work_dir.is_dir());
    assert_eq!(relay.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.relay.topic = "ply/#".to_string();

    let result = CaptureRelay::with_transport(config, Arc::new(MemoryTransport::new())).await;
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn start_connects_and_shutdown_disconnects() {
    let (relay, transport, _temp_dir) = unstarted_relay().await;
    let mut state = relay.connection.subscribe();

    relay.start().await;
    relay.start().await;
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(relay.lifecycle.tasks.lock().await.len(), 3);

    let mut events = relay.subscribe();
    relay.shutdown().await.unwrap();

    assert_eq!(relay.connection_state(), ConnectionState::Disconnected);
    assert!(relay.lifecycle.tasks.lock().await.is_empty());
    let shutdown = loop {
        match events.recv().await.unwrap() {
            Event::Shutdown => break true,
            _ => continue,
        }
    };
    assert!(shutdown);
}

#[tokio::test]
async fn uploads_are_rejected_after_shutdown() {
    let (relay, _transport, _temp_dir) = create_test_relay().await;
    relay.shutdown().await.unwrap();

    let err = relay
        .upload_batch(batch("s-late", 0, 1, vec![("img_001.jpg", jpeg_bytes())]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert!(relay.service_status().await.shutting_down);
}

#[tokio::test]
async fn service_status_reports_relay_and_sessions() {
    let (relay, _transport, _temp_dir) = create_test_relay().await;

    relay
        .upload_batch(batch("s-open", 0, 2, vec![("img_001.jpg", jpeg_bytes())]))
        .await
        .unwrap();

    let status = relay.service_status().await;
    assert_eq!(status.relay_state, ConnectionState::Connected);
    assert_eq!(status.broker, "localhost:1883");
    assert_eq!(status.topic, "ply/files");
    assert_eq!(status.active_sessions, 1);
    assert!(status.scan_roots.is_empty());
    assert!(!status.shutting_down);
}

#[tokio::test]
async fn sweeper_task_expires_abandoned_sessions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.sessions.ttl = Duration::from_millis(10);
    config.sessions.sweep_interval = Duration::from_millis(20);
    let (relay, _transport, _temp_dir) = create_test_relay_with(config, temp_dir).await;
    let mut events = relay.subscribe();

    relay
        .upload_batch(batch("s-abandoned", 0, 2, vec![("img_001.jpg", jpeg_bytes())]))
        .await
        .unwrap();
    relay.start().await;

    let expired = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Event::SessionExpired { id } = events.recv().await.unwrap() {
                break id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(expired, SessionId::from("s-abandoned"));
    assert!(project_dir(&relay).join("img_001.jpg").is_file());

    relay.shutdown().await.unwrap();
}
